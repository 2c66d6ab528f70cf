//! Resolves and caches the default IPv4 gateway address, and answers
//! synthesized queries for the gateway's own name.
//!
//! Grounded on `gateway.c`'s `resolve_gateway_ip`/`handle_gateway_query` in
//! the original implementation: same `/proc/net/route` column layout, same
//! little-endian reinterpretation of the hex gateway field, same fixed
//! 60-second TTL on the synthesized A record.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};

use log::warn;
use utils::error::Result;

use crate::wire::{Message, Question, Record, RCODE_NOERROR, RCODE_SERVFAIL, TYPE_A};

const PROC_NET_ROUTE: &str = "/proc/net/route";
const GATEWAY_TTL: u32 = 60;

/// Caches the resolved gateway address as a plain `u32` (the address in
/// the same big-endian-numeric sense `Ipv4Addr`'s `From`/`Into` use), 0
/// meaning "not yet resolved". A 32-bit aligned store is written and read
/// without further synchronization; a reader racing a concurrent re-resolve
/// sees either the old or the new address, never a torn value, and either
/// is an acceptable answer for a handful of milliseconds.
#[derive(Default)]
pub struct GatewayState {
	addr: AtomicU32,
}

impl GatewayState {
	pub fn new() -> Self {
		GatewayState { addr: AtomicU32::new(0) }
	}

	pub fn get(&self) -> Option<Ipv4Addr> {
		match self.addr.load(Ordering::Relaxed) {
			0 => None,
			raw => Some(Ipv4Addr::from(raw)),
		}
	}

	/// Re-scan `/proc/net/route` for the default route's gateway and cache
	/// it. Leaves the previously cached value untouched on failure.
	pub fn resolve(&self) -> Result<Ipv4Addr> {
		let file = File::open(PROC_NET_ROUTE).map_err(|e| warn!("Failed to open {PROC_NET_ROUTE}: {e}"))?;
		let addr = parse_default_gateway(BufReader::new(file)).ok_or_else(|| warn!("No default route found in {PROC_NET_ROUTE}"))?;

		self.addr.store(u32::from(addr), Ordering::Relaxed);
		Ok(addr)
	}

	/// Current value, re-resolving first if nothing has been cached yet.
	pub fn get_or_resolve(&self) -> Option<Ipv4Addr> {
		self.get().or_else(|| self.resolve().ok())
	}
}

/// Parse the kernel's route table, returning the gateway of the route
/// whose destination is `0.0.0.0` (the default route).
///
/// Each data line is whitespace-delimited: `Iface Destination Gateway
/// Flags RefCnt Use Metric Mask MTU Window IRTT`. `Destination` and
/// `Gateway` are 8 hex digits representing the address's raw in-memory
/// bytes -- on every architecture Linux runs this on that's little-endian,
/// so the hex text read as a big-endian number has to be byte-reversed to
/// get the address anyone would recognize.
fn parse_default_gateway(reader: impl BufRead) -> Option<Ipv4Addr> {
	for line in reader.lines().skip(1) {
		let line = line.ok()?;
		let mut fields = line.split_whitespace();

		let _iface = fields.next()?;
		let dest = fields.next()?;
		let gateway = fields.next()?;

		let dest = u32::from_str_radix(dest, 16).ok()?;
		if dest != 0 {
			continue;
		}

		let gateway = u32::from_str_radix(gateway, 16).ok()?;
		return Some(Ipv4Addr::from(gateway.to_le_bytes()));
	}

	None
}

/// Build the response for a query this daemon has already determined is
/// for its own synthesized gateway name.
///
/// A/AAAA: A returns the cached-or-resolved gateway address with a 60s
/// TTL; AAAA returns an empty NOERROR (no IPv6 gateway record exists).
/// Anything else also gets an empty NOERROR, matching
/// `handle_gateway_query`'s behavior for non-address query types. If an A
/// record is requested and route discovery still fails after a re-scan,
/// the response is SERVFAIL instead.
pub fn handle_gateway_query(query: &Message, question: &Question, gateway: &GatewayState) -> Message {
	let mut response = Message::new();
	response.id = query.id;
	response.qr = true;
	response.aa = true;
	response.rd = query.rd;
	response.ra = true;
	response.rcode = RCODE_NOERROR;
	response.question = Some(question.clone());

	if question.qtype == TYPE_A {
		match gateway.get_or_resolve() {
			Some(addr) => response.answers.push(Record::a(question.name.clone(), GATEWAY_TTL, addr)),
			None => response.rcode = RCODE_SERVFAIL,
		}
	}

	response
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_default_route_gateway() {
		let table = "Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\t\
			Mask\t\tMTU\tWindow\tIRTT\n\
			eth0\t0101A8C0\t00000000\t0001\t0\t0\t0\t00FFFFFF\t0\t0\t0\n\
			eth0\t00000000\t0101A8C0\t0003\t0\t0\t0\t00000000\t0\t0\t0\n";

		let addr = parse_default_gateway(table.as_bytes()).unwrap();
		assert_eq!(addr, Ipv4Addr::new(192, 168, 1, 1));
	}

	#[test]
	fn no_default_route_returns_none() {
		let table = "Iface\tDestination\tGateway\n\
			eth0\t0101A8C0\t00000000\t0001\t0\t0\t0\t00FFFFFF\t0\t0\t0\n";

		assert!(parse_default_gateway(table.as_bytes()).is_none());
	}

	#[test]
	fn gateway_a_query_answers_with_cached_address() {
		let gateway = GatewayState::new();
		gateway.addr.store(u32::from(Ipv4Addr::new(192, 168, 1, 1)), Ordering::Relaxed);

		let mut query = Message::new();
		query.id = 42;
		query.rd = true;
		let question = Question { name: "gateway.docker.".into(), qtype: TYPE_A, qclass: 1 };

		let response = handle_gateway_query(&query, &question, &gateway);
		assert_eq!(response.id, 42);
		assert!(response.qr);
		assert!(response.aa);
		assert!(response.rd);
		assert_eq!(response.rcode, RCODE_NOERROR);
		assert_eq!(response.answers.len(), 1);
		assert_eq!(response.answers[0].rdata, Ipv4Addr::new(192, 168, 1, 1).octets());
	}

	#[test]
	fn gateway_aaaa_query_gets_empty_noerror() {
		let gateway = GatewayState::new();
		gateway.addr.store(u32::from(Ipv4Addr::new(192, 168, 1, 1)), Ordering::Relaxed);

		let query = Message::new();
		let question = Question { name: "gateway.docker.".into(), qtype: crate::wire::TYPE_AAAA, qclass: 1 };

		let response = handle_gateway_query(&query, &question, &gateway);
		assert_eq!(response.rcode, RCODE_NOERROR);
		assert!(response.answers.is_empty());
	}
}
