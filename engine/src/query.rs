//! The query processor: the single decision tree every incoming datagram
//! passes through, straight out of the original implementation's
//! `process_dns_query` state machine.

use std::net::UdpSocket;

use log::{debug, warn};

use crate::config::Config;
use crate::forwarder::{self, Outcome};
use crate::gateway::GatewayState;
use crate::loop_marker;
use crate::name_policy;
use crate::wire::{Message, Question, RCODE_NOERROR, RCODE_REFUSED, RCODE_SERVFAIL, TYPE_A, TYPE_AAAA};

/// Decode `data`, run it through the suffix/gateway/forward decision
/// tree, and send exactly one response datagram back to `client` over
/// `socket` -- unless the datagram didn't even parse as DNS, in which
/// case it is silently dropped.
pub fn handle(config: &Config, gateway: &GatewayState, socket: &UdpSocket, data: &[u8], client: std::net::SocketAddr) {
	let query = match Message::parse(data) {
		Ok(msg) => msg,
		Err(()) => {
			debug!("Dropping unparseable datagram from {client}");
			return;
		}
	};

	let Some(question) = query.question.clone() else {
		debug!("Dropping query with no question from {client}");
		return;
	};

	let response = route(config, gateway, &query, &question);
	send_response(socket, client, &response);
}

fn route(config: &Config, gateway: &GatewayState, query: &Message, question: &Question) -> Message {
	let hops = loop_marker::get_loop_marker(query);

	if hops >= config.max_hops {
		warn!("Refusing query for {} after {hops} hops (limit {})", question.name, config.max_hops);
		return skeleton(query, question, RCODE_SERVFAIL);
	}

	if !name_policy::is_match_suffix(&question.name, &config.suffix_domain) {
		return skeleton(query, question, RCODE_REFUSED);
	}

	if name_policy::is_gateway_domain(&question.name, &config.gateway_name, &config.suffix_domain) {
		return crate::gateway::handle_gateway_query(query, question, gateway);
	}

	if question.qtype != TYPE_A && question.qtype != TYPE_AAAA {
		return skeleton(query, question, RCODE_NOERROR);
	}

	let fwd_name = if config.keep_suffix {
		name_policy::strip_dot(&question.name).to_owned()
	} else {
		name_policy::strip_suffix(&question.name, &config.suffix_domain).to_owned()
	};

	match forwarder::forward(config, query, &question.name, question.qtype, &fwd_name, hops + 1) {
		Ok(Outcome::Answered(response)) => response,
		Ok(Outcome::NoAnswer) => skeleton(query, question, RCODE_REFUSED),
		Err(()) => skeleton(query, question, RCODE_REFUSED),
	}
}

/// A bare response carrying only the header fields and question the
/// non-forwarding paths need: id copied from the query, QR/AA set, the
/// given rcode, no records.
fn skeleton(query: &Message, question: &Question, rcode: u8) -> Message {
	let mut response = Message::new();
	response.id = query.id;
	response.qr = true;
	response.aa = true;
	response.rcode = rcode;
	response.question = Some(question.clone());
	response
}

fn send_response(socket: &UdpSocket, client: std::net::SocketAddr, response: &Message) {
	let bytes = response.to_bytes();

	match socket.send_to(&bytes, client) {
		Ok(n) if n == bytes.len() => {}
		Ok(n) => warn!("Partial send to {client}: {n} of {} bytes", bytes.len()),
		Err(e) => warn!("Failed to send response to {client}: {e}"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::net::Ipv4Addr;

	fn config() -> Config {
		Config {
			listen_port: 53,
			forward_dns: Ipv4Addr::new(127, 0, 0, 11),
			suffix_domain: ".docker".into(),
			gateway_name: "gateway".into(),
			container_name: "docker-dns".into(),
			keep_suffix: false,
			max_hops: 3,
			num_workers: 4,
			log_level: log::LevelFilter::Info,
		}
	}

	fn question(name: &str, qtype: u16) -> Question {
		Question { name: name.to_owned(), qtype, qclass: 1 }
	}

	#[test]
	fn non_suffix_name_is_refused() {
		let gateway = GatewayState::new();
		let query = Message::new();
		let q = question("example.com.", TYPE_A);
		let response = route(&config(), &gateway, &query, &q);
		assert_eq!(response.rcode, RCODE_REFUSED);
		assert!(response.qr);
		assert!(response.aa);
	}

	#[test]
	fn gateway_name_is_answered_locally() {
		let gateway = GatewayState::new();
		gateway.resolve().ok();
		let query = Message::new();
		let q = question("gateway.docker.", TYPE_A);
		let response = route(&config(), &gateway, &query, &q);
		assert_eq!(response.rcode, RCODE_NOERROR);
		assert!(response.aa);
	}

	#[test]
	fn unsupported_qtype_in_suffix_is_empty_noerror() {
		let gateway = GatewayState::new();
		let query = Message::new();
		let q = question("myapp.docker.", 15); // MX
		let response = route(&config(), &gateway, &query, &q);
		assert_eq!(response.rcode, RCODE_NOERROR);
		assert!(response.answers.is_empty());
	}

	#[test]
	fn loop_at_max_hops_is_refused_without_forwarding() {
		let gateway = GatewayState::new();
		let mut query = Message::new();
		loop_marker::add_loop_marker(&mut query, 3);
		let q = question("myapp.docker.", TYPE_A);
		let response = route(&config(), &gateway, &query, &q);
		assert_eq!(response.rcode, RCODE_SERVFAIL);
	}
}
