//! A minimal DNS message codec: just enough of RFC 1035 + RFC 6891 (EDNS0)
//! to parse a query, parse an upstream reply, and serialize a response.
//!
//! This plays the role the teacher's `net::dns` module plays for its DNS
//! client (a hand-rolled wire struct, not a general-purpose library): it
//! understands headers, one question, generic resource records, and the
//! private EDNS0 OPT pseudo-record, and nothing else. Authority/additional
//! RR rdata is carried as opaque bytes rather than being decompressed --
//! name compression pointers embedded inside rdata (SOA, NS, CNAME) are not
//! followed, which is harmless here because the upstream this daemon talks
//! to only ever answers A/AAAA queries with plain address rdata.

use std::net::Ipv4Addr;

use log::warn;
use utils::error::*;

pub const TYPE_A: u16 = 1;
pub const TYPE_AAAA: u16 = 28;
pub const TYPE_OPT: u16 = 41;
pub const CLASS_IN: u16 = 1;

pub const RCODE_NOERROR: u8 = 0;
pub const RCODE_SERVFAIL: u8 = 2;
pub const RCODE_REFUSED: u8 = 5;

const HEADER_LEN: usize = 12;
const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_POINTERS: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
	pub name: String,
	pub qtype: u16,
	pub qclass: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
	pub name: String,
	pub rtype: u16,
	pub rclass: u16,
	pub ttl: u32,
	pub rdata: Vec<u8>,
}

impl Record {
	pub fn a(name: impl Into<String>, ttl: u32, addr: Ipv4Addr) -> Self {
		Record { name: name.into(), rtype: TYPE_A, rclass: CLASS_IN, ttl, rdata: addr.octets().to_vec() }
	}
}

/// A parsed EDNS0 OPT pseudo-record, minus the handful of fields (flags,
/// extended rcode) this daemon never inspects or sets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Edns {
	pub udp_size: u16,
	pub version: u8,
	pub options: Vec<(u16, Vec<u8>)>,
}

impl Edns {
	pub fn get(&self, code: u16) -> Option<&[u8]> {
		self.options.iter().find(|(c, _)| *c == code).map(|(_, data)| data.as_slice())
	}

	pub fn set(&mut self, code: u16, data: Vec<u8>) {
		match self.options.iter_mut().find(|(c, _)| *c == code) {
			Some(entry) => entry.1 = data,
			None => self.options.push((code, data)),
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct Message {
	pub id: u16,
	pub qr: bool,
	pub opcode: u8,
	pub aa: bool,
	pub tc: bool,
	pub rd: bool,
	pub ra: bool,
	pub rcode: u8,
	pub question: Option<Question>,
	pub answers: Vec<Record>,
	pub authority: Vec<Record>,
	pub additional: Vec<Record>,
	pub edns: Option<Edns>,
}

impl Message {
	/// A fresh query/response skeleton with no question and no records.
	pub fn new() -> Self {
		Self::default()
	}

	pub fn parse(buf: &[u8]) -> Result<Self> {
		if buf.len() < HEADER_LEN {
			warn!("DNS message shorter than header ({} bytes)", buf.len());
			return Err(());
		}

		let id = read_u16(buf, 0);
		let flags = read_u16(buf, 2);
		let qdcount = read_u16(buf, 4);
		let ancount = read_u16(buf, 6);
		let nscount = read_u16(buf, 8);
		let arcount = read_u16(buf, 10);

		let qr = flags & 0x8000 != 0;
		let opcode = ((flags >> 11) & 0xF) as u8;
		let aa = flags & 0x0400 != 0;
		let tc = flags & 0x0200 != 0;
		let rd = flags & 0x0100 != 0;
		let ra = flags & 0x0080 != 0;
		let rcode = (flags & 0xF) as u8;

		let mut pos = HEADER_LEN;

		let mut question = None;

		for i in 0..qdcount {
			let name = decode_name(buf, &mut pos)?;

			if pos + 4 > buf.len() {
				warn!("Truncated question section");
				return Err(());
			}

			let qtype = read_u16(buf, pos);
			let qclass = read_u16(buf, pos + 2);
			pos += 4;

			if i == 0 {
				question = Some(Question { name, qtype, qclass });
			}
		}

		let answers = decode_records(buf, &mut pos, ancount)?;
		let authority = decode_records(buf, &mut pos, nscount)?;
		let raw_additional = decode_records(buf, &mut pos, arcount)?;

		let mut additional = Vec::with_capacity(raw_additional.len());
		let mut edns = None;

		for rr in raw_additional {
			if rr.rtype == TYPE_OPT {
				edns = Some(decode_edns(&rr));
			} else {
				additional.push(rr);
			}
		}

		Ok(Message { id, qr, opcode, aa, tc, rd, ra, rcode, question, answers, authority, additional, edns })
	}

	pub fn to_bytes(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(512);

		out.extend_from_slice(&self.id.to_be_bytes());

		let mut flags: u16 = 0;
		flags |= (self.qr as u16) << 15;
		flags |= (self.opcode as u16 & 0xF) << 11;
		flags |= (self.aa as u16) << 10;
		flags |= (self.tc as u16) << 9;
		flags |= (self.rd as u16) << 8;
		flags |= (self.ra as u16) << 7;
		flags |= self.rcode as u16 & 0xF;
		out.extend_from_slice(&flags.to_be_bytes());

		out.extend_from_slice(&(self.question.is_some() as u16).to_be_bytes());
		out.extend_from_slice(&(self.answers.len() as u16).to_be_bytes());
		out.extend_from_slice(&(self.authority.len() as u16).to_be_bytes());

		let arcount = self.additional.len() + self.edns.is_some() as usize;
		out.extend_from_slice(&(arcount as u16).to_be_bytes());

		if let Some(q) = &self.question {
			encode_name(&q.name, &mut out);
			out.extend_from_slice(&q.qtype.to_be_bytes());
			out.extend_from_slice(&q.qclass.to_be_bytes());
		}

		for rr in &self.answers {
			encode_record(rr, &mut out);
		}

		for rr in &self.authority {
			encode_record(rr, &mut out);
		}

		for rr in &self.additional {
			encode_record(rr, &mut out);
		}

		if let Some(edns) = &self.edns {
			encode_edns(edns, &mut out);
		}

		out
	}

	/// Ensure an OPT record exists with the given UDP size/version,
	/// preserving any options already present.
	pub fn ensure_edns(&mut self, udp_size: u16, version: u8) {
		let edns = self.edns.get_or_insert_with(Edns::default);
		edns.udp_size = udp_size;
		edns.version = version;
	}
}

fn decode_records(buf: &[u8], pos: &mut usize, count: u16) -> Result<Vec<Record>> {
	let mut records = Vec::with_capacity(count as usize);

	for _ in 0..count {
		let name = decode_name(buf, pos)?;

		if *pos + 10 > buf.len() {
			warn!("Truncated resource record");
			return Err(());
		}

		let rtype = read_u16(buf, *pos);
		let rclass = read_u16(buf, *pos + 2);
		let ttl = read_u32(buf, *pos + 4);
		let rdlength = read_u16(buf, *pos + 8) as usize;
		*pos += 10;

		if *pos + rdlength > buf.len() {
			warn!("Resource record rdata runs past end of message");
			return Err(());
		}

		let rdata = buf[*pos..*pos + rdlength].to_vec();
		*pos += rdlength;

		records.push(Record { name, rtype, rclass, ttl, rdata });
	}

	Ok(records)
}

fn decode_edns(rr: &Record) -> Edns {
	let udp_size = rr.rclass;
	let version = ((rr.ttl >> 16) & 0xFF) as u8;

	let mut options = Vec::new();
	let mut pos = 0;

	while pos + 4 <= rr.rdata.len() {
		let code = u16::from_be_bytes([rr.rdata[pos], rr.rdata[pos + 1]]);
		let len = u16::from_be_bytes([rr.rdata[pos + 2], rr.rdata[pos + 3]]) as usize;
		pos += 4;

		if pos + len > rr.rdata.len() {
			break;
		}

		options.push((code, rr.rdata[pos..pos + len].to_vec()));
		pos += len;
	}

	Edns { udp_size, version, options }
}

fn encode_edns(edns: &Edns, out: &mut Vec<u8>) {
	out.push(0); // root name
	out.extend_from_slice(&TYPE_OPT.to_be_bytes());
	out.extend_from_slice(&edns.udp_size.to_be_bytes());

	let ttl = (edns.version as u32) << 16;
	out.extend_from_slice(&ttl.to_be_bytes());

	let mut rdata = Vec::new();
	for (code, data) in &edns.options {
		rdata.extend_from_slice(&code.to_be_bytes());
		rdata.extend_from_slice(&(data.len() as u16).to_be_bytes());
		rdata.extend_from_slice(data);
	}

	out.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
	out.extend_from_slice(&rdata);
}

fn encode_record(rr: &Record, out: &mut Vec<u8>) {
	encode_name(&rr.name, out);
	out.extend_from_slice(&rr.rtype.to_be_bytes());
	out.extend_from_slice(&rr.rclass.to_be_bytes());
	out.extend_from_slice(&rr.ttl.to_be_bytes());
	out.extend_from_slice(&(rr.rdata.len() as u16).to_be_bytes());
	out.extend_from_slice(&rr.rdata);
}

/// Encode a dotted name (with or without a trailing dot) as a sequence of
/// length-prefixed labels terminated by a zero octet. Never emits a
/// compression pointer -- simpler, and the handful of bytes it costs don't
/// matter at this message size.
fn encode_name(name: &str, out: &mut Vec<u8>) {
	let trimmed = name.strip_suffix('.').unwrap_or(name);

	if trimmed.is_empty() {
		out.push(0);
		return;
	}

	for label in trimmed.split('.') {
		let bytes = label.as_bytes();
		let len = bytes.len().min(MAX_LABEL_LEN) as u8;
		out.push(len);
		out.extend_from_slice(&bytes[..len as usize]);
	}

	out.push(0);
}

/// Decode a name starting at `*pos`, following at most one level of
/// compression-pointer indirection per hop (guarded by
/// [`MAX_NAME_POINTERS`] against pointer loops), advancing `*pos` past the
/// name as it appears in the message (i.e. past the first pointer, not past
/// wherever the pointer led).
fn decode_name(buf: &[u8], pos: &mut usize) -> Result<String> {
	let mut labels: Vec<String> = Vec::new();
	let mut cursor = *pos;
	let mut jumps = 0;
	let mut end_pos = None;

	loop {
		let Some(&len) = buf.get(cursor) else {
			warn!("Name runs past end of message");
			return Err(());
		};

		if len == 0 {
			cursor += 1;
			if end_pos.is_none() {
				end_pos = Some(cursor);
			}
			break;
		}

		match len >> 6 {
			0b00 => {
				let len = len as usize;
				let start = cursor + 1;
				let end = start + len;

				if end > buf.len() {
					warn!("Truncated label");
					return Err(());
				}

				let label = std::str::from_utf8(&buf[start..end]).map_err(|_| warn!("Non-UTF8 label"))?;
				labels.push(label.to_owned());
				cursor = end;
			}
			0b11 => {
				if cursor + 1 >= buf.len() {
					warn!("Truncated compression pointer");
					return Err(());
				}

				let pointer = (((len as usize) & 0x3F) << 8) | buf[cursor + 1] as usize;

				if end_pos.is_none() {
					end_pos = Some(cursor + 2);
				}

				jumps += 1;
				if jumps > MAX_NAME_POINTERS || pointer >= cursor {
					warn!("Invalid or looping compression pointer");
					return Err(());
				}

				cursor = pointer;
			}
			_ => {
				warn!("Reserved label length bits set");
				return Err(());
			}
		}
	}

	*pos = end_pos.unwrap_or(cursor);

	if labels.is_empty() {
		Ok(".".to_owned())
	} else {
		let mut name = labels.join(".");
		name.push('.');
		Ok(name)
	}
}

fn read_u16(buf: &[u8], pos: usize) -> u16 {
	u16::from_be_bytes([buf[pos], buf[pos + 1]])
}

fn read_u32(buf: &[u8], pos: usize) -> u32 {
	u32::from_be_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]])
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn name_round_trip() {
		let mut out = Vec::new();
		encode_name("myapp.docker.", &mut out);
		out.extend_from_slice(&TYPE_A.to_be_bytes());
		out.extend_from_slice(&CLASS_IN.to_be_bytes());

		let mut pos = 0;
		let name = decode_name(&out, &mut pos).unwrap();
		assert_eq!(name, "myapp.docker.");
		assert_eq!(pos, out.len() - 4);
	}

	#[test]
	fn root_name_round_trip() {
		let mut out = Vec::new();
		encode_name(".", &mut out);
		assert_eq!(out, vec![0]);

		let mut pos = 0;
		assert_eq!(decode_name(&out, &mut pos).unwrap(), ".");
	}

	#[test]
	fn message_round_trip_with_edns() {
		let mut msg = Message::new();
		msg.id = 0x1234;
		msg.qr = true;
		msg.aa = true;
		msg.rcode = RCODE_NOERROR;
		msg.question = Some(Question { name: "myapp.docker.".into(), qtype: TYPE_A, qclass: CLASS_IN });
		msg.answers.push(Record::a("myapp.docker.", 60, Ipv4Addr::new(10, 0, 0, 5)));
		msg.ensure_edns(4096, 0);
		msg.edns.as_mut().unwrap().set(65001, vec![0, 1]);

		let bytes = msg.to_bytes();
		let parsed = Message::parse(&bytes).unwrap();

		assert_eq!(parsed.id, 0x1234);
		assert!(parsed.qr);
		assert_eq!(parsed.rcode, RCODE_NOERROR);
		assert_eq!(parsed.question.unwrap().name, "myapp.docker.");
		assert_eq!(parsed.answers.len(), 1);
		assert_eq!(parsed.answers[0].rdata, Ipv4Addr::new(10, 0, 0, 5).octets());
		assert_eq!(parsed.edns.unwrap().get(65001), Some(&[0, 1][..]));
	}

	#[test]
	fn decode_name_rejects_pointer_loop() {
		// A pointer at offset 0 pointing at itself.
		let buf = [0xC0, 0x00];
		let mut pos = 0;
		assert!(decode_name(&buf, &mut pos).is_err());
	}

	#[test]
	fn parse_rejects_short_buffer() {
		assert!(Message::parse(&[0, 1, 2]).is_err());
	}
}
