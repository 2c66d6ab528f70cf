//! The forwarding-loop guard: a private EDNS0 option carrying a hop count,
//! added to every query this daemon forwards upstream. If it ever comes
//! back around to this daemon with a count at or above the configured
//! limit, the query is refused instead of forwarded again.

use crate::wire::Message;

/// Private EDNS0 option code carrying the hop counter. Chosen out of the
/// "local/experimental use" range; it never leaves this daemon's control
/// since replies never carry it back to the client.
pub const OPTION_CODE: u16 = 65001;

/// Current hop count, or 0 if the message carries no marker at all.
pub fn get_loop_marker(msg: &Message) -> u16 {
	msg.edns
		.as_ref()
		.and_then(|edns| edns.get(OPTION_CODE))
		.filter(|data| data.len() == 2)
		.map(|data| u16::from_be_bytes([data[0], data[1]]))
		.unwrap_or(0)
}

/// Set (or replace in place) the hop-count option, ensuring an EDNS0 OPT
/// record with UDP size 4096 / version 0 exists first.
pub fn add_loop_marker(msg: &mut Message, hops: u16) {
	msg.ensure_edns(4096, 0);
	msg.edns.as_mut().unwrap().set(OPTION_CODE, hops.to_be_bytes().to_vec());
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn missing_marker_reads_as_zero() {
		let msg = Message::new();
		assert_eq!(get_loop_marker(&msg), 0);
	}

	#[test]
	fn set_then_get_round_trips() {
		let mut msg = Message::new();
		add_loop_marker(&mut msg, 1);
		assert_eq!(get_loop_marker(&msg), 1);
	}

	#[test]
	fn adding_again_replaces_in_place_rather_than_duplicating() {
		let mut msg = Message::new();
		add_loop_marker(&mut msg, 1);
		add_loop_marker(&mut msg, 2);

		assert_eq!(get_loop_marker(&msg), 2);
		assert_eq!(msg.edns.unwrap().options.len(), 1);
	}
}
