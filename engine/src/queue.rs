//! The bounded request queue sitting between the listener thread and the
//! worker pool: a fixed-size ring buffer guarded by a `Mutex` + `Condvar`,
//! the same shape the original implementation's `queue.c` uses.
//!
//! Capacity is fixed, and a producer that outruns the workers overwrites
//! the oldest unread slot rather than blocking the listener -- the
//! listener's job is to keep draining `recvfrom` promptly, not to apply
//! backpressure to the network. This matches `queue.c`, which advances
//! its tail unconditionally and never blocks on enqueue.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

pub const CAPACITY: usize = 1024;
pub const MAX_DATAGRAM: usize = 4096;

/// One queued datagram: the bytes received plus who sent them.
pub struct RequestSlot {
	pub data: [u8; MAX_DATAGRAM],
	pub len: usize,
	pub client: SocketAddr,
}

impl RequestSlot {
	pub fn empty() -> Self {
		RequestSlot { data: [0; MAX_DATAGRAM], len: 0, client: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)) }
	}

	pub fn bytes(&self) -> &[u8] {
		&self.data[..self.len]
	}
}

struct Inner {
	slots: Vec<RequestSlot>,
	head: usize,
	tail: usize,
}

pub struct RequestQueue {
	inner: Mutex<Inner>,
	not_empty: Condvar,
	dropped_enqueues: AtomicU64,
}

impl RequestQueue {
	pub fn new() -> Self {
		let slots = (0..CAPACITY).map(|_| RequestSlot::empty()).collect();

		RequestQueue { inner: Mutex::new(Inner { slots, head: 0, tail: 0 }), not_empty: Condvar::new(), dropped_enqueues: AtomicU64::new(0) }
	}

	/// Enqueue `slot`, overwriting the oldest entry if the buffer is full.
	/// Never blocks.
	pub fn enqueue(&self, slot: RequestSlot) {
		let mut inner = self.inner.lock().unwrap();

		let tail = inner.tail;
		inner.slots[tail] = slot;
		let new_tail = (tail + 1) % CAPACITY;

		if new_tail == inner.head {
			inner.head = (inner.head + 1) % CAPACITY;
			self.dropped_enqueues.fetch_add(1, Ordering::Relaxed);
		}

		inner.tail = new_tail;
		drop(inner);
		self.not_empty.notify_one();
	}

	/// Block until a slot is available, then remove and return it.
	pub fn dequeue(&self) -> RequestSlot {
		let mut inner = self.inner.lock().unwrap();

		while inner.head == inner.tail {
			inner = self.not_empty.wait(inner).unwrap();
		}

		let head = inner.head;
		let slot = std::mem::replace(&mut inner.slots[head], RequestSlot::empty());
		inner.head = (head + 1) % CAPACITY;

		slot
	}

	/// Number of enqueues so far that overwrote a slot the workers had
	/// not yet drained.
	pub fn dropped_enqueues(&self) -> u64 {
		self.dropped_enqueues.load(Ordering::Relaxed)
	}
}

impl Default for RequestQueue {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn slot_with(byte: u8) -> RequestSlot {
		let mut slot = RequestSlot::empty();
		slot.data[0] = byte;
		slot.len = 1;
		slot
	}

	#[test]
	fn fifo_order_under_no_contention() {
		let queue = RequestQueue::new();
		queue.enqueue(slot_with(1));
		queue.enqueue(slot_with(2));

		assert_eq!(queue.dequeue().bytes(), &[1]);
		assert_eq!(queue.dequeue().bytes(), &[2]);
	}

	#[test]
	fn overfilling_drops_oldest_and_counts_it() {
		let queue = RequestQueue::new();

		for i in 0..CAPACITY + 5 {
			queue.enqueue(slot_with((i % 256) as u8));
		}

		// A ring buffer with no spare slot can only hold CAPACITY - 1
		// items before head/tail collide, so filling it and then adding
		// 5 more drops 6, not 5, and the oldest survivor is entry 6.
		assert_eq!(queue.dropped_enqueues(), 6);
		assert_eq!(queue.dequeue().bytes(), &[6]);
	}
}
