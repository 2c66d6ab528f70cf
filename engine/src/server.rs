//! Wires the listener socket, the request queue, and the fixed worker pool
//! together: one thread does nothing but `recv_from` and enqueue, a pool
//! of worker threads does nothing but dequeue and process.
//!
//! Grounded on the same listener/worker split the original implementation
//! uses in `main.c` (a single `recvfrom` loop feeding a pthread pool
//! draining a shared queue), adapted to `std::thread` since the cooperative
//! reactor the teacher project builds on has no notion of blocking OS
//! threads at all.

use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use utils::error::Result;

use crate::config::Config;
use crate::gateway::GatewayState;
use crate::queue::{RequestQueue, RequestSlot, MAX_DATAGRAM};
use crate::query;

const RECV_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Server {
	config: Arc<Config>,
	gateway: Arc<GatewayState>,
	socket: Arc<UdpSocket>,
	queue: Arc<RequestQueue>,
}

impl Server {
	/// Bind the listening socket with `SO_REUSEADDR` set (so a quick
	/// restart doesn't fail with "address in use" while the old socket
	/// drains) and a 1-second receive timeout, so the listener loop can
	/// poll the shutdown flag instead of blocking forever.
	pub fn bind(config: Config, gateway: GatewayState) -> Result<Server> {
		let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(|e| error!("Failed to create socket: {e}"))?;

		socket.set_reuse_address(true).map_err(|e| error!("Failed to set SO_REUSEADDR: {e}"))?;

		let addr = std::net::SocketAddr::V4(std::net::SocketAddrV4::new(std::net::Ipv4Addr::UNSPECIFIED, config.listen_port));
		socket.bind(&addr.into()).map_err(|e| error!("Failed to bind to port {}: {e}", config.listen_port))?;

		socket.set_read_timeout(Some(RECV_TIMEOUT)).map_err(|e| error!("Failed to set receive timeout: {e}"))?;

		Ok(Server {
			config: Arc::new(config),
			gateway: Arc::new(gateway),
			socket: Arc::new(socket.into()),
			queue: Arc::new(RequestQueue::new()),
		})
	}

	/// Spawn the worker pool (detached -- they run until the process
	/// exits, with no join and no cooperation with shutdown) and then run
	/// the listener loop on the calling thread until `stop` reports a
	/// shutdown request.
	pub fn run(&self, stop: impl Fn() -> bool) {
		for id in 0..self.config.num_workers {
			let config = Arc::clone(&self.config);
			let gateway = Arc::clone(&self.gateway);
			let socket = Arc::clone(&self.socket);
			let queue = Arc::clone(&self.queue);

			let spawned = std::thread::Builder::new().name(format!("dnsgate-worker-{id}")).spawn(move || worker_loop(config, gateway, socket, queue));

			if let Err(e) = spawned {
				error!("Failed to spawn worker {id}: {e}");
			}
		}

		info!("Listening on 0.0.0.0:{} with {} workers", self.config.listen_port, self.config.num_workers);
		self.listen(stop);
	}

	fn listen(&self, stop: impl Fn() -> bool) {
		let mut buf = [0u8; MAX_DATAGRAM];

		while !stop() {
			match self.socket.recv_from(&mut buf) {
				Ok((len, client)) => {
					let mut slot = RequestSlot::empty();
					slot.data[..len].copy_from_slice(&buf[..len]);
					slot.len = len;
					slot.client = client;
					self.queue.enqueue(slot);
				}
				Err(e) if is_recoverable(&e) => continue,
				Err(e) => {
					error!("Listener socket error, stopping: {e}");
					break;
				}
			}
		}

		warn!("Listener loop exiting");
	}
}

fn worker_loop(config: Arc<Config>, gateway: Arc<GatewayState>, socket: Arc<UdpSocket>, queue: Arc<RequestQueue>) {
	loop {
		let slot = queue.dequeue();
		query::handle(&config, &gateway, &socket, slot.bytes(), slot.client);
	}
}

fn is_recoverable(e: &std::io::Error) -> bool {
	matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted)
}
