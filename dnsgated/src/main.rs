mod config;

use std::net::UdpSocket;
use std::time::Duration;

use clap::Parser;
use engine::config::Config;
use engine::gateway::GatewayState;
use engine::server::Server;
use log::{error, info, warn};

fn main() {
	let cli = config::Cli::parse();

	let Some(log_level) = cli.log_level() else {
		eprintln!("invalid LOG_LEVEL/--log-level value");
		std::process::exit(1);
	};

	runtime::logger::init(log_level);
	runtime::signal::install();

	let raw = cli.into_raw();
	let config = match Config::new(raw) {
		Ok(config) => config,
		Err(()) => std::process::exit(1),
	};

	info!("Starting dnsgated: suffix={} forward_dns={}", config.suffix_domain, config.forward_dns);

	probe_upstream(&config);

	let gateway = GatewayState::new();
	match gateway.resolve() {
		Ok(addr) if config.gateway_name.is_empty() => info!("Gateway IP resolved to: {addr}"),
		Ok(addr) => info!("Gateway {}{} IP resolved to: {addr}", config.gateway_name, config.suffix_domain),
		Err(()) => warn!("Could not resolve default gateway at startup; will retry lazily"),
	}

	let server = match Server::bind(config, gateway) {
		Ok(server) => server,
		Err(()) => std::process::exit(1),
	};

	server.run(runtime::signal::stopping);

	info!("Shutting down");
}

/// Best-effort liveness probe: one A query for `container_name` against
/// upstream, purely to log whether the forward resolver looks reachable.
/// Does not gate startup and has no bearing on request handling.
fn probe_upstream(config: &Config) {
	let socket = match UdpSocket::bind(("0.0.0.0", 0)) {
		Ok(s) => s,
		Err(e) => {
			warn!("Forward DNS server may not be available: {e}");
			return;
		}
	};

	if let Err(e) = socket.connect((config.forward_dns, 53)) {
		warn!("Forward DNS server may not be available: {e}");
		return;
	}

	if socket.set_read_timeout(Some(Duration::from_secs(2))).is_err() {
		return;
	}

	let mut query = engine::wire::Message::new();
	query.id = 1;
	query.rd = true;
	query.question = Some(engine::wire::Question { name: format!("{}.", config.container_name), qtype: engine::wire::TYPE_A, qclass: engine::wire::CLASS_IN });

	if socket.send(&query.to_bytes()).is_err() {
		warn!("Forward DNS server may not be available");
		return;
	}

	let mut buf = [0u8; 4096];
	match socket.recv(&mut buf) {
		Ok(_) => info!("Forward DNS server at {} is reachable", config.forward_dns),
		Err(e) => {
			error!("Forward DNS server may not be available: {e}");
		}
	}
}
