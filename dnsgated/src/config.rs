//! CLI/environment configuration loading: the one piece of this daemon
//! that spec.md explicitly calls out as an external collaborator rather
//! than core behavior. Field names, env var names, and defaults mirror
//! the original C implementation's `config.c` 1:1; precedence (CLI flags
//! win over environment, which wins over these defaults) is the same
//! order `init_config_env` then `init_config_argc` apply it in, expressed
//! here as clap's built-in env fallback instead of two hand-rolled passes.

use std::net::Ipv4Addr;

use clap::Parser;
use engine::config::RawConfig;

#[derive(Parser, Debug)]
#[command(name = "dnsgated", about = "Suffix-routed DNS forwarder for container names")]
pub struct Cli {
	/// UDP port to listen on.
	#[arg(long = "port", env = "LISTEN_PORT", default_value_t = 53)]
	listen_port: u16,

	/// Upstream resolver queries are forwarded to.
	#[arg(long = "forward-dns", env = "FORWARD_DNS", default_value_t = Ipv4Addr::new(127, 0, 0, 11))]
	forward_dns: Ipv4Addr,

	/// Suffix that marks a name as ours to answer (e.g. `.docker`).
	#[arg(long = "suffix", env = "SUFFIX_DOMAIN", default_value = ".docker")]
	suffix_domain: String,

	/// Hostname (under the suffix) that resolves to the default gateway.
	/// Empty disables the synthesized gateway record entirely.
	#[arg(long = "gateway", env = "GATEWAY_NAME", default_value = "gateway")]
	gateway_name: String,

	/// Name used for the startup upstream-reachability probe.
	#[arg(long = "container", env = "CONTAINER_NAME", default_value = "docker-dns")]
	container_name: String,

	/// Forward the suffix along with the rest of the name instead of
	/// stripping it before querying upstream.
	#[arg(long = "keep-suffix", env = "KEEP_SUFFIX", default_value_t = false)]
	keep_suffix: bool,

	/// Maximum forwarding hops before a looping query is refused.
	#[arg(long = "max-hops", env = "MAX_HOPS", default_value_t = 3)]
	max_hops: u16,

	/// Size of the worker thread pool draining the request queue.
	#[arg(long = "workers", env = "NUM_WORKERS", default_value_t = 4)]
	num_workers: usize,

	/// Minimum log level: trace, debug, info, warn, or error.
	#[arg(long = "log-level", env = "LOG_LEVEL", default_value = "info")]
	log_level: String,
}

impl Cli {
	pub fn log_level(&self) -> Option<log::LevelFilter> {
		self.log_level.parse().ok()
	}

	pub fn into_raw(self) -> RawConfig {
		RawConfig {
			listen_port: self.listen_port,
			forward_dns: self.forward_dns,
			suffix_domain: self.suffix_domain,
			gateway_name: self.gateway_name,
			container_name: self.container_name,
			keep_suffix: self.keep_suffix,
			max_hops: self.max_hops,
			num_workers: self.num_workers,
			log_level: self.log_level().unwrap_or(log::LevelFilter::Info),
		}
	}
}
