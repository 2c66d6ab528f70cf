//! In-core configuration: the data model from the spec, plus the range
//! checks and normalization that make it safe for the rest of `engine` to
//! treat as immutable truth. Sourcing the raw values from the environment
//! and `argv` is the binary crate's job, not this one's.

use std::net::Ipv4Addr;

use log::error;
use utils::error::Result;

#[derive(Debug, Clone)]
pub struct Config {
	pub listen_port: u16,
	pub forward_dns: Ipv4Addr,
	pub suffix_domain: String,
	pub gateway_name: String,
	pub container_name: String,
	pub keep_suffix: bool,
	pub max_hops: u16,
	pub num_workers: usize,
	pub log_level: log::LevelFilter,
}

/// Raw, unvalidated field values, typically parsed straight out of
/// environment variables or CLI flags.
pub struct RawConfig {
	pub listen_port: u16,
	pub forward_dns: Ipv4Addr,
	pub suffix_domain: String,
	pub gateway_name: String,
	pub container_name: String,
	pub keep_suffix: bool,
	pub max_hops: u16,
	pub num_workers: usize,
	pub log_level: log::LevelFilter,
}

impl Config {
	/// Validate and normalize a [`RawConfig`]. Fatal misconfiguration (an
	/// out-of-range port, hop limit, or worker count) is logged here and
	/// reported as `Err(())`; the caller's job is just to exit(1).
	pub fn new(raw: RawConfig) -> Result<Config> {
		if raw.listen_port == 0 {
			error!("LISTEN_PORT must be in 1..=65535, got 0");
			return Err(());
		}

		if !(1..=10).contains(&raw.max_hops) {
			error!("MAX_HOPS must be in 1..=10, got {}", raw.max_hops);
			return Err(());
		}

		if !(1..=10).contains(&raw.num_workers) {
			error!("NUM_WORKERS must be in 1..=10, got {}", raw.num_workers);
			return Err(());
		}

		let mut suffix_domain = raw.suffix_domain;
		if !suffix_domain.starts_with('.') {
			suffix_domain.insert(0, '.');
		}

		Ok(Config {
			listen_port: raw.listen_port,
			forward_dns: raw.forward_dns,
			suffix_domain,
			gateway_name: raw.gateway_name,
			container_name: raw.container_name,
			keep_suffix: raw.keep_suffix,
			max_hops: raw.max_hops,
			num_workers: raw.num_workers,
			log_level: raw.log_level,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn raw() -> RawConfig {
		RawConfig {
			listen_port: 53,
			forward_dns: Ipv4Addr::new(127, 0, 0, 11),
			suffix_domain: "docker".into(),
			gateway_name: "gateway".into(),
			container_name: "docker-dns".into(),
			keep_suffix: false,
			max_hops: 3,
			num_workers: 4,
			log_level: log::LevelFilter::Info,
		}
	}

	#[test]
	fn normalizes_suffix_domain_leading_dot() {
		let config = Config::new(raw()).unwrap();
		assert_eq!(config.suffix_domain, ".docker");
	}

	#[test]
	fn leaves_already_dotted_suffix_alone() {
		let mut r = raw();
		r.suffix_domain = ".docker".into();
		let config = Config::new(r).unwrap();
		assert_eq!(config.suffix_domain, ".docker");
	}

	#[test]
	fn rejects_out_of_range_values() {
		let mut r = raw();
		r.listen_port = 0;
		assert!(Config::new(r).is_err());

		let mut r = raw();
		r.max_hops = 0;
		assert!(Config::new(r).is_err());

		let mut r = raw();
		r.num_workers = 11;
		assert!(Config::new(r).is_err());
	}
}
