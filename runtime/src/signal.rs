use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;

/// Process-wide shutdown flag, flipped by [`install`] on SIGINT/SIGTERM.
///
/// This is the one piece of global mutable state the listener loop polls;
/// workers never look at it and are left detached, matching the "workers
/// are detached, the process exits without draining them" contract.
static STOP: AtomicBool = AtomicBool::new(false);

/// Install a Ctrl-C/SIGTERM handler that flips [`STOP`].
///
/// Idempotent to call more than once is not supported -- call it exactly
/// once, early in `main`.
pub fn install() {
	ctrlc::set_handler(|| {
		debug!("Received shutdown signal");
		STOP.store(true, Ordering::Relaxed);
	})
	.expect("failed to install signal handler");
}

/// Whether a shutdown has been requested.
pub fn stopping() -> bool {
	STOP.load(Ordering::Relaxed)
}
