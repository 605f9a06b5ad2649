//! Signal handlers for graceful termination

use tracing::{debug, warn};

use super::terminal::restore_terminal_state;
use crate::reconcile::StopFlag;

/// Install SIGINT/SIGTERM handling.
///
/// The first SIGINT sets `stop`: challenges already being applied finish, no
/// new ones start. A second SIGINT exits with 130, SIGTERM exits with 143.
pub fn setup_signal_handlers(stop: StopFlag) {
	tokio::spawn(async move {
		use tokio::signal;

		let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(stream) => stream,
			Err(e) => {
				warn!("Failed to setup SIGTERM handler: {}. Process will not handle SIGTERM gracefully.", e);
				return;
			}
		};

		let mut sigint = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
			Ok(stream) => stream,
			Err(e) => {
				warn!("Failed to setup SIGINT handler: {}. Process will not handle SIGINT gracefully.", e);
				return;
			}
		};

		loop {
			tokio::select! {
				_ = sigterm.recv() => {
					debug!("Received SIGTERM, exiting");
					restore_terminal_state();
					std::process::exit(143); // 128 + SIGTERM(15)
				}
				_ = sigint.recv() => {
					if stop.is_stopped() {
						debug!("Received second SIGINT, exiting");
						restore_terminal_state();
						std::process::exit(130); // 128 + SIGINT(2)
					}
					warn!("Interrupted: finishing challenges in progress (press Ctrl-C again to abort)");
					stop.stop();
				}
			}
		}
	});
}

// vim: ts=4
