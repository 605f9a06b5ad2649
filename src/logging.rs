//! Logging prelude module for convenient access to tracing macros.
//!
//! ```ignore
//! use crate::logging::*;
//!
//! info!("Discovered {} challenges", count);
//! debug!(challenge = %slug, "fetching remote state");
//! ```

pub use tracing::{debug, error, info, warn};

/// Initialize the tracing subscriber with environment filter support.
///
/// By default, logs at INFO level and above are displayed (DEBUG with
/// `verbose`, which also shows the emitting module). `RUST_LOG` overrides
/// the level:
///
/// ```bash
/// RUST_LOG=chalsync=debug chalsync deploy
/// RUST_LOG=chalsync::reconcile=trace,chalsync::remote=debug chalsync deploy
/// ```
pub fn init_tracing(verbose: bool) {
	let default_level = if verbose { "debug" } else { "info" };
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
		)
		.with_target(verbose)
		.with_writer(std::io::stderr)
		.init();
}
