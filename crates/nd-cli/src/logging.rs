//! Logging initialization for the CLI.
//!
//! Logging is owned by the CLI crate to keep the core library lightweight.
//! The `ND_LOG` environment variable selects the level (default `warn`).

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable selecting the log level.
pub const LOG_ENV: &str = "ND_LOG";

/// Initialize the tracing subscriber from `ND_LOG`.
///
/// # Panics
/// Panics if the subscriber is initialized twice.
pub fn init() {
    let level = std::env::var(LOG_ENV).unwrap_or_else(|_| "warn".to_string());
    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}
