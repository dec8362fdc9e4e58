//! Structured error logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once at startup
//! - Route diagnostics to stderr or to the configured error log file
//!
//! `RUST_LOG` takes precedence over the configured level.

use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::schema::{LogDestination, LoggingConfig};

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gemini_server={level},warn")))
}

/// Install the global subscriber.
pub fn init(config: &LoggingConfig) -> std::io::Result<()> {
    let filter = env_filter(&config.log_level);

    match config.error_log_destination() {
        LogDestination::File(path) => {
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}
