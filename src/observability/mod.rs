//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events → stderr or error log file)
//!     → metrics.rs (counters, gauges)
//!
//! Connection tasks produce:
//!     → access_log.rs (one LogEntry per connection → bounded queue → writer task)
//! ```
//!
//! # Design Decisions
//! - Structured logging for machine parsing
//! - A single writer owns the access log file, entries keep emission order
//! - Metrics are cheap (atomic increments)

pub mod access_log;
pub mod logging;
pub mod metrics;

pub use access_log::{AccessLog, LogEntry};
