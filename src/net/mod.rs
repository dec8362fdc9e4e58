//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept)
//!     → connection.rs (id, in-flight tracking)
//!     → tls.rs (handshake, optional client certificate)
//!     → Hand off to gemini/handler.rs
//! ```
//!
//! # Design Decisions
//! - No connection cap: one task per accepted connection
//! - Each connection tracked for graceful shutdown
//! - TLS is mandatory; client certificates are requested, never required

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{ConnectionGuard, ConnectionTracker};
pub use listener::{Listener, ListenerError};
pub use tls::TlsError;
