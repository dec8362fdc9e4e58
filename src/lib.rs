//! Gemini Server Library
//!
//! A single-host Gemini server: one request line in over TLS, one
//! status-coded response out, then the connection closes.

pub mod backend;
pub mod config;
pub mod gemini;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;
pub mod security;

pub use config::schema::ServerConfig;
pub use gemini::Server;
pub use lifecycle::Shutdown;
