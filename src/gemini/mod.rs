//! Gemini protocol subsystem.
//!
//! # Data Flow
//! ```text
//! server.rs (accept, spawn, TLS handshake)
//!     → handler.rs (per-connection pipeline)
//!         → request.rs (bounded line read, URL parse)
//!         → listing.rs / mime.rs (static content)
//!         → response.rs (status line + body)
//! ```
//!
//! # Design Decisions
//! - One request per connection, the connection closes after the response
//! - Status codes are a closed enum; backend statuses pass through as numbers

pub mod handler;
pub mod listing;
pub mod mime;
pub mod request;
pub mod response;
pub mod server;
pub mod status;

pub use handler::{handle_connection, Peer, ServerState};
pub use response::Response;
pub use server::Server;
pub use status::Status;
