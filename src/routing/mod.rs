//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Request path + effective UserConfig
//!     → redirect.rs (temporary rules, then permanent rules)
//!     → dispatch.rs (CGI prefix, then SCGI prefix)
//!     → Return: redirect, backend, or static serving
//! ```
//!
//! # Design Decisions
//! - Rules are evaluated per request against the overlay-resolved config
//! - Deterministic: rule tables keep declaration order
//! - First match wins

pub mod dispatch;
pub mod redirect;

pub use dispatch::{select_backend, Dispatch};
pub use redirect::{check_redirects, Redirect};
