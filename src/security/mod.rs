//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming connection:
//!     → rate_limit.rs (per-address leaky bucket, bans)
//!
//! Parsed request:
//!     → cert_zone.rs (client certificate validity, zone membership)
//!     → path_guard.rs (logical path, symlink escape, deny-list)
//!
//! Startup:
//!     → confinement.rs (drop privileges once, before accepting)
//! ```
//!
//! # Design Decisions
//! - Defense in depth: lexical checks first, filesystem checks last
//! - Fail closed: any resolution failure is reported as "not found"
//! - No trust in client input

pub mod cert_zone;
pub mod confinement;
pub mod path_guard;
pub mod rate_limit;

pub use cert_zone::{ClientCertificate, ZoneDecision};
pub use confinement::{platform_confinement, Confinement, ConfinementError};
pub use path_guard::{PathGuard, ResolveError};
pub use rate_limit::{Admission, RateLimiter};
