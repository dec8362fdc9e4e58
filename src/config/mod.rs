//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, absolute paths, CGI globs)
//!     → ServerConfig (validated, immutable)
//!     → shared via Arc to all connection tasks
//!
//! Per request:
//!     ServerConfig.defaults (UserConfig)
//!     → overlay.rs (walk doc root → requested path, merge .overlay files)
//!     → effective UserConfig (owned by the request, never shared)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Rule tables keep document order so the first match is well defined

pub mod loader;
pub mod ordered;
pub mod overlay;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use ordered::OrderedTable;
pub use schema::{DirectorySort, ServerConfig, UserConfig};
