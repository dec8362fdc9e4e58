//! Backend dispatch decision.
//!
//! # Responsibilities
//! - Decide whether a request belongs to a CGI path or an SCGI application
//!
//! # Design Decisions
//! - CGI prefixes are compared against the logical filesystem path, by
//!   whole path components
//! - SCGI prefixes are compared against the URL path, first declared wins
//! - CGI is checked before SCGI

use std::path::{Path, PathBuf};

use crate::config::schema::BackendConfig;

/// Where a request is dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Run a CGI program found at or below `prefix`.
    Cgi { prefix: PathBuf },
    /// Forward to the SCGI application listening on `socket`.
    Scgi { prefix: String, socket: PathBuf },
}

/// Pick the backend for a request, if any.
pub fn select_backend(fs_path: &Path, url_path: &str, backends: &BackendConfig) -> Option<Dispatch> {
    if let Some(prefix) = backends
        .cgi_paths
        .iter()
        .find(|prefix| fs_path.starts_with(prefix))
    {
        return Some(Dispatch::Cgi {
            prefix: prefix.clone(),
        });
    }

    backends
        .scgi
        .iter()
        .find(|(prefix, _)| url_path.starts_with(prefix))
        .map(|(prefix, socket)| Dispatch::Scgi {
            prefix: prefix.to_string(),
            socket: socket.clone(),
        })
}
