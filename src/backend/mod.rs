//! Dynamic content backends.
//!
//! # Data Flow
//! ```text
//! Dispatch decision (routing/dispatch.rs)
//!     → GatewayRequest (request URL, peer, client certificate)
//!     → gateway_variables() (CGI-style environment)
//!     → cgi.rs (spawn program, collect stdout)
//!       or scgi.rs (netstring headers over a Unix socket)
//!     → parse_response() → BackendResponse
//! ```
//!
//! # Design Decisions
//! - The backend's header line is validated, then re-serialized by the server
//! - Any failure to produce a valid header is a DispatchError, mapped to a
//!   temporary failure by the handler
//! - Backends see no request body; Gemini requests have none

pub mod cgi;
pub mod scgi;

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use crate::config::ServerConfig;
use crate::observability::metrics;
use crate::routing::Dispatch;
use crate::security::cert_zone::ClientCertificate;

/// Reported as SERVER_SOFTWARE.
pub const SERVER_SOFTWARE: &str = concat!("gemini-server/", env!("CARGO_PKG_VERSION"));

/// A validated response produced by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendResponse {
    pub code: u8,
    pub meta: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no executable script found below {0}")]
    ScriptNotFound(PathBuf),

    #[error("failed to start {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} did not finish within {secs}s")]
    Timeout { path: PathBuf, secs: u64 },

    #[error("{path} exited with {status}")]
    ExitStatus {
        path: PathBuf,
        status: std::process::ExitStatus,
    },

    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid backend response header: {0}")]
    InvalidHeader(String),

    #[error("SCGI is not supported on this platform")]
    Unsupported,
}

/// Split a raw backend reply into a validated header and body.
///
/// The header is two digits, the first in `1..=6`, optionally followed by a
/// space and meta text, terminated by CRLF (a bare LF is tolerated).
pub fn parse_response(output: &[u8]) -> Result<BackendResponse, DispatchError> {
    let newline = output
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| DispatchError::InvalidHeader("missing header line".into()))?;
    let (line, body) = (&output[..newline], &output[newline + 1..]);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let line = std::str::from_utf8(line)
        .map_err(|_| DispatchError::InvalidHeader("header is not UTF-8".into()))?;

    let (code, meta) = match line.split_once(' ') {
        Some((code, meta)) => (code, meta),
        None => (line, ""),
    };
    let digits = code.as_bytes();
    if digits.len() != 2
        || !digits.iter().all(u8::is_ascii_digit)
        || !(b'1'..=b'6').contains(&digits[0])
    {
        return Err(DispatchError::InvalidHeader(format!("bad status {code:?}")));
    }
    let code = (digits[0] - b'0') * 10 + (digits[1] - b'0');

    Ok(BackendResponse {
        code,
        meta: meta.to_string(),
        body: body.to_vec(),
    })
}

/// What a backend needs to know about the request.
#[derive(Debug, Clone)]
pub struct GatewayRequest<'a> {
    pub url: &'a Url,
    pub remote_addr: IpAddr,
    pub client_cert: Option<&'a ClientCertificate>,
    /// Logical filesystem path of the request.
    pub fs_path: PathBuf,
    /// Decoded URL path of the request.
    pub url_path: String,
}

/// Build the CGI-style variables shared by CGI and SCGI.
pub fn gateway_variables(
    request: &GatewayRequest<'_>,
    config: &ServerConfig,
    script_path: &str,
    path_info: &str,
) -> Vec<(String, String)> {
    let mut vars = vec![
        ("GATEWAY_INTERFACE", "CGI/1.1".to_string()),
        ("GEMINI_URL", request.url.to_string()),
        ("PATH_INFO", path_info.to_string()),
        ("QUERY_STRING", request.url.query().unwrap_or("").to_string()),
        ("REMOTE_ADDR", request.remote_addr.to_string()),
        ("REMOTE_HOST", request.remote_addr.to_string()),
        ("SCRIPT_PATH", script_path.to_string()),
        ("SERVER_NAME", config.server.hostname.clone()),
        ("SERVER_PORT", config.server.port.to_string()),
        ("SERVER_PROTOCOL", "GEMINI".to_string()),
        ("SERVER_SOFTWARE", SERVER_SOFTWARE.to_string()),
    ];
    if let Some(cert) = request.client_cert {
        vars.push(("AUTH_TYPE", "Certificate".to_string()));
        vars.push(("TLS_CLIENT_HASH", cert.fingerprint.clone()));
        vars.push(("TLS_CLIENT_SUBJECT", cert.subject.clone()));
        vars.push(("REMOTE_USER", cert.subject.clone()));
    }
    vars.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Runs dispatch decisions against the configured backends.
#[derive(Clone)]
pub struct Dispatcher {
    config: Arc<ServerConfig>,
}

impl Dispatcher {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self { config }
    }

    pub async fn dispatch(
        &self,
        target: &Dispatch,
        request: &GatewayRequest<'_>,
    ) -> Result<BackendResponse, DispatchError> {
        match target {
            Dispatch::Cgi { prefix } => {
                metrics::record_dispatch("cgi");
                let script = cgi::locate_script(prefix, &request.fs_path)
                    .ok_or_else(|| DispatchError::ScriptNotFound(prefix.clone()))?;
                let script_path = request
                    .url_path
                    .strip_suffix(script.path_info.as_str())
                    .unwrap_or(&request.url_path);
                let vars = gateway_variables(request, &self.config, script_path, &script.path_info);
                cgi::run(&script.program, &vars).await
            }
            Dispatch::Scgi { prefix, socket } => {
                metrics::record_dispatch("scgi");
                let path_info = request.url_path.strip_prefix(prefix.as_str()).unwrap_or("");
                let vars = gateway_variables(request, &self.config, prefix, path_info);
                scgi::run(socket, &vars).await
            }
        }
    }
}
