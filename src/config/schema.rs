//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::ordered::OrderedTable;

/// Root configuration for the server.
///
/// Built once at startup and shared read-only by every connection task.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Hostname, port and document tree.
    pub server: SiteConfig,

    /// TLS material.
    pub tls: TlsConfig,

    /// Error log, access log and metrics settings.
    pub logging: LoggingConfig,

    /// Abuse rate limiting.
    pub rate_limit: RateLimitConfig,

    /// CGI and SCGI dispatch.
    pub backends: BackendConfig,

    /// Process confinement.
    pub security: SecurityConfig,

    /// Default per-request settings, overridable by overlay files.
    pub defaults: UserConfig,
}

/// Site identity and document tree.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Hostname requests must name.
    pub hostname: String,

    /// Port requests must name (when they name one) and the port to bind.
    pub port: u16,

    /// Interface address to bind (e.g., "0.0.0.0").
    pub bind_address: String,

    /// Root of the served document tree.
    pub doc_root: PathBuf,

    /// Subdirectory of `doc_root` holding `/~user` trees.
    pub home_doc_root: PathBuf,

    /// Read `.overlay` files while resolving each request.
    pub read_overlays: bool,

    /// Maximum request line length in bytes, excluding the line terminator.
    pub max_request_len: usize,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: 1965,
            bind_address: "0.0.0.0".to_string(),
            doc_root: PathBuf::from("/var/gemini"),
            home_doc_root: PathBuf::from("users"),
            read_overlays: false,
            max_request_len: 1024,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,

    /// Accept TLS 1.2 clients; TLS 1.3 only when false.
    pub allow_tls12: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_path: PathBuf::from("cert.pem"),
            key_path: PathBuf::from("key.pem"),
            allow_tls12: true,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Access log file. "-" writes to stdout, "" disables the access log.
    pub access_log: String,

    /// Error log file. "" writes to stderr.
    pub error_log: String,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Prometheus exporter bind address; no exporter when unset.
    pub metrics_address: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            access_log: "access.log".to_string(),
            error_log: String::new(),
            log_level: "info".to_string(),
            metrics_address: None,
        }
    }
}

/// Where a log stream is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    Disabled,
    Stdout,
    Stderr,
    File(PathBuf),
}

impl LoggingConfig {
    pub fn access_log_destination(&self) -> LogDestination {
        match self.access_log.as_str() {
            "" => LogDestination::Disabled,
            "-" => LogDestination::Stdout,
            path => LogDestination::File(PathBuf::from(path)),
        }
    }

    pub fn error_log_destination(&self) -> LogDestination {
        match self.error_log.as_str() {
            "" => LogDestination::Stderr,
            path => LogDestination::File(PathBuf::from(path)),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Drips leaked from every bucket per second.
    pub average: u32,

    /// Soft limit: above this count clients are told to slow down.
    pub burst: u32,

    /// Hard limit: above this count the address is banned.
    pub hard_limit: u32,

    /// Ban duration in seconds.
    pub ban_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            average: 1,
            burst: 10,
            hard_limit: 30,
            ban_secs: 3600,
        }
    }
}

/// Backend dispatch configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BackendConfig {
    /// CGI directories or scripts; relative entries are joined to `doc_root`
    /// and glob patterns are expanded at startup.
    pub cgi_paths: Vec<PathBuf>,

    /// URL path prefix to SCGI Unix socket.
    pub scgi: OrderedTable<PathBuf>,
}

/// Process confinement configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Account to switch to when started as root.
    pub unprivileged_user: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            unprivileged_user: "nobody".to_string(),
        }
    }
}

/// Sort key for generated directory listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
pub enum DirectorySort {
    #[default]
    Name,
    Size,
    Time,
}

/// Per-request settings.
///
/// The configured defaults are copied for every request and then refined by
/// any overlay files between the document root and the requested path.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct UserConfig {
    /// Extension served as `text/gemini`.
    pub gemini_ext: String,

    /// `lang` parameter added to `text/gemini` responses.
    pub default_lang: String,

    /// `charset` parameter added to `text/gemini` responses.
    pub default_encoding: String,

    pub directory_sort: DirectorySort,
    pub directory_subdirs_first: bool,
    pub directory_reverse: bool,

    /// Label listing entries with the first heading of native documents.
    pub directory_titles: bool,

    /// Regex pattern to replacement, answered with status 30.
    pub temp_redirects: OrderedTable<String>,

    /// Regex pattern to replacement, answered with status 31.
    pub perm_redirects: OrderedTable<String>,

    /// Regex over the filesystem path to MIME type.
    pub mime_overrides: OrderedTable<String>,

    /// URL path prefix to authorized certificate fingerprints.
    pub certificate_zones: OrderedTable<Vec<String>>,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            gemini_ext: "gmi".to_string(),
            default_lang: String::new(),
            default_encoding: String::new(),
            directory_sort: DirectorySort::Name,
            directory_subdirs_first: false,
            directory_reverse: false,
            directory_titles: false,
            temp_redirects: OrderedTable::new(),
            perm_redirects: OrderedTable::new(),
            mime_overrides: OrderedTable::new(),
            certificate_zones: OrderedTable::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_uses_defaults() {
        let config: ServerConfig = toml::from_str("[server]\nhostname = \"example.org\"\n").unwrap();
        assert_eq!(config.server.hostname, "example.org");
        assert_eq!(config.server.port, 1965);
        assert_eq!(config.defaults.gemini_ext, "gmi");
        assert!(!config.rate_limit.enabled);
    }

    #[test]
    fn parses_nested_tables() {
        let config: ServerConfig = toml::from_str(
            r#"
            [backends]
            cgi_paths = ["cgi-bin/*"]

            [backends.scgi]
            "/app" = "/run/app.sock"

            [defaults]
            directory_sort = "Time"

            [defaults.certificate_zones]
            "/private" = ["ab12"]
            "#,
        )
        .unwrap();

        assert_eq!(config.backends.cgi_paths, vec![PathBuf::from("cgi-bin/*")]);
        assert_eq!(
            config.backends.scgi.get("/app"),
            Some(&PathBuf::from("/run/app.sock"))
        );
        assert_eq!(config.defaults.directory_sort, DirectorySort::Time);
        assert_eq!(
            config.defaults.certificate_zones.get("/private"),
            Some(&vec!["ab12".to_string()])
        );
    }

    #[test]
    fn rejects_unknown_sort_key() {
        let result: Result<ServerConfig, _> =
            toml::from_str("[defaults]\ndirectory_sort = \"Colour\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn log_destinations() {
        let mut logging = LoggingConfig::default();
        assert_eq!(
            logging.access_log_destination(),
            LogDestination::File(PathBuf::from("access.log"))
        );
        assert_eq!(logging.error_log_destination(), LogDestination::Stderr);

        logging.access_log = "-".into();
        assert_eq!(logging.access_log_destination(), LogDestination::Stdout);
        logging.access_log = String::new();
        assert_eq!(logging.access_log_destination(), LogDestination::Disabled);
    }
}
