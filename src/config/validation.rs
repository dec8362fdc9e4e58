//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Make every configured path absolute, resolving the document root
//! - Expand CGI path globs
//! - Reject cross-protocol redirects in the defaults
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Consumes the parsed config and returns the normalized one

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::schema::{LogDestination, ServerConfig};
use crate::routing::redirect::is_cross_protocol;
use crate::security::path_guard::normalize;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("hostname must not be empty")]
    EmptyHostname,

    #[error("port must not be 0")]
    InvalidPort,

    #[error("document root {path} is unusable: {source}")]
    DocRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("home_doc_root must be relative to doc_root, got {0}")]
    AbsoluteHomeRoot(PathBuf),

    #[error("cannot determine working directory: {0}")]
    WorkingDirectory(#[source] std::io::Error),

    #[error("invalid CGI path glob {pattern}: {reason}")]
    CgiGlob { pattern: String, reason: String },

    #[error("invalid cross-protocol redirect to {target}")]
    CrossProtocolRedirect { target: String },

    #[error("invalid rate limit: {0}")]
    RateLimit(String),
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&base.join(path))
    }
}

/// Validate `config`, returning it with every path made absolute.
pub fn validate_config(mut config: ServerConfig) -> Result<ServerConfig, Vec<ValidationError>> {
    let mut errors = Vec::new();

    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => return Err(vec![ValidationError::WorkingDirectory(e)]),
    };

    // Site identity
    config.server.hostname = config.server.hostname.trim_end_matches('.').to_lowercase();
    if config.server.hostname.is_empty() {
        errors.push(ValidationError::EmptyHostname);
    }
    if config.server.port == 0 {
        errors.push(ValidationError::InvalidPort);
    }

    // Document tree, resolved on disk so every later path shares its prefix
    let requested = absolutize(&cwd, &config.server.doc_root);
    let doc_root = match std::fs::canonicalize(&requested) {
        Ok(real) if real.is_dir() => real,
        Ok(real) => {
            errors.push(ValidationError::DocRoot {
                path: real.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
            });
            real
        }
        Err(source) => {
            errors.push(ValidationError::DocRoot {
                path: requested.clone(),
                source,
            });
            requested
        }
    };
    config.server.doc_root = doc_root.clone();

    if config.server.home_doc_root.is_absolute() {
        errors.push(ValidationError::AbsoluteHomeRoot(
            config.server.home_doc_root.clone(),
        ));
    }

    // TLS and log files, relative to the working directory
    config.tls.cert_path = absolutize(&cwd, &config.tls.cert_path);
    config.tls.key_path = absolutize(&cwd, &config.tls.key_path);
    if let LogDestination::File(path) = config.logging.access_log_destination() {
        config.logging.access_log = absolutize(&cwd, &path).to_string_lossy().into_owned();
    }
    if let LogDestination::File(path) = config.logging.error_log_destination() {
        config.logging.error_log = absolutize(&cwd, &path).to_string_lossy().into_owned();
    }

    // CGI paths, relative to the document root, then glob-expanded
    let mut cgi_paths = Vec::new();
    for pattern in &config.backends.cgi_paths {
        let pattern = absolutize(&doc_root, pattern).to_string_lossy().into_owned();
        match glob::glob(&pattern) {
            Ok(paths) => cgi_paths.extend(paths.filter_map(Result::ok)),
            Err(e) => errors.push(ValidationError::CgiGlob {
                pattern,
                reason: e.to_string(),
            }),
        }
    }
    config.backends.cgi_paths = cgi_paths;

    // SCGI sockets, relative to the document root
    for socket in config.backends.scgi.values_mut() {
        *socket = absolutize(&doc_root, socket);
    }

    // Default redirects
    let defaults = &config.defaults;
    for (_, target) in defaults.temp_redirects.iter().chain(defaults.perm_redirects.iter()) {
        if is_cross_protocol(target) {
            errors.push(ValidationError::CrossProtocolRedirect {
                target: target.clone(),
            });
        }
    }

    // Rate limiting
    let limits = &config.rate_limit;
    if limits.enabled {
        if limits.average == 0 {
            errors.push(ValidationError::RateLimit("average must be positive".into()));
        }
        if limits.burst > limits.hard_limit {
            errors.push(ValidationError::RateLimit(format!(
                "burst ({}) exceeds hard_limit ({})",
                limits.burst, limits.hard_limit
            )));
        }
    }

    if errors.is_empty() {
        Ok(config)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config_in(root: &Path) -> ServerConfig {
        let mut config = ServerConfig::default();
        config.server.doc_root = root.to_path_buf();
        config
    }

    #[test]
    fn valid_config_passes_and_is_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.server.hostname = "Example.ORG.".into();

        let config = validate_config(config).unwrap();
        assert_eq!(config.server.hostname, "example.org");
        assert!(config.tls.cert_path.is_absolute());
        assert!(config.tls.key_path.is_absolute());
        assert!(Path::new(&config.logging.access_log).is_absolute());
    }

    #[test]
    fn collects_every_error() {
        let mut config = ServerConfig::default();
        config.server.doc_root = PathBuf::from("/definitely/not/here");
        config.server.hostname = String::new();
        config.server.port = 0;
        config
            .defaults
            .perm_redirects
            .insert("^/web", "https://example.org/".to_string());

        let errors = validate_config(config).unwrap_err();
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn expands_cgi_globs_relative_to_root() {
        let dir = tempfile::tempdir().unwrap();
        let cgi = fs::canonicalize(dir.path()).unwrap().join("cgi-bin");
        fs::create_dir_all(&cgi).unwrap();
        fs::write(cgi.join("a.sh"), "").unwrap();
        fs::write(cgi.join("b.sh"), "").unwrap();
        fs::write(cgi.join("c.txt"), "").unwrap();

        let mut config = config_in(dir.path());
        config.backends.cgi_paths = vec![PathBuf::from("cgi-bin/*.sh")];

        let config = validate_config(config).unwrap();
        let mut paths = config.backends.cgi_paths.clone();
        paths.sort();
        assert_eq!(paths, vec![cgi.join("a.sh"), cgi.join("b.sh")]);
    }

    #[test]
    fn scgi_sockets_become_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config
            .backends
            .scgi
            .insert("/app", PathBuf::from("sockets/app.sock"));

        let config = validate_config(config).unwrap();
        assert_eq!(
            config.backends.scgi.get("/app"),
            Some(&fs::canonicalize(dir.path()).unwrap().join("sockets/app.sock"))
        );
    }

    #[cfg(unix)]
    #[test]
    fn doc_root_is_resolved_through_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let real = fs::canonicalize(dir.path()).unwrap().join("site");
        fs::create_dir(&real).unwrap();
        let alias = dir.path().join("current");
        std::os::unix::fs::symlink(&real, &alias).unwrap();

        let config = validate_config(config_in(&alias.join("."))).unwrap();
        assert_eq!(config.server.doc_root, real);
    }

    #[test]
    fn doc_root_must_be_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, "").unwrap();

        let errors = validate_config(config_in(&file)).unwrap_err();
        assert!(matches!(errors[0], ValidationError::DocRoot { .. }));
    }

    #[test]
    fn rate_limit_burst_must_not_exceed_hard_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.rate_limit.enabled = true;
        config.rate_limit.burst = 50;
        config.rate_limit.hard_limit = 10;

        let errors = validate_config(config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::RateLimit(_)));
    }
}
