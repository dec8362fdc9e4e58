//! Per-connection request pipeline.
//!
//! # Data Flow
//! ```text
//! Accepted stream
//!     → rate limit admission        (44)
//!     → read + parse request line   (59, 40)
//!     → client certificate validity (62)
//!     → scheme, host, port          (53)
//!     → literal ".." rejection      (50)
//!     → logical path + overlays
//!     → certificate zone            (60, 61)
//!     → redirects                   (30, 31)
//!     → CGI / SCGI dispatch         (backend status, 40 on failure)
//!     → symlink-safe resolution     (51)
//!     → directory / file serving    (31, 20, 51)
//!     → one response, one access log entry
//! ```
//!
//! # Design Decisions
//! - Every stage either produces the final response or hands on; nothing
//!   after a terminal status runs
//! - Failure detail goes to the error log only, the client sees a generic
//!   status line
//! - Generic over the stream so the pipeline can run without TLS

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use crate::backend::{Dispatcher, GatewayRequest};
use crate::config::overlay::resolve_overlay;
use crate::config::{ServerConfig, UserConfig};
use crate::gemini::listing::generate_listing;
use crate::gemini::mime;
use crate::gemini::request::{read_request_line, Request, DEFAULT_SCHEME};
use crate::gemini::response::Response;
use crate::gemini::status::Status;
use crate::observability::{metrics, AccessLog, LogEntry};
use crate::routing::{check_redirects, select_backend};
use crate::security::cert_zone::{all_valid, check_zone, ClientCertificate, ZoneDecision};
use crate::security::path_guard::{self, is_world_readable, PathGuard};
use crate::security::rate_limit::{Admission, RateLimiter};

/// State shared by every connection task.
pub struct ServerState {
    pub config: Arc<ServerConfig>,
    pub guard: PathGuard,
    pub limiter: Arc<RateLimiter>,
    pub access_log: AccessLog,
    pub dispatcher: Dispatcher,
}

impl ServerState {
    pub fn new(config: Arc<ServerConfig>, access_log: AccessLog) -> io::Result<Self> {
        Ok(Self {
            guard: PathGuard::new(&config)?,
            limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
            dispatcher: Dispatcher::new(config.clone()),
            access_log,
            config,
        })
    }
}

/// Remote end of a connection.
#[derive(Debug, Clone)]
pub struct Peer {
    pub addr: SocketAddr,
    /// DER certificates presented during the handshake, leaf first.
    pub certificates: Vec<Vec<u8>>,
}

impl Peer {
    pub fn anonymous(addr: SocketAddr) -> Self {
        Self {
            addr,
            certificates: Vec::new(),
        }
    }
}

/// Handle one connection from start to close.
///
/// Returns the access log entry, which has also been queued on the log.
pub async fn handle_connection<S>(mut stream: S, peer: Peer, state: &ServerState) -> LogEntry
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut entry = LogEntry::new(peer.addr.ip());

    let response = process(&mut stream, &peer, state, &mut entry).await;
    let code = response.code();
    entry.status = code;

    if let Err(e) = response.write_to(&mut stream).await {
        tracing::debug!(peer = %peer.addr, error = %e, "Failed to write response");
    }
    if let Err(e) = stream.shutdown().await {
        tracing::trace!(peer = %peer.addr, error = %e, "Failed to close stream");
    }

    metrics::record_response(code);
    state.access_log.record(entry.clone()).await;
    entry
}

async fn process<S>(stream: &mut S, peer: &Peer, state: &ServerState, entry: &mut LogEntry) -> Response
where
    S: AsyncRead + Unpin,
{
    let config = &state.config;

    match state.limiter.admit(peer.addr.ip()) {
        Admission::Allowed => {}
        Admission::SlowDown { retry_after_secs } | Admission::Banned { retry_after_secs } => {
            return Response::header(Status::SlowDown, retry_after_secs.to_string());
        }
    }

    let line = match read_request_line(stream, config.server.max_request_len).await {
        Ok(line) => line,
        Err(e) => {
            tracing::debug!(peer = %peer.addr, error = %e, "Bad request line");
            return Response::header(e.status(), e.meta());
        }
    };
    entry.request = line.clone();

    let request = match Request::parse(&line) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(peer = %peer.addr, error = %e, "Unparseable request");
            return Response::header(e.status(), e.meta());
        }
    };

    let certificates = match parse_certificates(&peer.certificates) {
        Some(certs) if all_valid(&certs, chrono::Utc::now().timestamp()) => certs,
        _ => {
            tracing::info!(peer = %peer.addr, "Rejected invalid client certificate");
            return Response::header(Status::CertificateNotValid, "Client certificate not valid!");
        }
    };

    if request.url.scheme() != DEFAULT_SCHEME {
        return Response::header(
            Status::ProxyRequestRefused,
            "No proxying to non-Gemini content!",
        );
    }

    let host_matches = request.host().as_deref() == Some(config.server.hostname.as_str());
    let port_matches = request
        .url
        .port()
        .map_or(true, |port| port == config.server.port);
    if !host_matches || !port_matches {
        return Response::header(
            Status::ProxyRequestRefused,
            "No proxying to other hosts or ports!",
        );
    }

    if request.has_traversal() {
        tracing::info!(peer = %peer.addr, request = %request.raw, "Rejected directory traversal");
        return Response::header(
            Status::PermanentFailure,
            "Your directory traversal technique has been defeated!",
        );
    }

    serve(&request, peer, &certificates, state).await
}

fn parse_certificates(der: &[Vec<u8>]) -> Option<Vec<ClientCertificate>> {
    der.iter()
        .map(|cert| ClientCertificate::from_der(cert))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tracing::debug!(error = %e, "Unparseable client certificate"))
        .ok()
}

async fn serve(
    request: &Request,
    peer: &Peer,
    certificates: &[ClientCertificate],
    state: &ServerState,
) -> Response {
    let config = &state.config;
    let url_path = request.path();
    let logical = path_guard::resolve(&url_path, &config.server);

    let user_config = if config.server.read_overlays {
        resolve_overlay(&logical, &config.server.doc_root, &config.defaults)
    } else {
        config.defaults.clone()
    };

    match check_zone(&url_path, certificates, &user_config.certificate_zones) {
        ZoneDecision::Allow => {}
        ZoneDecision::CertificateRequired { zone } => {
            tracing::debug!(peer = %peer.addr, zone = %zone, path = %url_path, "Certificate required");
            return Response::header(Status::CertificateRequired, "Client certificate required!");
        }
        ZoneDecision::NotAuthorised { zone } => {
            tracing::info!(peer = %peer.addr, zone = %zone, path = %url_path, "Certificate not authorised");
            return Response::header(
                Status::CertificateNotAuthorised,
                "Client certificate not authorised!",
            );
        }
    }

    if let Some(redirect) = check_redirects(&url_path, &request.url, &user_config) {
        return Response::header(redirect.status, redirect.target);
    }

    if let Some(target) = select_backend(&logical, &url_path, &config.backends) {
        let gateway = GatewayRequest {
            url: &request.url,
            remote_addr: peer.addr.ip(),
            client_cert: certificates.first(),
            fs_path: logical.clone(),
            url_path: url_path.clone(),
        };
        return match state.dispatcher.dispatch(&target, &gateway).await {
            Ok(backend) => Response::Backend(backend),
            Err(e) => {
                tracing::warn!(path = %url_path, error = %e, "Backend dispatch failed");
                Response::header(Status::TemporaryFailure, "Temporary failure!")
            }
        };
    }

    let real = match state.guard.secure_resolve(&logical) {
        Ok(real) => real,
        Err(e) => {
            tracing::info!(peer = %peer.addr, path = %logical.display(), error = %e, "Refused path");
            return Response::not_found();
        }
    };

    let meta = match tokio::fs::metadata(&real).await {
        Ok(meta) => meta,
        Err(e) => return io_failure(&real, e),
    };
    if !is_world_readable(&meta) {
        return Response::not_found();
    }

    if meta.is_dir() {
        serve_directory(request, &url_path, &real, &user_config, state).await
    } else {
        serve_file(&real, &user_config).await
    }
}

async fn serve_directory(
    request: &Request,
    url_path: &str,
    dir: &Path,
    user_config: &UserConfig,
    state: &ServerState,
) -> Response {
    if !url_path.ends_with('/') {
        let mut target = request.url.clone();
        target.set_path(&format!("{}/", request.url.path()));
        return Response::header(Status::RedirectPermanent, target.as_str());
    }

    let index = dir.join(format!("index.{}", user_config.gemini_ext));
    if let Ok(index) = state.guard.secure_resolve(&index) {
        let readable = tokio::fs::metadata(&index)
            .await
            .is_ok_and(|m| m.is_file() && is_world_readable(&m));
        if readable {
            return serve_file(&index, user_config).await;
        }
    }

    let listing = {
        let dir = dir.to_path_buf();
        let url_path = url_path.to_string();
        let user_config = user_config.clone();
        let sensitive = state.guard.sensitive_files().clone();
        tokio::task::spawn_blocking(move || {
            generate_listing(&dir, &url_path, &user_config, &sensitive)
        })
        .await
    };
    match listing {
        Ok(Ok(body)) => Response::Body {
            meta: mime::with_parameters(mime::GEMINI_MIME.to_string(), user_config),
            body: body.into_bytes(),
        },
        Ok(Err(e)) => {
            tracing::error!(dir = %dir.display(), error = %e, "Failed to generate listing");
            Response::header(Status::TemporaryFailure, "Server error!")
        }
        Err(e) => {
            tracing::error!(dir = %dir.display(), error = %e, "Listing task failed");
            Response::header(Status::TemporaryFailure, "Server error!")
        }
    }
}

async fn serve_file(path: &Path, user_config: &UserConfig) -> Response {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) => return io_failure(path, e),
    };

    let mime = match mime::guess(path, user_config) {
        Some(mime) => mime,
        None => match sniff_file(&mut file).await {
            Ok(mime) => mime.to_string(),
            Err(e) => return io_failure(path, e),
        },
    };

    Response::File {
        meta: mime::with_parameters(mime, user_config),
        file,
    }
}

async fn sniff_file(file: &mut tokio::fs::File) -> io::Result<&'static str> {
    let mut head = Vec::with_capacity(mime::SNIFF_LEN);
    (&mut *file)
        .take(mime::SNIFF_LEN as u64)
        .read_to_end(&mut head)
        .await?;
    file.rewind().await?;
    Ok(mime::sniff(&head))
}

fn io_failure(path: &Path, error: io::Error) -> Response {
    match error.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => Response::not_found(),
        _ => {
            tracing::error!(path = %path.display(), error = %error, "I/O failure");
            Response::header(Status::TemporaryFailure, "Temporary failure!")
        }
    }
}
