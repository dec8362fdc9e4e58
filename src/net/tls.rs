//! TLS configuration and certificate loading.
//!
//! # Responsibilities
//! - Load the server certificate chain and private key from PEM files
//! - Refuse world-readable private keys
//! - Check the certificate covers the configured hostname, warn on expiry
//! - Request, but never require, client certificates
//!
//! # Design Decisions
//! - Client certificates are self-signed identities, so no chain is
//!   verified; only the handshake signature is checked. Validity windows
//!   and zone membership are enforced per request by the handler
//! - TLS 1.3 only unless `allow_tls12` is set

use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, DistinguishedName, ServerConnection, SignatureScheme};
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_rustls::TlsAcceptor;
use x509_parser::prelude::*;

use crate::config::schema::TlsConfig;
use crate::security::path_guard::is_world_readable;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("refusing to use world-readable TLS key {0}")]
    WorldReadableKey(PathBuf),

    #[error("no certificate found in {0}")]
    NoCertificate(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("failed to parse TLS certificate: {0}")]
    Certificate(String),

    #[error("TLS certificate is not valid for hostname {0}")]
    HostnameMismatch(String),

    #[error("TLS configuration error: {0}")]
    Rustls(#[from] rustls::Error),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> TlsError + '_ {
    move |source| TlsError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Read every certificate in a PEM file, leaf first.
pub fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = fs::File::open(path).map_err(io_error(path))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_error(path))?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificate(path.to_path_buf()));
    }
    Ok(certs)
}

/// Read the private key, refusing files every user can read.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let meta = fs::metadata(path).map_err(io_error(path))?;
    if is_world_readable(&meta) {
        return Err(TlsError::WorldReadableKey(path.to_path_buf()));
    }

    let file = fs::File::open(path).map_err(io_error(path))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(io_error(path))?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

/// True when `pattern` (possibly `*.`-prefixed) covers `hostname`.
fn name_matches(pattern: &str, hostname: &str) -> bool {
    let pattern = pattern.trim_end_matches('.').to_ascii_lowercase();
    match pattern.strip_prefix("*.") {
        Some(suffix) => hostname
            .split_once('.')
            .is_some_and(|(label, rest)| !label.is_empty() && rest == suffix),
        None => pattern == hostname,
    }
}

/// Check the leaf certificate names `hostname` and warn when it has expired.
///
/// Subject alternative DNS names are used when present, otherwise the
/// subject common name.
pub fn check_certificate(leaf: &CertificateDer<'_>, hostname: &str) -> Result<(), TlsError> {
    let (_, cert) =
        parse_x509_certificate(leaf.as_ref()).map_err(|e| TlsError::Certificate(e.to_string()))?;

    let san_names: Vec<String> = match cert.subject_alternative_name() {
        Ok(Some(san)) => san
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                _ => None,
            })
            .collect(),
        Ok(None) => Vec::new(),
        Err(e) => return Err(TlsError::Certificate(e.to_string())),
    };

    let covered = if san_names.is_empty() {
        cert.subject()
            .iter_common_name()
            .filter_map(|cn| cn.as_str().ok())
            .any(|cn| name_matches(cn, hostname))
    } else {
        san_names.iter().any(|name| name_matches(name, hostname))
    };
    if !covered {
        return Err(TlsError::HostnameMismatch(hostname.to_string()));
    }

    let not_after = cert.validity().not_after;
    if not_after.timestamp() < chrono::Utc::now().timestamp() {
        tracing::warn!(expired = %not_after, "TLS certificate has expired");
    }
    Ok(())
}

/// Accepts any client certificate whose handshake signature verifies.
#[derive(Debug)]
struct AcceptAnyClientCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ClientCertVerifier for AcceptAnyClientCert {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        false
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// Build the server-side TLS configuration.
pub fn build_server_config(
    tls: &TlsConfig,
    hostname: &str,
) -> Result<Arc<rustls::ServerConfig>, TlsError> {
    let key = load_private_key(&tls.key_path)?;
    let certs = load_certificates(&tls.cert_path)?;
    check_certificate(&certs[0], hostname)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = AcceptAnyClientCert {
        algorithms: provider.signature_verification_algorithms,
    };

    let versions: &[&rustls::SupportedProtocolVersion] = if tls.allow_tls12 {
        &[&rustls::version::TLS13, &rustls::version::TLS12]
    } else {
        &[&rustls::version::TLS13]
    };

    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(versions)?
        .with_client_cert_verifier(Arc::new(verifier))
        .with_single_cert(certs, key)?;

    tracing::info!(
        cert = %tls.cert_path.display(),
        tls12 = tls.allow_tls12,
        "TLS configuration loaded"
    );
    Ok(Arc::new(config))
}

pub fn acceptor(config: Arc<rustls::ServerConfig>) -> TlsAcceptor {
    TlsAcceptor::from(config)
}

/// DER certificates the client presented, leaf first.
pub fn peer_certificates(conn: &ServerConnection) -> Vec<Vec<u8>> {
    conn.peer_certificates()
        .map(|certs| certs.iter().map(|c| c.as_ref().to_vec()).collect())
        .unwrap_or_default()
}
