//! Client certificate identity and certificate zones.
//!
//! # Responsibilities
//! - Fingerprint and date-check certificates presented by clients
//! - Decide whether a request path is inside a certificate zone
//! - Distinguish "no certificate" from "wrong certificate"
//!
//! # Design Decisions
//! - Identity is the SHA-256 of the leaf certificate DER, lowercase hex
//! - Longest matching zone prefix decides; no match means no restriction
//! - An empty fingerprint list, or one containing "any", admits any client
//!   that presents a certificate

use sha2::{Digest, Sha256};
use thiserror::Error;
use x509_parser::prelude::*;

use crate::config::ordered::OrderedTable;

/// Fingerprint list entry admitting any certificate.
pub const ANY_CERTIFICATE: &str = "any";

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("failed to parse client certificate: {0}")]
    Parse(String),
}

/// A certificate presented by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCertificate {
    pub fingerprint: String,
    pub subject: String,
    pub not_before: i64,
    pub not_after: i64,
}

/// Lowercase hex SHA-256 of `der`.
pub fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

impl ClientCertificate {
    pub fn from_der(der: &[u8]) -> Result<Self, CertificateError> {
        let (_, cert) =
            parse_x509_certificate(der).map_err(|e| CertificateError::Parse(e.to_string()))?;
        let validity = cert.validity();

        Ok(Self {
            fingerprint: fingerprint(der),
            subject: cert.subject().to_string(),
            not_before: validity.not_before.timestamp(),
            not_after: validity.not_after.timestamp(),
        })
    }

    pub fn is_valid_at(&self, unix_time: i64) -> bool {
        self.not_before <= unix_time && unix_time <= self.not_after
    }
}

/// True when every presented certificate is inside its validity window.
pub fn all_valid(certs: &[ClientCertificate], unix_time: i64) -> bool {
    certs.iter().all(|c| c.is_valid_at(unix_time))
}

/// Outcome of a zone check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneDecision {
    Allow,
    /// Inside `zone` and no certificate was presented.
    CertificateRequired { zone: String },
    /// Inside `zone` and the presented certificate is not listed.
    NotAuthorised { zone: String },
}

/// Find the longest zone prefix matching `path`.
fn matching_zone<'a>(
    path: &str,
    zones: &'a OrderedTable<Vec<String>>,
) -> Option<(&'a str, &'a Vec<String>)> {
    zones
        .iter()
        .filter(|(prefix, _)| path.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
}

/// Decide whether `certs` may access `path`.
pub fn check_zone(
    path: &str,
    certs: &[ClientCertificate],
    zones: &OrderedTable<Vec<String>>,
) -> ZoneDecision {
    let Some((zone, allowed)) = matching_zone(path, zones) else {
        return ZoneDecision::Allow;
    };

    let Some(leaf) = certs.first() else {
        return ZoneDecision::CertificateRequired {
            zone: zone.to_string(),
        };
    };

    let admits_any = allowed.is_empty()
        || allowed.iter().any(|f| f.eq_ignore_ascii_case(ANY_CERTIFICATE));
    if admits_any
        || allowed
            .iter()
            .any(|f| f.eq_ignore_ascii_case(&leaf.fingerprint))
    {
        ZoneDecision::Allow
    } else {
        ZoneDecision::NotAuthorised {
            zone: zone.to_string(),
        }
    }
}
