//! Request line reading and URL parsing.
//!
//! # Responsibilities
//! - Read exactly one request line with a hard length bound
//! - Parse it as an absolute or scheme-relative URL
//! - Expose the decoded path, the normalized host and traversal markers

use percent_encoding::percent_decode_str;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use url::Url;

use crate::gemini::status::Status;

/// Scheme assumed for scheme-relative requests.
pub const DEFAULT_SCHEME: &str = "gemini";

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request line exceeds {limit} bytes")]
    TooLong { limit: usize },

    #[error("connection closed before a request was sent")]
    Empty,

    #[error("request is not valid UTF-8")]
    NotUtf8,

    #[error("invalid request URL {line:?}: {source}")]
    Url {
        line: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to read request: {0}")]
    Io(#[from] io::Error),
}

impl RequestError {
    /// Status sent back for this failure.
    pub fn status(&self) -> Status {
        match self {
            RequestError::Io(_) => Status::TemporaryFailure,
            _ => Status::BadRequest,
        }
    }

    /// Fixed meta text sent back for this failure.
    pub fn meta(&self) -> &'static str {
        match self {
            RequestError::TooLong { .. } => "Request too long!",
            RequestError::Io(_) => "Unknown error reading request!",
            _ => "Error parsing URL!",
        }
    }
}

/// Read one request line of at most `limit` bytes, terminator excluded.
pub async fn read_request_line<R>(reader: &mut R, limit: usize) -> Result<String, RequestError>
where
    R: AsyncRead + Unpin,
{
    let mut bounded = BufReader::new(AsyncReadExt::take(&mut *reader, limit as u64 + 2));
    let mut buf = Vec::with_capacity(128);
    let read = bounded.read_until(b'\n', &mut buf).await?;
    if read == 0 {
        return Err(RequestError::Empty);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    if buf.len() > limit {
        return Err(RequestError::TooLong { limit });
    }

    String::from_utf8(buf).map_err(|_| RequestError::NotUtf8)
}

/// Collapse repeated separators and drop `.` segments, keeping the leading
/// slash and any trailing slash.
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty() && *s != ".") {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() || path.ends_with('/') || path.ends_with("/.") {
        out.push('/');
    }
    out
}

/// A parsed request.
#[derive(Debug, Clone)]
pub struct Request {
    /// Parsed URL with the scheme filled in.
    pub url: Url,
    /// The line exactly as received.
    pub raw: String,
}

impl Request {
    pub fn parse(line: &str) -> Result<Self, RequestError> {
        let absolute = if line.starts_with("//") {
            format!("{DEFAULT_SCHEME}:{line}")
        } else {
            line.to_string()
        };

        let url = Url::parse(&absolute).map_err(|source| RequestError::Url {
            line: line.to_string(),
            source,
        })?;

        Ok(Self {
            url,
            raw: line.to_string(),
        })
    }

    /// Percent-decoded URL path with empty and `.` segments removed.
    ///
    /// Every path-keyed decision (zones, redirects, backends, filesystem
    /// mapping) uses this one spelling, so `//a` and `/%2Fa` mean `/a`.
    pub fn path(&self) -> String {
        let decoded = percent_decode_str(self.url.path()).decode_utf8_lossy();
        normalize_path(&decoded)
    }

    /// Lowercase host with any trailing dot removed.
    pub fn host(&self) -> Option<String> {
        self.url
            .host_str()
            .map(|h| h.trim_end_matches('.').to_lowercase())
    }

    /// True when the request as sent contains a `..` sequence before any
    /// query or fragment, percent-encoded or not.
    ///
    /// Checked on the raw line because URL parsing removes dot segments.
    pub fn has_traversal(&self) -> bool {
        let end = self.raw.find(['?', '#']).unwrap_or(self.raw.len());
        let decoded = percent_decode_str(&self.raw[..end]).decode_utf8_lossy();
        decoded.contains("..")
    }
}
