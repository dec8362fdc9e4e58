//! Regex redirect rules.
//!
//! # Responsibilities
//! - Match the request path against temporary, then permanent, rules
//! - Expand capture groups into the replacement
//! - Turn path-only targets into full URLs on this server
//!
//! # Design Decisions
//! - First matching rule in document order wins
//! - A pattern that fails to compile is logged and skipped

use regex::Regex;
use url::Url;

use crate::config::ordered::OrderedTable;
use crate::config::schema::UserConfig;
use crate::gemini::status::Status;

/// Scheme prefix of fully-qualified targets on our own protocol.
pub const SCHEME_PREFIX: &str = "gemini://";

/// True when `target` names a URL on a different protocol.
pub fn is_cross_protocol(target: &str) -> bool {
    target.contains("://") && !target.starts_with(SCHEME_PREFIX)
}

/// A redirect decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub status: Status,
    pub target: String,
}

/// Apply the first rule in `rules` whose pattern matches `path`.
///
/// Returns the raw replacement, which may be a bare path.
pub fn match_redirect(path: &str, rules: &OrderedTable<String>) -> Option<String> {
    for (pattern, replacement) in rules.iter() {
        let compiled = match Regex::new(pattern) {
            Ok(re) => re,
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "Skipping invalid redirect pattern");
                continue;
            }
        };

        if compiled.is_match(path) {
            return Some(compiled.replace_all(path, replacement.as_str()).into_owned());
        }
    }
    None
}

/// Serialize `target` as a complete URL.
///
/// Targets already on our protocol pass through untouched, protocol-relative
/// targets take our scheme, anything else replaces the request path.
pub fn complete_target(target: &str, request: &Url) -> String {
    if target.starts_with(SCHEME_PREFIX) {
        return target.to_string();
    }
    if let Some(rest) = target.strip_prefix("//") {
        return format!("{SCHEME_PREFIX}{rest}");
    }

    let mut url = request.clone();
    url.set_path(target);
    url.to_string()
}

/// Check the temporary rules, then the permanent ones.
pub fn check_redirects(path: &str, request: &Url, config: &UserConfig) -> Option<Redirect> {
    let sets = [
        (Status::RedirectTemporary, &config.temp_redirects),
        (Status::RedirectPermanent, &config.perm_redirects),
    ];

    sets.into_iter().find_map(|(status, rules)| {
        match_redirect(path, rules).map(|target| Redirect {
            status,
            target: complete_target(&target, request),
        })
    })
}
