//! Content-type decision for static files.
//!
//! Order of precedence:
//! 1. the native document extension maps to `text/gemini`
//! 2. the extension table
//! 3. regex overrides matched against the filesystem path, last match wins
//! 4. content sniffing of the first [`SNIFF_LEN`] bytes, only when nothing
//!    above produced a type
//!
//! Native documents then get `charset` and `lang` parameters from the
//! effective configuration.

use regex::Regex;
use std::path::Path;

use crate::config::UserConfig;

pub const GEMINI_MIME: &str = "text/gemini";
pub const SNIFF_LEN: usize = 512;

/// Type from the extension and overrides alone.
pub fn guess(path: &Path, config: &UserConfig) -> Option<String> {
    let native = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == config.gemini_ext);

    let mut mime = if native {
        Some(GEMINI_MIME.to_string())
    } else {
        mime_guess::from_path(path)
            .first()
            .map(|m| m.essence_str().to_string())
    };

    let path_str = path.to_string_lossy();
    for (pattern, replacement) in config.mime_overrides.iter() {
        match Regex::new(pattern) {
            Ok(re) if re.is_match(&path_str) => mime = Some(replacement.clone()),
            Ok(_) => {}
            Err(e) => tracing::warn!(pattern, error = %e, "Ignoring invalid MIME override pattern"),
        }
    }
    mime
}

/// Classify a file from its leading bytes.
pub fn sniff(head: &[u8]) -> &'static str {
    let text = match std::str::from_utf8(head) {
        Ok(_) => true,
        // A multi-byte sequence cut off by the read boundary is still text.
        Err(e) => e.error_len().is_none(),
    };
    if text && !head.contains(&0) {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

/// Append `charset` and `lang` parameters to native documents.
pub fn with_parameters(mime: String, config: &UserConfig) -> String {
    if !mime.starts_with(GEMINI_MIME) {
        return mime;
    }
    let mut mime = mime;
    if !config.default_encoding.is_empty() {
        mime.push_str("; charset=");
        mime.push_str(&config.default_encoding);
    }
    if !config.default_lang.is_empty() {
        mime.push_str("; lang=");
        mime.push_str(&config.default_lang);
    }
    mime
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_extension_is_gemini() {
        let config = UserConfig::default();
        assert_eq!(guess(Path::new("/srv/a.gmi"), &config).as_deref(), Some("text/gemini"));

        let config = UserConfig {
            gemini_ext: "page".into(),
            ..UserConfig::default()
        };
        assert_eq!(guess(Path::new("/srv/a.page"), &config).as_deref(), Some("text/gemini"));
        assert_eq!(guess(Path::new("/srv/a.page"), &UserConfig::default()), None);
    }

    #[test]
    fn extension_table_lookup() {
        let config = UserConfig::default();
        assert_eq!(guess(Path::new("/srv/p.png"), &config).as_deref(), Some("image/png"));
        assert_eq!(guess(Path::new("/srv/README"), &config), None);
    }

    #[test]
    fn last_matching_override_wins() {
        let mut config = UserConfig::default();
        config.mime_overrides.insert(r"\.txt$", "text/x-first".to_string());
        config.mime_overrides.insert(r"notes/", "text/x-second".to_string());
        config.mime_overrides.insert(r"[", "text/x-broken".to_string());

        assert_eq!(
            guess(Path::new("/srv/notes/a.txt"), &config).as_deref(),
            Some("text/x-second")
        );
        assert_eq!(
            guess(Path::new("/srv/b.txt"), &config).as_deref(),
            Some("text/x-first")
        );
    }

    #[test]
    fn sniffing() {
        assert_eq!(sniff(b"plain words\n"), "text/plain");
        assert_eq!(sniff(b""), "text/plain");
        assert_eq!(sniff(&"caf\u{e9}".as_bytes()[..4]), "text/plain");
        assert_eq!(sniff(&[0x89, b'P', b'N', b'G', 0, 0]), "application/octet-stream");
        assert_eq!(sniff(&[0xff, 0xfe, 0x41]), "application/octet-stream");
    }

    #[test]
    fn parameters_only_for_gemini() {
        let config = UserConfig {
            default_lang: "en".into(),
            default_encoding: "utf-8".into(),
            ..UserConfig::default()
        };
        assert_eq!(
            with_parameters("text/gemini".into(), &config),
            "text/gemini; charset=utf-8; lang=en"
        );
        assert_eq!(with_parameters("text/plain".into(), &config), "text/plain");
        assert_eq!(
            with_parameters("text/gemini".into(), &UserConfig::default()),
            "text/gemini"
        );
    }
}
