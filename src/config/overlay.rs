//! Per-directory configuration overlays.
//!
//! Any directory below the document root may hold an `.overlay` file using
//! the keys of the `[defaults]` section. For each request the overlays
//! between the root and the requested path are applied root first, so the
//! deepest directory wins: scalars are replaced, tables are merged by key.
//!
//! A broken overlay is logged and skipped, it never fails the request.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::ordered::OrderedTable;
use crate::config::schema::{DirectorySort, UserConfig};
use crate::routing::redirect::is_cross_protocol;
use crate::security::path_guard::is_descendant;

/// File name of overlay descriptors. Never served.
pub const OVERLAY_FILE_NAME: &str = ".overlay";

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Contents of one overlay file. Absent keys inherit.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OverlayFile {
    pub gemini_ext: Option<String>,
    pub default_lang: Option<String>,
    pub default_encoding: Option<String>,
    pub directory_sort: Option<DirectorySort>,
    pub directory_subdirs_first: Option<bool>,
    pub directory_reverse: Option<bool>,
    pub directory_titles: Option<bool>,
    pub temp_redirects: OrderedTable<String>,
    pub perm_redirects: OrderedTable<String>,
    pub mime_overrides: OrderedTable<String>,
    pub certificate_zones: OrderedTable<Vec<String>>,
}

impl OverlayFile {
    pub fn load(path: &Path) -> Result<Self, OverlayError> {
        let content = fs::read_to_string(path).map_err(|source| OverlayError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| OverlayError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Fold this overlay into `config`.
    ///
    /// Redirects to other protocols are dropped with a warning.
    pub fn apply(self, config: &mut UserConfig, source: &Path) {
        if let Some(ext) = self.gemini_ext {
            config.gemini_ext = ext;
        }
        if let Some(lang) = self.default_lang {
            config.default_lang = lang;
        }
        if let Some(encoding) = self.default_encoding {
            config.default_encoding = encoding;
        }
        if let Some(sort) = self.directory_sort {
            config.directory_sort = sort;
        }
        if let Some(flag) = self.directory_subdirs_first {
            config.directory_subdirs_first = flag;
        }
        if let Some(flag) = self.directory_reverse {
            config.directory_reverse = flag;
        }
        if let Some(flag) = self.directory_titles {
            config.directory_titles = flag;
        }

        config
            .temp_redirects
            .merge(same_protocol_only(self.temp_redirects, source));
        config
            .perm_redirects
            .merge(same_protocol_only(self.perm_redirects, source));
        config.mime_overrides.merge(self.mime_overrides);
        config.certificate_zones.merge(self.certificate_zones);
    }
}

fn same_protocol_only(mut rules: OrderedTable<String>, source: &Path) -> OrderedTable<String> {
    rules.retain(|pattern, target| {
        if is_cross_protocol(target) {
            tracing::warn!(
                overlay = %source.display(),
                pattern = %pattern,
                target = %target,
                "Ignoring cross-protocol redirect in overlay"
            );
            false
        } else {
            true
        }
    });
    rules
}

/// Directories from `doc_root` down to `target`, root first.
fn overlay_chain(target: &Path, doc_root: &Path) -> Vec<PathBuf> {
    let mut chain: Vec<PathBuf> = target
        .ancestors()
        .take_while(|dir| is_descendant(dir, doc_root))
        .map(Path::to_path_buf)
        .collect();
    chain.reverse();
    chain
}

/// Compute the effective per-request configuration for `target`.
///
/// `base` is never modified; the result is a fresh copy.
pub fn resolve_overlay(target: &Path, doc_root: &Path, base: &UserConfig) -> UserConfig {
    let mut config = base.clone();

    for dir in overlay_chain(target, doc_root) {
        if !dir.exists() {
            break;
        }

        let overlay_path = dir.join(OVERLAY_FILE_NAME);
        if !overlay_path.is_file() {
            continue;
        }

        match OverlayFile::load(&overlay_path) {
            Ok(overlay) => {
                tracing::debug!(overlay = %overlay_path.display(), "Applying overlay");
                overlay.apply(&mut config, &overlay_path);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable overlay");
            }
        }
    }

    config
}
