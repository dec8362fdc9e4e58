//! Request path to filesystem path mapping.
//!
//! # Responsibilities
//! - Map URL paths (including `/~user` home trees) below the document root
//! - Normalize lexically, never walking above the document root
//! - Follow symlinks one hop at a time, refusing escapes from the root
//! - Refuse the sensitive-file deny-list at every hop
//!
//! # Design Decisions
//! - Every failure collapses to "not found" for the client; the reason is
//!   only visible in the error log
//! - Descendant test runs on fully resolved paths against the resolved root

use std::fs::{self, Metadata};
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

use crate::config::overlay::OVERLAY_FILE_NAME;
use crate::config::schema::{ServerConfig, SiteConfig};

/// Upper bound on symlink hops followed for a single request.
const MAX_LINK_HOPS: usize = 40;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path} resolves outside the document root")]
    Escape { path: PathBuf },

    #[error("{path} is on the sensitive-file deny-list")]
    Sensitive { path: PathBuf },

    #[error("too many symlink hops resolving {path}")]
    TooManyLinks { path: PathBuf },
}

/// Lexically normalize a path: drop `.` segments and redundant separators,
/// and apply `..` segments without consulting the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Join `relative` onto `root`; `..` segments never climb above `root`.
fn join_within(root: &Path, relative: &str) -> PathBuf {
    let mut out = root.to_path_buf();
    let floor = out.components().count();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if out.components().count() > floor {
                    out.pop();
                }
            }
            name => out.push(name),
        }
    }
    out
}

/// Map a decoded URL path to its logical filesystem path.
///
/// `/~user/rest` maps into `<doc_root>/<home_doc_root>/user/rest`; every other
/// path is joined directly to the document root.
pub fn resolve(request_path: &str, site: &SiteConfig) -> PathBuf {
    match request_path.strip_prefix("/~") {
        Some(rest) => {
            let (user, remainder) = rest.split_once('/').unwrap_or((rest, ""));
            let home = join_within(&site.doc_root, &site.home_doc_root.to_string_lossy());
            let user_root = join_within(&home, user);
            join_within(&user_root, remainder)
        }
        None => join_within(&site.doc_root, request_path),
    }
}

/// True when `candidate` is `root` or lies below it.
pub fn is_descendant(candidate: &Path, root: &Path) -> bool {
    match candidate.strip_prefix(root) {
        Ok(relative) => !relative
            .components()
            .any(|c| matches!(c, Component::ParentDir)),
        Err(_) => false,
    }
}

/// True when the owner, group and other read bits are all set.
#[cfg(unix)]
pub fn is_world_readable(meta: &Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o444 == 0o444
}

#[cfg(not(unix))]
pub fn is_world_readable(_meta: &Metadata) -> bool {
    true
}

/// Paths that must never be served even when they sit inside the root.
#[derive(Debug, Clone, Default)]
pub struct SensitiveFiles {
    paths: Vec<PathBuf>,
}

impl SensitiveFiles {
    pub fn from_config(config: &ServerConfig) -> Self {
        let mut paths = vec![config.tls.cert_path.clone(), config.tls.key_path.clone()];
        for log in [&config.logging.access_log, &config.logging.error_log] {
            if !log.is_empty() && log != "-" {
                paths.push(PathBuf::from(log));
            }
        }

        // Match both the configured spelling and the resolved location.
        let resolved: Vec<PathBuf> = paths
            .iter()
            .filter_map(|p| fs::canonicalize(p).ok())
            .collect();
        paths.extend(resolved);

        Self { paths }
    }

    pub fn contains(&self, path: &Path) -> bool {
        if path.file_name().is_some_and(|name| name == OVERLAY_FILE_NAME) {
            return true;
        }
        self.paths.iter().any(|p| p == path)
    }
}

/// Symlink-escape and deny-list guard for one document root.
#[derive(Debug, Clone)]
pub struct PathGuard {
    real_root: PathBuf,
    sensitive: SensitiveFiles,
}

impl PathGuard {
    /// Build a guard, resolving the document root on disk.
    pub fn new(config: &ServerConfig) -> io::Result<Self> {
        Ok(Self {
            real_root: fs::canonicalize(&config.server.doc_root)?,
            sensitive: SensitiveFiles::from_config(config),
        })
    }

    pub fn real_root(&self) -> &Path {
        &self.real_root
    }

    pub fn sensitive_files(&self) -> &SensitiveFiles {
        &self.sensitive
    }

    /// Follow symlinks from `path` until a fixed point, checking each hop.
    ///
    /// Returns the fully resolved path when it exists, is not on the
    /// deny-list and lies below the resolved document root.
    pub fn secure_resolve(&self, path: &Path) -> Result<PathBuf, ResolveError> {
        let mut current = path.to_path_buf();

        for _ in 0..MAX_LINK_HOPS {
            if self.sensitive.contains(&current) {
                return Err(ResolveError::Sensitive { path: current });
            }

            let meta = fs::symlink_metadata(&current).map_err(|source| ResolveError::Io {
                path: current.clone(),
                source,
            })?;

            let next = if meta.file_type().is_symlink() {
                let target = fs::read_link(&current).map_err(|source| ResolveError::Io {
                    path: current.clone(),
                    source,
                })?;
                let parent = current.parent().unwrap_or_else(|| Path::new("/"));
                normalize(&parent.join(target))
            } else {
                // Resolves any symlinked ancestor directories.
                fs::canonicalize(&current).map_err(|source| ResolveError::Io {
                    path: current.clone(),
                    source,
                })?
            };

            if next == current {
                if !is_descendant(&current, &self.real_root) {
                    return Err(ResolveError::Escape { path: current });
                }
                return Ok(current);
            }

            tracing::trace!(from = %current.display(), to = %next.display(), "Following link");
            current = next;
        }

        Err(ResolveError::TooManyLinks {
            path: path.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(root: &Path) -> SiteConfig {
        SiteConfig {
            doc_root: root.to_path_buf(),
            ..SiteConfig::default()
        }
    }

    fn guard_for(root: &Path) -> PathGuard {
        let mut config = ServerConfig::default();
        config.server.doc_root = root.to_path_buf();
        config.tls.key_path = root.join("key.pem");
        config.tls.cert_path = root.join("cert.pem");
        PathGuard::new(&config).unwrap()
    }

    #[test]
    fn resolves_plain_paths_under_root() {
        let site = site(Path::new("/srv/gemini"));
        assert_eq!(resolve("/", &site), PathBuf::from("/srv/gemini"));
        assert_eq!(
            resolve("/docs//./index.gmi", &site),
            PathBuf::from("/srv/gemini/docs/index.gmi")
        );
    }

    #[test]
    fn resolves_home_directories() {
        let site = site(Path::new("/srv/gemini"));
        assert_eq!(
            resolve("/~alice/notes/today.gmi", &site),
            PathBuf::from("/srv/gemini/users/alice/notes/today.gmi")
        );
        assert_eq!(
            resolve("/~bob", &site),
            PathBuf::from("/srv/gemini/users/bob")
        );
    }

    #[test]
    fn parent_segments_never_leave_root() {
        let site = site(Path::new("/srv/gemini"));
        assert_eq!(
            resolve("/../../etc/passwd", &site),
            PathBuf::from("/srv/gemini/etc/passwd")
        );
        assert_eq!(
            resolve("/~../../x", &site),
            PathBuf::from("/srv/gemini/users/x")
        );
    }

    #[test]
    fn normalize_collapses_segments() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
    }

    #[test]
    fn descendant_test() {
        let root = Path::new("/srv/gemini");
        assert!(is_descendant(Path::new("/srv/gemini"), root));
        assert!(is_descendant(Path::new("/srv/gemini/a/b"), root));
        assert!(!is_descendant(Path::new("/srv/gemini-other"), root));
        assert!(!is_descendant(Path::new("/etc/passwd"), root));
    }

    #[test]
    fn overlay_files_are_sensitive() {
        let files = SensitiveFiles::default();
        assert!(files.contains(Path::new("/srv/gemini/docs/.overlay")));
        assert!(!files.contains(Path::new("/srv/gemini/docs/index.gmi")));
    }

    #[cfg(unix)]
    #[test]
    fn follows_links_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("real.gmi"), "# hi\n").unwrap();
        std::os::unix::fs::symlink("real.gmi", root.join("alias.gmi")).unwrap();

        let guard = guard_for(root);
        let resolved = guard.secure_resolve(&root.join("alias.gmi")).unwrap();
        assert_eq!(resolved, guard.real_root().join("real.gmi"));
    }

    #[cfg(unix)]
    #[test]
    fn refuses_links_out_of_root() {
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("secret.txt"), "secret").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), root.join("leak.txt"))
            .unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("leakdir")).unwrap();

        let guard = guard_for(root);
        assert!(matches!(
            guard.secure_resolve(&root.join("leak.txt")),
            Err(ResolveError::Escape { .. })
        ));
        assert!(matches!(
            guard.secure_resolve(&root.join("leakdir/secret.txt")),
            Err(ResolveError::Escape { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn refuses_links_onto_sensitive_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("key.pem"), "key").unwrap();
        std::os::unix::fs::symlink("key.pem", root.join("innocent.txt")).unwrap();

        let guard = guard_for(root);
        assert!(matches!(
            guard.secure_resolve(&root.join("innocent.txt")),
            Err(ResolveError::Sensitive { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn link_loops_terminate() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::os::unix::fs::symlink("b", root.join("a")).unwrap();
        std::os::unix::fs::symlink("a", root.join("b")).unwrap();

        let guard = guard_for(root);
        assert!(guard.secure_resolve(&root.join("a")).is_err());
    }

    #[test]
    fn missing_files_are_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        let guard = guard_for(dir.path());
        assert!(matches!(
            guard.secure_resolve(&dir.path().join("absent.gmi")),
            Err(ResolveError::Io { .. })
        ));
    }
}
