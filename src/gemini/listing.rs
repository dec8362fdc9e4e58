//! Generated directory listings.
//!
//! Used when a directory has no index document. Hidden entries, entries
//! that are not world-readable and deny-listed files are never listed.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::cmp::Ordering;
use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::time::SystemTime;

use crate::config::{DirectorySort, UserConfig};
use crate::security::path_guard::{is_world_readable, SensitiveFiles};

/// Characters escaped in a single link path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Lines scanned for a document heading.
const TITLE_SCAN_LINES: usize = 16;

#[derive(Debug)]
struct Entry {
    name: String,
    is_dir: bool,
    size: u64,
    modified: SystemTime,
    title: Option<String>,
}

impl Entry {
    fn link(&self) -> String {
        let mut link = utf8_percent_encode(&self.name, SEGMENT).to_string();
        if self.is_dir {
            link.push('/');
        }
        link
    }

    fn label(&self) -> String {
        match (&self.title, self.is_dir) {
            (Some(title), _) => title.clone(),
            (None, true) => format!("{}/", self.name),
            (None, false) => self.name.clone(),
        }
    }
}

/// Render a `text/gemini` listing of `dir`, reachable at `url_path`.
pub fn generate_listing(
    dir: &Path,
    url_path: &str,
    config: &UserConfig,
    sensitive: &SensitiveFiles,
) -> io::Result<String> {
    let mut entries = Vec::new();
    for dirent in fs::read_dir(dir)? {
        let dirent = dirent?;
        let Ok(name) = dirent.file_name().into_string() else {
            continue;
        };
        if name.starts_with('.') || sensitive.contains(&dirent.path()) {
            continue;
        }
        let Ok(meta) = fs::metadata(dirent.path()) else {
            continue;
        };
        if !is_world_readable(&meta) {
            continue;
        }

        let title = if config.directory_titles && !meta.is_dir() && is_native(&name, config) {
            read_title(&dirent.path())
        } else {
            None
        };
        entries.push(Entry {
            is_dir: meta.is_dir(),
            size: meta.len(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            title,
            name,
        });
    }

    sort_entries(&mut entries, config);

    let mut listing = format!("# Listing of {url_path}\n\n");
    if url_path != "/" {
        listing.push_str("=> ../ Up\n");
    }
    for entry in &entries {
        listing.push_str(&format!("=> {} {}\n", entry.link(), entry.label()));
    }
    Ok(listing)
}

fn sort_entries(entries: &mut [Entry], config: &UserConfig) {
    entries.sort_by(|a, b| {
        let primary = match config.directory_sort {
            DirectorySort::Name => Ordering::Equal,
            DirectorySort::Size => a.size.cmp(&b.size),
            DirectorySort::Time => a.modified.cmp(&b.modified),
        };
        primary.then_with(|| a.name.cmp(&b.name))
    });
    if config.directory_reverse {
        entries.reverse();
    }
    if config.directory_subdirs_first {
        // Stable, keeps the order chosen above within each group.
        entries.sort_by_key(|e| !e.is_dir);
    }
}

fn is_native(name: &str, config: &UserConfig) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == config.gemini_ext)
}

fn read_title(path: &Path) -> Option<String> {
    let file = fs::File::open(path).ok()?;
    BufReader::new(file)
        .lines()
        .take(TITLE_SCAN_LINES)
        .map_while(Result::ok)
        .find_map(|line| {
            line.strip_prefix("# ")
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
        })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write(dir: &Path, name: &str, content: &str, mode: u32) {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
    }

    fn links(listing: &str) -> Vec<&str> {
        listing
            .lines()
            .filter_map(|l| l.strip_prefix("=> "))
            .filter(|l| !l.starts_with("../"))
            .collect()
    }

    fn render(dir: &Path, url_path: &str, config: &UserConfig) -> String {
        generate_listing(dir, url_path, config, &SensitiveFiles::default()).unwrap()
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.gmi", "# Bravo page\nbody\n", 0o644);
        write(dir.path(), "a.txt", "some longer text here", 0o644);
        write(dir.path(), ".hidden", "x", 0o644);
        write(dir.path(), "private.gmi", "x", 0o600);
        write(dir.path(), "with space.gmi", "no heading", 0o644);
        let sub = dir.path().join("zdir");
        fs::create_dir(&sub).unwrap();
        fs::set_permissions(&sub, fs::Permissions::from_mode(0o755)).unwrap();
        dir
    }

    #[test]
    fn lists_visible_entries_by_name() {
        let dir = fixture();
        let listing = render(dir.path(), "/docs/", &UserConfig::default());

        assert!(listing.starts_with("# Listing of /docs/\n\n=> ../ Up\n"));
        assert_eq!(
            links(&listing),
            vec![
                "a.txt a.txt",
                "b.gmi b.gmi",
                "with%20space.gmi with space.gmi",
                "zdir/ zdir/",
            ]
        );
    }

    #[test]
    fn root_has_no_up_link() {
        let dir = fixture();
        let listing = render(dir.path(), "/", &UserConfig::default());
        assert!(!listing.contains("=> ../ Up"));
    }

    #[test]
    fn subdirs_first_and_reverse() {
        let dir = fixture();
        let config = UserConfig {
            directory_reverse: true,
            directory_subdirs_first: true,
            ..UserConfig::default()
        };
        let listing = render(dir.path(), "/", &config);
        let names: Vec<&str> = links(&listing)
            .into_iter()
            .map(|l| l.split(' ').next().unwrap())
            .collect();
        assert_eq!(names, vec!["zdir/", "with%20space.gmi", "b.gmi", "a.txt"]);
    }

    #[test]
    fn sort_by_size() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "big", "0123456789", 0o644);
        write(dir.path(), "small", "0", 0o644);
        let config = UserConfig {
            directory_sort: DirectorySort::Size,
            ..UserConfig::default()
        };
        let listing = render(dir.path(), "/", &config);
        assert_eq!(links(&listing), vec!["small small", "big big"]);
    }

    #[test]
    fn titles_from_first_heading() {
        let dir = fixture();
        let config = UserConfig {
            directory_titles: true,
            ..UserConfig::default()
        };
        let listing = render(dir.path(), "/", &config);
        assert!(listing.contains("=> b.gmi Bravo page\n"));
        assert!(listing.contains("=> with%20space.gmi with space.gmi\n"));
    }

    #[test]
    fn deny_listed_files_are_not_listed() {
        let dir = fixture();
        write(dir.path(), "key.pem", "KEY", 0o644);
        let mut server = crate::config::ServerConfig::default();
        server.tls.key_path = dir.path().join("key.pem");
        let sensitive = SensitiveFiles::from_config(&server);

        let listing =
            generate_listing(dir.path(), "/", &UserConfig::default(), &sensitive).unwrap();
        assert!(!listing.contains("key.pem"));
        assert!(listing.contains("=> b.gmi"));
    }
}
