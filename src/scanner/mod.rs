//! File discovery: recursive folder walk with symlink cycle protection.

pub mod filename;
pub mod metadata;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Outcome of enumerating a folder.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Audio files in deterministic (sorted) order.
    pub files: Vec<PathBuf>,
    /// Entries the walker could not read.
    pub unreadable: Vec<(PathBuf, String)>,
}

/// Recursively enumerate the audio files under `root`.
///
/// Symlinks are followed; revisits of the same underlying file or directory
/// (cycles, double links) are dropped by identity. Extensions are matched
/// case-insensitively against `extensions`. The result is sorted by path so
/// downstream ordering is deterministic.
pub fn discover(root: &Path, extensions: &[String]) -> Discovery {
    let mut discovery = Discovery::default();
    let mut seen: HashSet<FileIdentity> = HashSet::new();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.to_path_buf());
                // walkdir reports symlink loops as errors; those are
                // expected under follow_links and not a caller problem.
                if e.loop_ancestor().is_some() {
                    log::debug!("symlink cycle at {}", path.display());
                } else {
                    log::warn!("cannot read {}: {}", path.display(), e);
                    discovery.unreadable.push((path, e.to_string()));
                }
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let ext = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if !extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
            continue;
        }

        match FileIdentity::of(entry.path()) {
            Ok(identity) => {
                if !seen.insert(identity) {
                    log::debug!("duplicate identity, skipping {}", entry.path().display());
                    continue;
                }
            }
            Err(e) => {
                discovery
                    .unreadable
                    .push((entry.path().to_path_buf(), e.to_string()));
                continue;
            }
        }

        discovery.files.push(entry.path().to_path_buf());
    }

    discovery.files.sort();
    discovery
}

/// Identity of a file independent of the path it was reached through.
#[derive(Debug, PartialEq, Eq, Hash)]
enum FileIdentity {
    #[cfg(unix)]
    Inode(u64, u64),
    #[cfg(not(unix))]
    Canonical(PathBuf),
}

impl FileIdentity {
    fn of(path: &Path) -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let meta = std::fs::metadata(path)?;
            Ok(Self::Inode(meta.dev(), meta.ino()))
        }
        #[cfg(not(unix))]
        {
            Ok(Self::Canonical(std::fs::canonicalize(path)?))
        }
    }
}
