//! Local tree walking
//!
//! The synchronizer reads the local side through [`LocalWalker`] so callers
//! can substitute their own tree source. [`FsWalker`] walks the real
//! filesystem.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{FtpError, Result};
use crate::retry::BoxFuture;

/// One file or directory below a local root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    /// Path relative to the root, `/`-separated.
    pub path: String,
    pub size: u64,
    pub modified_time: Option<DateTime<Utc>>,
    pub is_directory: bool,
}

/// Source of local tree entries.
pub trait LocalWalker: Send + Sync {
    /// Every entry below `root`, at most `max_depth` directory levels deep.
    fn walk<'a>(&'a self, root: &'a Path, max_depth: usize) -> BoxFuture<'a, Result<Vec<LocalEntry>>>;
}

/// Walks the local filesystem.
///
/// Symbolic links are followed; a directory reached twice (by canonical
/// path) is only descended once.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsWalker;

impl LocalWalker for FsWalker {
    fn walk<'a>(&'a self, root: &'a Path, max_depth: usize) -> BoxFuture<'a, Result<Vec<LocalEntry>>> {
        Box::pin(walk_fs(root.to_path_buf(), max_depth))
    }
}

async fn walk_fs(root: PathBuf, max_depth: usize) -> Result<Vec<LocalEntry>> {
    let mut visited: HashSet<PathBuf> = HashSet::new();
    let mut pending = vec![(root, String::new(), 0usize)];
    let mut entries = Vec::new();

    while let Some((directory, relative, depth)) = pending.pop() {
        let canonical = tokio::fs::canonicalize(&directory)
            .await
            .map_err(|e| FtpError::local(&directory, e))?;
        if !visited.insert(canonical) {
            debug!("Skipping already visited {}", directory.display());
            continue;
        }

        let mut reader = tokio::fs::read_dir(&directory)
            .await
            .map_err(|e| FtpError::local(&directory, e))?;
        while let Some(item) = reader
            .next_entry()
            .await
            .map_err(|e| FtpError::local(&directory, e))?
        {
            let path = item.path();
            let metadata = match tokio::fs::metadata(&path).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Skipping unreadable {}: {}", path.display(), e);
                    continue;
                }
            };
            let name = item.file_name().to_string_lossy().into_owned();
            let child = if relative.is_empty() {
                name
            } else {
                format!("{}/{}", relative, name)
            };

            if metadata.is_dir() {
                if depth + 1 < max_depth {
                    pending.push((path, child.clone(), depth + 1));
                } else {
                    warn!("Depth limit reached at {}, not descending", child);
                }
            } else if !metadata.is_file() {
                debug!("Skipping special file {}", path.display());
                continue;
            }

            entries.push(LocalEntry {
                path: child,
                size: if metadata.is_dir() { 0 } else { metadata.len() },
                modified_time: metadata.modified().ok().map(DateTime::<Utc>::from),
                is_directory: metadata.is_dir(),
            });
        }
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

/// Local path of a `/`-separated relative path below `root`.
pub fn local_path(root: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |path, part| path.join(part))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn walks_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"0123456789").unwrap();
        fs::create_dir_all(dir.path().join("sub/deeper")).unwrap();
        fs::write(dir.path().join("sub/b.txt"), b"abc").unwrap();
        fs::write(dir.path().join("sub/deeper/c.txt"), b"").unwrap();

        let entries = FsWalker.walk(dir.path(), 32).await.unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["a.txt", "sub", "sub/b.txt", "sub/deeper", "sub/deeper/c.txt"]
        );

        let a = &entries[0];
        assert_eq!(a.size, 10);
        assert!(!a.is_directory);
        assert!(a.modified_time.is_some());
        assert!(entries[1].is_directory);
    }

    #[tokio::test]
    async fn respects_depth_limit() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.txt"), b"abc").unwrap();

        let entries = FsWalker.walk(dir.path(), 1).await.unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["sub"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn link_cycles_terminate() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("sub/loop")).unwrap();

        let entries = FsWalker.walk(dir.path(), 32).await.unwrap();
        assert!(entries.iter().any(|e| e.path == "sub/loop"));
        assert!(!entries.iter().any(|e| e.path.starts_with("sub/loop/")));
    }

    #[test]
    fn maps_relative_paths() {
        let path = local_path(Path::new("/tmp/root"), "a/b.txt");
        assert_eq!(path, Path::new("/tmp/root").join("a").join("b.txt"));
    }
}
