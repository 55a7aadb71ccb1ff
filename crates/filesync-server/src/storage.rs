//! Logical-path resolution under the mount root and on-demand directory
//! enumeration. Listings and hashes are computed fresh on every call;
//! there is no metadata cache to invalidate.

use std::fs;
use std::path::{Path, PathBuf};

use filesync_core::hash::file_sha256;
use filesync_core::StoreError;
use tracing::debug;

/// A directory child as reported by `Mount::list`.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Logical path relative to the mount root.
    pub path: String,
    pub is_dir: bool,
    /// Hex SHA-256 of the content; empty for directories.
    pub hash: String,
}

/// The server's view of the canonical file tree: a single directory root
/// that all logical paths resolve under.
pub struct Mount {
    root: PathBuf,
}

impl Mount {
    /// Open (creating if needed) the mount root.
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a logical path to its filesystem location under the root.
    /// Leading separators are stripped so absolute-looking inputs cannot
    /// escape the mount.
    pub fn resolve(&self, logical: &str) -> PathBuf {
        self.root.join(logical.trim_start_matches(['/', '\\']))
    }

    /// Turn a filesystem location back into a logical path.
    fn logical(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Enumerate the immediate children of a logical directory, each
    /// tagged with is-directory and content hash. Distinguishes a missing
    /// path from a non-directory one.
    pub fn list(&self, logical: &str) -> Result<Vec<Entry>, StoreError> {
        let dir = self.resolve(logical);

        if !dir.exists() {
            return Err(StoreError::NotFound(logical.to_string()));
        }
        if !dir.is_dir() {
            return Err(StoreError::Precondition(format!(
                "path is not a directory: {logical}"
            )));
        }

        let mut entries = Vec::new();
        for child in fs::read_dir(&dir)? {
            let child = child?;
            let path = child.path();
            let is_dir = path.is_dir();
            let hash = if is_dir {
                String::new()
            } else {
                file_sha256(&path).unwrap_or_default()
            };
            entries.push(Entry {
                path: self.logical(&path),
                is_dir,
                hash,
            });
        }

        debug!(path = %logical, count = entries.len(), "listed directory");
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_strips_leading_separators() {
        let dir = tempfile::tempdir().unwrap();
        let mount = Mount::new(dir.path()).unwrap();
        assert_eq!(mount.resolve("/a/b.txt"), dir.path().join("a/b.txt"));
        assert_eq!(mount.resolve("a/b.txt"), dir.path().join("a/b.txt"));
    }

    #[test]
    fn list_missing_and_non_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mount = Mount::new(dir.path()).unwrap();

        assert!(matches!(
            mount.list("nope"),
            Err(StoreError::NotFound(_))
        ));

        fs::write(dir.path().join("file.txt"), b"x").unwrap();
        assert!(matches!(
            mount.list("file.txt"),
            Err(StoreError::Precondition(_))
        ));
    }

    #[test]
    fn list_tags_children() {
        let dir = tempfile::tempdir().unwrap();
        let mount = Mount::new(dir.path()).unwrap();

        fs::create_dir_all(dir.path().join("docs/sub")).unwrap();
        fs::write(dir.path().join("docs/a.txt"), b"alpha").unwrap();

        let mut entries = mount.list("docs").unwrap();
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "docs/a.txt");
        assert!(!entries[0].is_dir);
        assert!(!entries[0].hash.is_empty());
        assert_eq!(entries[1].path, "docs/sub");
        assert!(entries[1].is_dir);
        assert!(entries[1].hash.is_empty());
    }
}
