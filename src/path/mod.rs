//! Path addressing: hashes, containment-checked joins and resolved targets.

pub mod codec;
pub mod safe;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::volume::{ObjectAttribute, Volume};

pub use codec::{IdentityCipher, PathCipher, PathCodec};
pub use safe::{is_name_valid, normalize_path, relative_to, resolve_under, safely_combine};

/// A filesystem entry, tagged with the kind it was resolved as.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Entry {
    File(PathBuf),
    Directory(PathBuf),
}

impl Entry {
    pub fn path(&self) -> &Path {
        match self {
            Entry::File(p) | Entry::Directory(p) => p,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Entry::Directory(_))
    }

    /// Last path segment, or an empty string for a bare root.
    pub fn name(&self) -> String {
        file_name(self.path())
    }

    /// Whether the entry exists on disk with its tagged kind.
    pub async fn exists(&self) -> bool {
        match tokio::fs::metadata(self.path()).await {
            Ok(meta) => meta.is_dir() == self.is_directory(),
            Err(_) => false,
        }
    }
}

/// Last segment of `path` as an owned string.
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `(stem, extension)` split where the extension keeps its leading dot.
pub fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

/// A resolved client target.
#[derive(Clone)]
pub struct PathInfo {
    /// Decoded relative path (`""` for the root).
    pub path: String,
    pub volume: Arc<Volume>,
    pub entry: Entry,
    /// Client-facing target (`<volumeId><hash>`).
    pub hash: String,
}

impl std::fmt::Debug for PathInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathInfo")
            .field("path", &self.path)
            .field("volume", &self.volume.volume_id)
            .field("entry", &self.entry)
            .field("hash", &self.hash)
            .finish()
    }
}

impl PathInfo {
    pub fn new(path: String, volume: Arc<Volume>, entry: Entry, hash: String) -> Self {
        Self {
            path,
            volume,
            entry,
            hash,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.entry.is_directory()
    }

    pub fn is_root(&self) -> bool {
        self.volume.is_root(self.entry.path())
    }

    pub fn full_path(&self) -> &Path {
        self.entry.path()
    }

    pub fn name(&self) -> String {
        self.entry.name()
    }

    pub fn attribute(&self) -> ObjectAttribute {
        self.volume
            .object_attribute(self.entry.path(), self.entry.is_directory())
    }

    pub fn same_volume(&self, other: &PathInfo) -> bool {
        self.volume.volume_id == other.volume.volume_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("a.txt"), ("a", ".txt"));
        assert_eq!(split_name("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_name("README"), ("README", ""));
        assert_eq!(split_name(".hidden"), (".hidden", ""));
    }

    #[test]
    fn test_entry_kind() {
        let file = Entry::File(PathBuf::from("/vol/a.txt"));
        let dir = Entry::Directory(PathBuf::from("/vol/docs"));
        assert!(!file.is_directory());
        assert!(dir.is_directory());
        assert_eq!(file.name(), "a.txt");
        assert_eq!(dir.name(), "docs");
    }

    #[tokio::test]
    async fn test_entry_exists_checks_kind() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a.txt");
        std::fs::write(&file_path, b"x").unwrap();

        assert!(Entry::File(file_path.clone()).exists().await);
        assert!(!Entry::Directory(file_path).exists().await);
        assert!(Entry::Directory(dir.path().to_path_buf()).exists().await);
        assert!(!Entry::File(dir.path().join("missing")).exists().await);
    }
}
