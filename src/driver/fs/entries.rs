//! Client entries built from filesystem metadata.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::FileSystemDriver;
use crate::info::{mime_of, Archivers, FileInfo, RootOptions, MIME_DIRECTORY};
use crate::path::file_name;
use crate::volume::Volume;
use crate::Result;

/// Visible children of a directory, each list sorted by path.
#[derive(Debug, Default)]
pub(super) struct Children {
    pub dirs: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
}

impl FileSystemDriver {
    /// Client target of `full`: volume id followed by the encoded relative path.
    pub(super) fn hash_of(&self, volume: &Volume, full: &Path) -> String {
        format!(
            "{}{}",
            volume.volume_id,
            self.codec.encode(&volume.relative_path(full))
        )
    }

    /// Hash of the parent of `full`; roots have none.
    pub(super) fn parent_hash(&self, volume: &Volume, full: &Path) -> Option<String> {
        if volume.is_root(full) {
            return None;
        }
        full.parent().map(|parent| self.hash_of(volume, parent))
    }

    pub(super) fn root_options(&self, volume: &Volume, cwd: &Path) -> RootOptions {
        let tmb_url = volume.thumbnail_directory.as_ref().map(|_| {
            volume
                .thumbnail_url
                .clone()
                .unwrap_or_else(|| self.thumbnail_url.clone())
        });

        RootOptions {
            path: format!("{}{}", volume.name, volume.relative_path(cwd)),
            url: volume.url.clone(),
            tmb_url,
            disabled: self.disabled_commands.clone(),
            separator: volume.separator.to_string(),
            copy_overwrite: u8::from(volume.copy_overwrite),
            upload_overwrite: u8::from(volume.upload_overwrite),
            upload_max_size: volume.max_upload_size,
            archivers: Archivers::default(),
        }
    }

    pub(super) async fn dir_info(&self, volume: &Volume, full: &Path) -> Result<FileInfo> {
        let meta = tokio::fs::metadata(full).await?;
        let attribute = volume.object_attribute(full, true);
        let is_root = volume.is_root(full);
        let has_dirs = self.has_sub_directories(volume, full).await;

        let mut info = FileInfo {
            name: if is_root {
                volume.name.clone()
            } else {
                file_name(full)
            },
            hash: self.hash_of(volume, full),
            phash: self.parent_hash(volume, full),
            mime: MIME_DIRECTORY.to_string(),
            ts: modified_ts(&meta),
            size: 0,
            dirs: Some(u8::from(has_dirs)),
            volumeid: None,
            isroot: None,
            options: None,
            tmb: None,
            read: u8::from(attribute.read),
            write: u8::from(attribute.write),
            locked: u8::from(attribute.locked),
        };

        if is_root {
            info.volumeid = Some(volume.volume_id.clone());
            info.isroot = Some(1);
            info.options = Some(self.root_options(volume, full));
        }

        Ok(info)
    }

    pub(super) async fn file_info(&self, volume: &Volume, full: &Path) -> Result<FileInfo> {
        let meta = tokio::fs::metadata(full).await?;
        let attribute = volume.object_attribute(full, false);

        Ok(FileInfo {
            name: file_name(full),
            hash: self.hash_of(volume, full),
            phash: self.parent_hash(volume, full),
            mime: mime_of(full),
            ts: modified_ts(&meta),
            size: meta.len(),
            dirs: None,
            volumeid: None,
            isroot: None,
            options: None,
            tmb: self.thumbnail_state(volume, full).await,
            read: u8::from(attribute.read),
            write: u8::from(attribute.write),
            locked: u8::from(attribute.locked),
        })
    }

    pub(super) async fn entry_info(
        &self,
        volume: &Volume,
        full: &Path,
        is_directory: bool,
    ) -> Result<FileInfo> {
        if is_directory {
            self.dir_info(volume, full).await
        } else {
            self.file_info(volume, full).await
        }
    }

    /// Visible sub-directories and files of `dir`.
    pub(super) async fn read_children(&self, volume: &Volume, dir: &Path) -> Result<Children> {
        let mut children = Children::default();
        let mut entries = tokio::fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            // Follows symlinks so a linked directory lists as a directory
            let Ok(meta) = tokio::fs::metadata(&path).await else {
                continue;
            };
            let is_dir = meta.is_dir();
            if !volume.object_attribute(&path, is_dir).visible {
                continue;
            }
            if is_dir {
                children.dirs.push(path);
            } else {
                children.files.push(path);
            }
        }

        children.dirs.sort();
        children.files.sort();
        Ok(children)
    }

    async fn has_sub_directories(&self, volume: &Volume, dir: &Path) -> bool {
        let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
            return false;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_dir = tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            if is_dir && volume.object_attribute(&path, true).visible {
                return true;
            }
        }
        false
    }

    /// Sub-directory entries of every ancestor of `dir`, walking up to the root.
    pub(super) async fn parents_tree(&self, volume: &Volume, dir: &Path) -> Result<Vec<FileInfo>> {
        let mut tree = Vec::new();
        let mut current = dir.to_path_buf();

        while !volume.is_root(&current) {
            let Some(parent) = current.parent() else {
                break;
            };
            current = parent.to_path_buf();

            for sub in self.read_children(volume, &current).await?.dirs {
                tree.push(self.dir_info(volume, &sub).await?);
            }
        }

        Ok(tree)
    }
}

fn modified_ts(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .map(|t| DateTime::<Utc>::from(t).timestamp())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Fixture;

    #[tokio::test]
    async fn test_root_info_carries_volume_options() {
        let fx = Fixture::new();
        fx.mkdir("docs");

        let info = fx.driver.dir_info(&fx.volume, fx.root()).await.unwrap();
        assert_eq!(info.hash, "v1_");
        assert_eq!(info.name, "files");
        assert!(info.phash.is_none());
        assert_eq!(info.isroot, Some(1));
        assert_eq!(info.volumeid.as_deref(), Some("v1_"));
        assert_eq!(info.locked, 1);
        assert_eq!(info.dirs, Some(1));
        let options = info.options.unwrap();
        assert_eq!(options.path, "files");
        assert_eq!(options.archivers.create, vec!["application/zip"]);
    }

    #[tokio::test]
    async fn test_file_info() {
        let fx = Fixture::new();
        let path = fx.write("docs/a.txt", b"hello");

        let info = fx.driver.file_info(&fx.volume, &path).await.unwrap();
        assert_eq!(info.name, "a.txt");
        assert_eq!(info.mime, "text/plain");
        assert_eq!(info.size, 5);
        assert_eq!(info.hash, format!("v1_{}", fx.driver.codec().encode("/docs/a.txt")));
        assert_eq!(
            info.phash,
            Some(format!("v1_{}", fx.driver.codec().encode("/docs")))
        );
        assert_eq!((info.read, info.write, info.locked), (1, 1, 0));
        assert!(info.tmb.is_none());
    }

    #[tokio::test]
    async fn test_children_skip_internal_directories() {
        let fx = Fixture::with(|vol| {
            vol.thumbnail_directory = Some(vol.root.join(".tmb"));
        });
        fx.mkdir(".tmb");
        fx.mkdir("b");
        fx.mkdir("a");
        fx.write("z.txt", b"");

        let children = fx.driver.read_children(&fx.volume, fx.root()).await.unwrap();
        let names: Vec<_> = children
            .dirs
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(children.files.len(), 1);
    }

    #[tokio::test]
    async fn test_parents_tree_walks_to_root() {
        let fx = Fixture::new();
        let deep = fx.mkdir("a/b/c");
        fx.mkdir("x");

        let tree = fx.driver.parents_tree(&fx.volume, &deep).await.unwrap();
        let names: Vec<_> = tree.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["c", "b", "a", "x"]);
    }
}
