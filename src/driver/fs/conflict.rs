//! Resolving name collisions at a destination.
//!
//! Precedence when the destination already exists: a name listed in
//! `renames` moves the existing entry aside under a backup name; otherwise a
//! disabled overwrite picks the first free copy name; otherwise the existing
//! entry is replaced, provided it is writable.

use std::path::{Path, PathBuf};

use super::FileSystemDriver;
use crate::driver::hooks::HookPoint;
use crate::path::{file_name, safely_combine, split_name};
use crate::volume::Volume;
use crate::{ConnectorError, Result};

/// Tag used by copy names when no suffix was given.
const COPY_TAG: &str = " copy ";

pub(super) async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

fn parent_of(path: &Path) -> Result<&Path> {
    path.parent().ok_or_else(|| {
        ConnectorError::PermissionDenied("Path must be inside parent".to_string())
    })
}

/// First free `<stem><tag><n><ext>` beside `path` (no extension split for
/// directories).
pub(super) async fn copy_name(path: &Path, suffix: Option<&str>, is_directory: bool) -> Result<String> {
    let parent = parent_of(path)?;
    let name = file_name(path);
    let tag = suffix.filter(|s| !s.is_empty()).unwrap_or(COPY_TAG);
    let (stem, ext) = if is_directory {
        (name.as_str(), "")
    } else {
        split_name(&name)
    };

    let mut n: u64 = 1;
    loop {
        let candidate = format!("{stem}{tag}{n}{ext}");
        if !exists(&parent.join(&candidate)).await {
            return Ok(candidate);
        }
        n += 1;
    }
}

/// `<stem><suffix><ext>`, or the copy name of that when it is taken too.
pub(super) async fn backup_name(path: &Path, suffix: &str, is_directory: bool) -> Result<String> {
    let parent = parent_of(path)?;
    let name = file_name(path);
    let backup = if is_directory {
        format!("{name}{suffix}")
    } else {
        let (stem, ext) = split_name(&name);
        format!("{stem}{suffix}{ext}")
    };

    let backup_path = safely_combine(parent, &[&backup])?;
    if exists(&backup_path).await {
        return copy_name(&backup_path, Some(suffix), is_directory).await;
    }
    Ok(backup)
}

/// Where an incoming entry ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Resolved {
    pub path: PathBuf,
    pub is_overwrite: bool,
    /// Where the previous occupant was moved, when it was backed up.
    pub backup: Option<PathBuf>,
}

impl FileSystemDriver {
    /// Rename the existing entry at `dest` to its backup name.
    pub(super) async fn backup_existing(
        &self,
        dest: &Path,
        suffix: &str,
        is_directory: bool,
    ) -> Result<PathBuf> {
        let backup = backup_name(dest, suffix, is_directory).await?;
        let backup_path = safely_combine(parent_of(dest)?, &[&backup])?;

        self.hooks
            .notify_pair(HookPoint::BeforeRename, dest, &backup_path);
        tokio::fs::rename(dest, &backup_path).await?;
        self.hooks
            .notify_pair(HookPoint::AfterRename, dest, &backup_path);

        Ok(backup_path)
    }

    /// Apply the collision policy to `dest`.
    pub(super) async fn resolve_conflict(
        &self,
        volume: &Volume,
        dest: &Path,
        renames: &[String],
        suffix: &str,
        overwrite: bool,
        is_directory: bool,
    ) -> Result<Resolved> {
        let unchanged = Resolved {
            path: dest.to_path_buf(),
            is_overwrite: false,
            backup: None,
        };

        if !exists(dest).await {
            return Ok(unchanged);
        }

        let name = file_name(dest);
        if renames.iter().any(|r| *r == name) {
            let backup = self.backup_existing(dest, suffix, is_directory).await?;
            return Ok(Resolved {
                backup: Some(backup),
                ..unchanged
            });
        }

        if !overwrite {
            let copy = copy_name(dest, Some(suffix), is_directory).await?;
            return Ok(Resolved {
                path: safely_combine(parent_of(dest)?, &[&copy])?,
                ..unchanged
            });
        }

        if !volume.object_attribute(dest, is_directory).write {
            return Err(ConnectorError::PermissionDenied(format!(
                "Permission denied: {name}"
            )));
        }

        Ok(Resolved {
            is_overwrite: true,
            ..unchanged
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Fixture;
    use super::*;
    use crate::volume::ObjectAttribute;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_copy_name_picks_first_free() {
        let fx = Fixture::new();
        let path = fx.write("a.txt", b"");
        assert_eq!(copy_name(&path, None, false).await.unwrap(), "a copy 1.txt");

        fx.write("a copy 1.txt", b"");
        assert_eq!(copy_name(&path, None, false).await.unwrap(), "a copy 2.txt");
        assert_eq!(copy_name(&path, Some("~"), false).await.unwrap(), "a~1.txt");
    }

    #[tokio::test]
    async fn test_copy_name_of_directory_keeps_dots() {
        let fx = Fixture::new();
        let dir = fx.mkdir("v1.0");
        assert_eq!(copy_name(&dir, None, true).await.unwrap(), "v1.0 copy 1");
    }

    #[tokio::test]
    async fn test_backup_name() {
        let fx = Fixture::new();
        let path = fx.write("a.txt", b"");
        assert_eq!(backup_name(&path, "~", false).await.unwrap(), "a~.txt");

        fx.write("a~.txt", b"");
        assert_eq!(backup_name(&path, "~", false).await.unwrap(), "a~~1.txt");
    }

    #[tokio::test]
    async fn test_resolve_free_destination() {
        let fx = Fixture::new();
        let dest = fx.root().join("new.txt");
        let resolved = fx
            .driver
            .resolve_conflict(&fx.volume, &dest, &[], "~", false, false)
            .await
            .unwrap();
        assert_eq!(resolved.path, dest);
        assert!(!resolved.is_overwrite);
        assert!(resolved.backup.is_none());
    }

    #[tokio::test]
    async fn test_resolve_rename_backs_up_existing() {
        let fx = Fixture::new();
        let dest = fx.write("a.txt", b"old");
        let resolved = fx
            .driver
            .resolve_conflict(&fx.volume, &dest, &["a.txt".to_string()], "~", true, false)
            .await
            .unwrap();

        assert_eq!(resolved.path, dest);
        assert_eq!(resolved.backup, Some(fx.root().join("a~.txt")));
        assert!(!dest.exists());
        assert_eq!(std::fs::read(fx.root().join("a~.txt")).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_resolve_without_overwrite_uses_copy_name() {
        let fx = Fixture::new();
        let dest = fx.write("a.txt", b"old");
        let resolved = fx
            .driver
            .resolve_conflict(&fx.volume, &dest, &[], "", false, false)
            .await
            .unwrap();
        assert_eq!(resolved.path, fx.root().join("a copy 1.txt"));
        assert!(!resolved.is_overwrite);
    }

    #[tokio::test]
    async fn test_resolve_overwrite_requires_write() {
        let fx = Fixture::with(|vol| {
            vol.attribute_rules.push(Arc::new(|path, _| {
                path.ends_with("ro.txt").then_some(ObjectAttribute {
                    write: false,
                    ..ObjectAttribute::default()
                })
            }));
        });
        let writable = fx.write("a.txt", b"");
        let read_only = fx.write("ro.txt", b"");

        let resolved = fx
            .driver
            .resolve_conflict(&fx.volume, &writable, &[], "", true, false)
            .await
            .unwrap();
        assert!(resolved.is_overwrite);

        let err = fx
            .driver
            .resolve_conflict(&fx.volume, &read_only, &[], "", true, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::PermissionDenied(_)));
    }
}
