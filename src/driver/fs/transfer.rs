//! Copying and moving entries: paste and duplicate.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use super::conflict::{copy_name, exists};
use super::ops::require_dir;
use super::{check_cancelled, FileSystemDriver};
use crate::command::{DuplicateCommand, PasteCommand};
use crate::driver::hooks::{DriverEvent, HookPoint};
use crate::path::{file_name, is_name_valid, safely_combine};
use crate::response::{AddedResponse, ChangeResponse};
use crate::volume::Volume;
use crate::{ConnectorError, Result};

/// `EXDEV`: rename across filesystems.
const CROSS_DEVICE: i32 = 18;

fn permission_denied() -> ConnectorError {
    ConnectorError::PermissionDenied(String::new())
}

/// Copy every file of `src` into `dest`, creating directories as needed.
async fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    let mut queue = VecDeque::from([(src.to_path_buf(), dest.to_path_buf())]);
    while let Some((dir, target)) = queue.pop_front() {
        tokio::fs::create_dir_all(&target).await?;
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let to = target.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                queue.push_back((entry.path(), to));
            } else {
                tokio::fs::copy(entry.path(), &to).await?;
            }
        }
    }
    Ok(())
}

/// Rename, falling back to copy and delete when `src` and `dest` live on
/// different filesystems.
async fn move_path(src: &Path, dest: &Path, is_directory: bool) -> Result<()> {
    match tokio::fs::rename(src, dest).await {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(CROSS_DEVICE) => {
            tracing::debug!(src = %src.display(), dest = %dest.display(), "Moving across devices");
            if is_directory {
                copy_tree(src, dest).await?;
                tokio::fs::remove_dir_all(src).await?;
            } else {
                tokio::fs::copy(src, dest).await?;
                tokio::fs::remove_file(src).await?;
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Whether `dest` is `src` itself or lies somewhere below it.
fn is_within(src: &Path, dest: &Path) -> bool {
    dest.starts_with(src)
}

impl FileSystemDriver {
    /// Copy a file into `dir`, picking a copy name when the name is taken and
    /// `overwrite` is off.
    pub(super) async fn safe_copy(
        &self,
        src_volume: &Volume,
        file: &Path,
        dir: &Path,
        overwrite: bool,
        suffix: Option<&str>,
    ) -> Result<PathBuf> {
        if !src_volume.object_attribute(file, false).can_copy() {
            return Err(permission_denied());
        }

        let mut dest = safely_combine(dir, &[file_name(file)])?;
        let mut is_overwrite = true;
        if exists(&dest).await && !overwrite {
            let name = copy_name(&dest, suffix, false).await?;
            dest = safely_combine(dir, &[name])?;
            is_overwrite = false;
        }

        self.hooks
            .emit(DriverEvent::pair(HookPoint::BeforeCopy, file, &dest).overwrite(is_overwrite));
        tokio::fs::copy(file, &dest).await?;
        self.hooks
            .emit(DriverEvent::pair(HookPoint::AfterCopy, file, &dest).overwrite(is_overwrite));

        Ok(dest)
    }

    /// Move a file into `dir`. An existing destination is replaced when
    /// `overwrite` is on, otherwise the file lands under a copy name.
    pub(super) async fn safe_move(
        &self,
        src_volume: &Volume,
        file: &Path,
        dir: &Path,
        overwrite: bool,
        suffix: Option<&str>,
    ) -> Result<PathBuf> {
        if !src_volume.object_attribute(file, false).can_move() {
            return Err(permission_denied());
        }

        let mut dest = safely_combine(dir, &[file_name(file)])?;
        if exists(&dest).await {
            if overwrite {
                self.hooks
                    .emit(DriverEvent::pair(HookPoint::BeforeMove, file, &dest).overwrite(true));

                self.hooks
                    .emit(DriverEvent::pair(HookPoint::BeforeCopy, file, &dest).overwrite(true));
                tokio::fs::copy(file, &dest).await?;
                self.hooks
                    .emit(DriverEvent::pair(HookPoint::AfterCopy, file, &dest).overwrite(true));

                self.hooks.notify(HookPoint::BeforeRemove, file);
                tokio::fs::remove_file(file).await?;
                self.hooks.notify(HookPoint::AfterRemove, file);

                self.hooks
                    .emit(DriverEvent::pair(HookPoint::AfterMove, file, &dest).overwrite(true));
                return Ok(dest);
            }

            let name = copy_name(&dest, suffix, false).await?;
            dest = safely_combine(dir, &[name])?;
        }

        self.hooks
            .emit(DriverEvent::pair(HookPoint::BeforeMove, file, &dest));
        move_path(file, &dest, false).await?;
        self.hooks
            .emit(DriverEvent::pair(HookPoint::AfterMove, file, &dest));

        Ok(dest)
    }

    /// Breadth-first walk of `src` into `dest`, handing every file to
    /// `safe_move` (merge) or `safe_copy`.
    #[allow(clippy::too_many_arguments)]
    async fn transfer_tree(
        &self,
        src_volume: &Volume,
        dest_volume: &Volume,
        src: &Path,
        dest: &Path,
        overwrite: bool,
        is_move: bool,
        token: &CancellationToken,
    ) -> Result<()> {
        let attribute = src_volume.object_attribute(src, true);
        let allowed = if is_move {
            attribute.can_move()
        } else {
            attribute.can_copy()
        };
        let parent = dest.parent().ok_or_else(permission_denied)?;
        if !allowed || !dest_volume.object_attribute(parent, true).can_create_object() {
            return Err(permission_denied());
        }
        if is_within(src, dest) {
            return Err(permission_denied());
        }
        if tokio::fs::metadata(dest).await.is_ok_and(|m| !m.is_dir()) {
            return Err(ConnectorError::Exists(file_name(dest)));
        }

        let mut queue = VecDeque::from([(src.to_path_buf(), dest.to_path_buf())]);
        while let Some((dir, target)) = queue.pop_front() {
            check_cancelled(token)?;

            if !exists(&target).await {
                self.hooks.notify(HookPoint::BeforeMakeDir, &target);
                tokio::fs::create_dir(&target).await?;
                self.hooks.notify(HookPoint::AfterMakeDir, &target);
            }

            let children = self.read_children(src_volume, &dir).await?;
            for sub in children.dirs {
                let sub_target = safely_combine(&target, &[file_name(&sub)])?;
                queue.push_back((sub, sub_target));
            }
            for file in children.files {
                if is_move {
                    self.safe_move(src_volume, &file, &target, overwrite, None)
                        .await?;
                } else {
                    self.safe_copy(src_volume, &file, &target, overwrite, None)
                        .await?;
                }
            }
        }

        Ok(())
    }
}

pub(super) async fn paste(
    driver: &FileSystemDriver,
    cmd: &PasteCommand,
    token: &CancellationToken,
) -> Result<ChangeResponse> {
    check_cancelled(token)?;
    if cmd
        .renames
        .iter()
        .any(|name| !is_name_valid(Some(name.as_str())))
        || !is_name_valid(Some(cmd.suffix.as_str()))
    {
        return Err(ConnectorError::InvalidFileName);
    }

    let dst = &cmd.dst;
    let dst_dir = require_dir(dst)?;
    let dst_volume = &dst.volume;
    if !dst.attribute().can_create_object() {
        return Err(permission_denied());
    }
    let overwrite = dst_volume.copy_overwrite;
    let mut response = ChangeResponse::default();

    for src in &cmd.targets.targets {
        check_cancelled(token)?;
        let src_path = src.full_path();
        let src_volume = &src.volume;
        let dest = safely_combine(dst_dir, &[src.name()])?;
        let mut dest_exists = exists(&dest).await;

        if dest_exists && cmd.renames.contains(&src.name()) {
            let backup = driver
                .backup_existing(&dest, &cmd.suffix, src.is_directory())
                .await?;
            response
                .added
                .push(driver.entry_info(dst_volume, &backup, src.is_directory()).await?);
            dest_exists = false;
        }

        if src.is_directory() {
            if cmd.cut {
                if !src.attribute().can_move() {
                    return Err(permission_denied());
                }
                driver.remove_thumbs(src).await;

                if dest_exists {
                    driver
                        .hooks
                        .emit(DriverEvent::pair(HookPoint::BeforeMove, src_path, &dest).overwrite(true));
                    driver
                        .transfer_tree(src_volume, dst_volume, src_path, &dest, overwrite, true, token)
                        .await?;
                    driver.hooks.notify(HookPoint::BeforeRemove, src_path);
                    tokio::fs::remove_dir_all(src_path).await?;
                    driver.hooks.notify(HookPoint::AfterRemove, src_path);
                    driver
                        .hooks
                        .emit(DriverEvent::pair(HookPoint::AfterMove, src_path, &dest).overwrite(true));
                } else {
                    if is_within(src_path, &dest) {
                        return Err(permission_denied());
                    }
                    driver
                        .hooks
                        .emit(DriverEvent::pair(HookPoint::BeforeMove, src_path, &dest));
                    move_path(src_path, &dest, true).await?;
                    driver
                        .hooks
                        .emit(DriverEvent::pair(HookPoint::AfterMove, src_path, &dest));
                }

                response.removed.push(src.hash.clone());
            } else {
                driver
                    .hooks
                    .emit(DriverEvent::pair(HookPoint::BeforeCopy, src_path, &dest).overwrite(true));
                driver
                    .transfer_tree(src_volume, dst_volume, src_path, &dest, overwrite, false, token)
                    .await?;
                driver
                    .hooks
                    .emit(DriverEvent::pair(HookPoint::AfterCopy, src_path, &dest).overwrite(true));
            }

            response.added.push(driver.dir_info(dst_volume, &dest).await?);
        } else {
            let pasted = if cmd.cut {
                driver.remove_thumbs(src).await;
                let pasted = driver
                    .safe_move(src_volume, src_path, dst_dir, overwrite, None)
                    .await?;
                response.removed.push(src.hash.clone());
                pasted
            } else {
                driver
                    .safe_copy(src_volume, src_path, dst_dir, overwrite, None)
                    .await?
            };

            response.added.push(driver.file_info(dst_volume, &pasted).await?);
        }
    }

    Ok(response)
}

pub(super) async fn duplicate(
    driver: &FileSystemDriver,
    cmd: &DuplicateCommand,
    token: &CancellationToken,
) -> Result<AddedResponse> {
    let mut response = AddedResponse::default();

    for src in &cmd.targets.targets {
        check_cancelled(token)?;
        let volume = &src.volume;
        let src_path = src.full_path();
        let parent = src_path.parent().ok_or_else(permission_denied)?;

        if src.is_directory() {
            if src.is_root() {
                return Err(permission_denied());
            }
            let name = copy_name(src_path, None, true).await?;
            let dest = safely_combine(parent, &[name])?;

            driver
                .hooks
                .emit(DriverEvent::pair(HookPoint::BeforeCopy, src_path, &dest).overwrite(true));
            driver
                .transfer_tree(volume, volume, src_path, &dest, false, false, token)
                .await?;
            driver
                .hooks
                .emit(DriverEvent::pair(HookPoint::AfterCopy, src_path, &dest).overwrite(true));

            response.added.push(driver.dir_info(volume, &dest).await?);
        } else {
            let dest = driver
                .safe_copy(volume, src_path, parent, false, None)
                .await?;
            response.added.push(driver.file_info(volume, &dest).await?);
        }
    }

    Ok(response)
}
