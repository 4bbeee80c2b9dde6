//! Thumbnail generation and cleanup.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use super::conflict::exists;
use super::{check_cancelled, FileSystemDriver};
use crate::command::TmbCommand;
use crate::driver::hooks::{DriverEvent, HookPoint};
use crate::driver::media::MediaType;
use crate::info::mime_of;
use crate::path::PathInfo;
use crate::response::{ImageWithMime, TmbResponse};
use crate::volume::Volume;
use crate::{ConnectorError, Result};

/// Outcome of [`FileSystemDriver::create_thumb`].
pub(super) struct Thumb {
    pub path: PathBuf,
    pub media_type: MediaType,
    /// Set when the thumbnail was produced by this call.
    pub generated: Option<ImageWithMime>,
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

impl FileSystemDriver {
    pub(super) fn media_type(&self, full: &Path) -> Option<MediaType> {
        let ext = extension_of(full);
        if ext.is_empty() {
            return None;
        }
        if self.picture_editor.can_process_file(&ext) {
            Some(MediaType::Image)
        } else if self.video_editor.can_process_file(&ext) {
            Some(MediaType::Video)
        } else {
            None
        }
    }

    /// `tmb` value of a file entry: its hash once a thumbnail exists, `"1"`
    /// when one can be generated.
    pub(super) async fn thumbnail_state(&self, volume: &Volume, full: &Path) -> Option<String> {
        let thumb = volume.thumbnail_path(full)?;
        self.media_type(full)?;

        if exists(&thumb).await {
            Some(self.hash_of(volume, full))
        } else {
            Some("1".to_string())
        }
    }

    /// Locate the thumbnail of `full`, generating it when missing.
    ///
    /// Returns `None` when the volume has no thumbnail directory or the file
    /// is not a supported media type.
    pub(super) async fn create_thumb(&self, volume: &Volume, full: &Path) -> Result<Option<Thumb>> {
        let Some(media_type) = self.media_type(full) else {
            return Ok(None);
        };
        let Some(thumb_path) = volume.thumbnail_path(full) else {
            return Ok(None);
        };

        if exists(&thumb_path).await {
            return Ok(Some(Thumb {
                path: thumb_path,
                media_type,
                generated: None,
            }));
        }

        let size = volume.thumbnail_size;
        let image = match media_type {
            MediaType::Image => {
                let bytes = tokio::fs::read(full).await?;
                let editor = self.picture_editor.clone();
                tokio::task::spawn_blocking(move || editor.generate_thumbnail(&bytes, size, true))
                    .await??
            }
            MediaType::Video => {
                let editor = self.video_editor.clone();
                let source = full.to_path_buf();
                tokio::task::spawn_blocking(move || editor.generate_thumbnail(&source, size, true))
                    .await??
            }
        };

        if let Some(parent) = thumb_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&thumb_path, &image.data).await?;
        tracing::debug!(thumb = %thumb_path.display(), "Generated thumbnail");

        Ok(Some(Thumb {
            path: thumb_path,
            media_type,
            generated: Some(image),
        }))
    }

    /// Delete the thumbnail of a file, or the thumbnail tree of a directory.
    ///
    /// Failures are reported to the remove-thumb-error hook only.
    pub(super) async fn remove_thumbs(&self, target: &PathInfo) {
        let Some(thumb) = target.volume.thumbnail_path(target.full_path()) else {
            return;
        };

        self.hooks.notify(HookPoint::BeforeRemoveThumb, &thumb);

        let result = match tokio::fs::metadata(&thumb).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&thumb).await,
            Ok(_) => tokio::fs::remove_file(&thumb).await,
            Err(_) => Ok(()),
        };

        match result {
            Ok(()) => self.hooks.notify(HookPoint::AfterRemoveThumb, &thumb),
            Err(e) => {
                let err = ConnectorError::from(e);
                tracing::warn!(thumb = %thumb.display(), error = %err, "Failed to remove thumbnail");
                self.hooks
                    .emit(DriverEvent::error(HookPoint::RemoveThumbError, Some(&thumb), &err));
            }
        }
    }
}

pub(super) async fn tmb(
    driver: &FileSystemDriver,
    cmd: &TmbCommand,
    token: &CancellationToken,
) -> Result<TmbResponse> {
    let mut response = TmbResponse::default();

    for target in &cmd.targets.targets {
        check_cancelled(token)?;
        if target.is_directory() {
            continue;
        }
        if driver
            .create_thumb(&target.volume, target.full_path())
            .await?
            .is_some()
        {
            response
                .images
                .insert(target.hash.clone(), target.hash.clone());
        }
    }

    Ok(response)
}

pub(super) async fn thumb(
    driver: &FileSystemDriver,
    target: &PathInfo,
    token: &CancellationToken,
) -> Result<Option<ImageWithMime>> {
    check_cancelled(token)?;
    if target.is_directory() {
        return Ok(None);
    }

    let volume = &target.volume;
    let created = match driver.create_thumb(volume, target.full_path()).await {
        Ok(created) => created,
        Err(e) => {
            tracing::debug!(hash = %target.hash, error = %e, "Thumbnail generation failed");
            if let (Some(media_type), Some(thumb_path)) = (
                driver.media_type(target.full_path()),
                volume.thumbnail_path(target.full_path()),
            ) {
                driver.thumbnail_generator.try_enqueue(
                    target.full_path(),
                    &thumb_path,
                    volume.thumbnail_size,
                    true,
                    media_type,
                );
            }
            return Ok(None);
        }
    };

    let Some(thumb) = created else {
        return Ok(None);
    };
    if let Some(image) = thumb.generated {
        return Ok(Some(image));
    }

    if !exists(&thumb.path).await {
        driver.thumbnail_generator.try_enqueue(
            target.full_path(),
            &thumb.path,
            volume.thumbnail_size,
            true,
            thumb.media_type,
        );
        return Ok(None);
    }

    Ok(Some(ImageWithMime {
        data: tokio::fs::read(&thumb.path).await?,
        mime: mime_of(&thumb.path),
    }))
}
