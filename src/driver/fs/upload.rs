//! Plain and chunked uploads.
//!
//! A chunked upload arrives as a series of `chunk` requests sharing a
//! client id (`cid`), each parked in a per-upload chunk directory, followed
//! by one merge request (`chunk` set, `cid` empty) that concatenates the
//! parts into the destination. Receipt, merge and rollback of one upload are
//! serialized through the manager's named lock on the chunk directory; the
//! first fault recorded there is re-raised to every later writer.

use std::path::{Path, PathBuf};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::conflict::exists;
use super::ops::require_dir;
use super::{check_cancelled, FileSystemDriver};
use crate::command::{ChunkInfo, UploadCommand, UploadedFile, CMD_UPLOAD};
use crate::driver::hooks::{DriverEvent, HookPoint};
use crate::info::mime_of;
use crate::manager::ChunkedUploadInfo;
use crate::path::{is_name_valid, safely_combine, PathInfo};
use crate::response::UploadResponse;
use crate::volume::Volume;
use crate::{ConnectorError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Prefix of every chunk directory name.
const CHUNKING_PREFIX: &str = "_uploading__";

fn permission_denied() -> ConnectorError {
    ConnectorError::PermissionDenied(String::new())
}

/// Last component of a client-supplied name, whichever separator it uses.
fn base_name(name: &str) -> &str {
    name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(name)
}

fn lock_key(chunk_dir: &Path) -> String {
    chunk_dir.to_string_lossy().into_owned()
}

fn validate_names(cmd: &UploadCommand) -> Result<()> {
    let all_valid = cmd.names.iter().all(|n| is_name_valid(Some(n.as_str())))
        && cmd.renames.iter().all(|n| is_name_valid(Some(n.as_str())))
        && is_name_valid(Some(cmd.suffix.as_str()))
        && is_name_valid(cmd.upload_name.as_deref())
        && is_name_valid(cmd.chunk.as_deref());
    if !all_valid {
        return Err(ConnectorError::InvalidFileName);
    }

    if !cmd.is_final_uploading() && !is_name_valid(Some(cmd.chunk_info()?.file_name.as_str())) {
        return Err(ConnectorError::InvalidFileName);
    }
    Ok(())
}

impl FileSystemDriver {
    /// Where a volume parks chunk directories.
    fn chunk_base(&self, volume: &Volume) -> PathBuf {
        volume
            .chunk_directory
            .clone()
            .or_else(|| volume.temp_directory.clone())
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Chunk directory of one logical upload, keyed by destination, file
    /// name and client upload id.
    pub(super) fn chunk_directory(
        &self,
        volume: &Volume,
        upload_dir: &Path,
        file_name: &str,
        cid: &str,
    ) -> Result<PathBuf> {
        let mut mac = HmacSha256::new_from_slice(self.chunk_secret.as_bytes())
            .map_err(|e| ConnectorError::Other(format!("invalid chunk secret: {e}")))?;
        mac.update(upload_dir.to_string_lossy().as_bytes());
        mac.update(file_name.as_bytes());
        mac.update(cid.as_bytes());
        let signature = hex::encode_upper(mac.finalize().into_bytes());

        safely_combine(&self.chunk_base(volume), &[&format!("{CHUNKING_PREFIX}{signature}")])
    }

    /// Refresh the status sentinel the temp-file cleaner uses to spot live
    /// uploads. Best effort.
    async fn touch_status_file(&self, dir: &Path) {
        if !exists(dir).await {
            return;
        }
        let Ok(status) = safely_combine(dir, &[&self.status_file]) else {
            return;
        };
        if let Err(e) = tokio::fs::write(&status, b"").await {
            tracing::debug!(dir = %dir.display(), error = %e, "Failed to refresh status file");
        }
    }

    /// Delete `path` wrapped in the rollback and remove hooks.
    async fn rollback_entry(&self, path: &Path, is_directory: bool) {
        if !exists(path).await {
            return;
        }

        self.hooks.notify(HookPoint::BeforeRollbackChunk, path);
        self.hooks.notify(HookPoint::BeforeRemove, path);
        let removed = if is_directory {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        };
        match removed {
            Ok(()) => {
                self.hooks.notify(HookPoint::AfterRemove, path);
                self.hooks.notify(HookPoint::AfterRollbackChunk, path);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Rollback failed");
            }
        }
    }

    /// Record `err` on the chunk lock and delete the chunk directory.
    ///
    /// Returns whether a fault had already been recorded by another writer.
    async fn fail_chunk(&self, chunk_dir: &Path, err: &ConnectorError) -> bool {
        let Some(lock) = self.manager.get_lock::<ChunkedUploadInfo>(&lock_key(chunk_dir)) else {
            return false;
        };

        let mut info = lock.lock().await;
        let already_failed = info.exception.is_some();
        if !already_failed {
            info.exception = Some(err.clone());
        }
        self.rollback_entry(chunk_dir, true).await;
        already_failed
    }

    /// Create the missing ancestors of every upload path, top-down.
    async fn create_upload_parents(
        &self,
        cmd: &UploadCommand,
        response: &mut UploadResponse,
    ) -> Result<()> {
        for upload_path in &cmd.upload_paths {
            let volume = &upload_path.volume;
            let mut missing = Vec::new();
            let mut dir = upload_path.full_path();
            while !volume.is_root(dir) && !exists(dir).await {
                missing.push(dir.to_path_buf());
                match dir.parent() {
                    Some(parent) => dir = parent,
                    None => break,
                }
            }

            for dir in missing.into_iter().rev() {
                let parent_writable = dir
                    .parent()
                    .is_some_and(|p| volume.object_attribute(p, true).can_create_object());
                if !parent_writable {
                    return Err(permission_denied());
                }

                self.hooks.notify(HookPoint::BeforeMakeDir, &dir);
                tokio::fs::create_dir(&dir).await?;
                self.hooks.notify(HookPoint::AfterMakeDir, &dir);
                response.added.push(self.dir_info(volume, &dir).await?);
            }
        }
        Ok(())
    }

    /// Number of parts stored in `chunk_dir`, not counting the status file.
    async fn count_parts(&self, chunk_dir: &Path) -> Result<u32> {
        let mut count = 0;
        let mut entries = tokio::fs::read_dir(chunk_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy() != self.status_file
                && entry.file_type().await?.is_file()
            {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Concatenate the parts in `chunk_dir` into `dest` in chunk order,
    /// consuming them, then drop the chunk directory.
    async fn merge_chunk_files(
        &self,
        dest: &Path,
        chunk_dir: &Path,
        is_overwrite: bool,
        token: &CancellationToken,
    ) -> Result<()> {
        let mut parts = Vec::new();
        let mut entries = tokio::fs::read_dir(chunk_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == self.status_file || !entry.file_type().await?.is_file() {
                continue;
            }
            parts.push((ChunkInfo::parse(&name)?.chunk_no, entry.path()));
        }
        parts.sort_by_key(|(chunk_no, _)| *chunk_no);

        let mut out = tokio::fs::File::create(dest).await?;
        for (_, part) in &parts {
            check_cancelled(token)?;
            self.touch_status_file(chunk_dir).await;

            self.hooks
                .emit(DriverEvent::pair(HookPoint::BeforeChunkTransfer, part, dest).overwrite(is_overwrite));
            let mut input = tokio::fs::File::open(part).await?;
            tokio::io::copy(&mut input, &mut out).await?;
            self.hooks
                .emit(DriverEvent::pair(HookPoint::AfterChunkTransfer, part, dest).overwrite(is_overwrite));

            self.hooks.notify(HookPoint::BeforeRemove, part);
            tokio::fs::remove_file(part).await?;
            self.hooks.notify(HookPoint::AfterRemove, part);
        }
        out.flush().await?;

        self.hooks.notify(HookPoint::BeforeRemove, chunk_dir);
        tokio::fs::remove_dir_all(chunk_dir).await?;
        self.hooks.notify(HookPoint::AfterRemove, chunk_dir);

        tracing::debug!(dest = %dest.display(), parts = parts.len(), "Merged chunks");
        Ok(())
    }
}

/// Everything one incoming file needs to land.
struct Incoming<'a> {
    file: &'a UploadedFile,
    final_dir: &'a PathInfo,
    file_name: &'a str,
    /// Set while receiving one chunk of many.
    chunk: Option<(&'a ChunkInfo, &'a Path)>,
}

async fn receive(
    driver: &FileSystemDriver,
    cmd: &UploadCommand,
    incoming: Incoming<'_>,
    response: &mut UploadResponse,
) -> Result<()> {
    let Incoming {
        file,
        final_dir,
        file_name,
        chunk,
    } = incoming;
    let volume = &final_dir.volume;

    if !volume.is_mime_allowed(&mime_of(Path::new(file_name))) {
        return Err(ConnectorError::UploadMime);
    }
    if !final_dir.attribute().can_create_object() {
        return Err(permission_denied());
    }
    let final_path = safely_combine(final_dir.full_path(), &[file_name])?;

    let Some((info, chunk_dir)) = chunk else {
        let resolved = driver
            .resolve_conflict(volume, &final_path, &cmd.renames, &cmd.suffix, cmd.overwrite(), false)
            .await?;
        if let Some(backup) = &resolved.backup {
            response.added.push(driver.file_info(volume, backup).await?);
        }

        driver.hooks.emit(
            DriverEvent::pair(HookPoint::BeforeUpload, &resolved.path, &final_path)
                .overwrite(resolved.is_overwrite),
        );
        tokio::fs::write(&resolved.path, &file.data).await?;
        driver.hooks.emit(
            DriverEvent::pair(HookPoint::AfterUpload, &resolved.path, &final_path)
                .overwrite(resolved.is_overwrite),
        );

        response.added.push(driver.file_info(volume, &resolved.path).await?);
        return Ok(());
    };

    let key = lock_key(chunk_dir);
    let lock = driver
        .manager
        .get_or_create_lock(&key, ChunkedUploadInfo::default);
    if let Some(lock) = &lock {
        let mut state = lock.lock().await;
        if let Some(e) = &state.exception {
            return Err(e.clone());
        }
        if !exists(chunk_dir).await {
            state.total_uploaded = 0;
            driver.hooks.notify(HookPoint::BeforeMakeDir, chunk_dir);
            tokio::fs::create_dir_all(chunk_dir).await?;
            driver.hooks.notify(HookPoint::AfterMakeDir, chunk_dir);
            driver.touch_status_file(chunk_dir).await;
        }
    } else {
        tokio::fs::create_dir_all(chunk_dir).await?;
    }

    let chunk_name = base_name(cmd.chunk.as_deref().unwrap_or_default());
    let part_path = safely_combine(chunk_dir, &[chunk_name])?;
    if exists(&part_path).await {
        return Err(permission_denied());
    }

    driver.touch_status_file(chunk_dir).await;
    driver
        .hooks
        .emit(DriverEvent::pair(HookPoint::BeforeUpload, &part_path, &final_path));
    tokio::fs::write(&part_path, &file.data).await?;
    driver
        .hooks
        .emit(DriverEvent::pair(HookPoint::AfterUpload, &part_path, &final_path));

    let complete = match &lock {
        Some(lock) => {
            let mut state = lock.lock().await;
            if let Some(e) = &state.exception {
                return Err(e.clone());
            }
            state.total_uploaded += 1;
            state.total_uploaded == info.total_chunks
        }
        // Unguarded: more than one writer may see the last part land.
        None => driver.count_parts(chunk_dir).await? == info.total_chunks,
    };
    if complete {
        response.chunk_merged = Some(crate::path::file_name(chunk_dir));
        response.name = Some(file_name.to_string());
    }

    Ok(())
}

/// Merge request: the chunk directory named by `chunk` becomes `upload`.
async fn merge(
    driver: &FileSystemDriver,
    cmd: &UploadCommand,
    response: &mut UploadResponse,
    token: &CancellationToken,
) -> Result<()> {
    let upload_name = base_name(cmd.upload_name.as_deref().unwrap_or_default());
    let chunk_dir_name = base_name(cmd.chunk.as_deref().unwrap_or_default());
    if upload_name.is_empty() || chunk_dir_name.is_empty() {
        return Err(ConnectorError::CommandParams(CMD_UPLOAD.to_string()));
    }

    let upload_dir = cmd.upload_paths.first().unwrap_or(&cmd.target);
    let volume = &upload_dir.volume;
    let chunk_dir = safely_combine(&driver.chunk_base(volume), &[chunk_dir_name])?;
    let mut dest = None;

    let merged = merge_into(driver, cmd, upload_dir, &chunk_dir, upload_name, &mut dest, response, token).await;
    let Err(err) = merged else {
        return Ok(());
    };

    match driver
        .manager
        .get_lock::<ChunkedUploadInfo>(&lock_key(&chunk_dir))
    {
        Some(lock) => {
            let mut info = lock.lock().await;
            if info.exception.is_none() {
                info.exception = Some(err.clone());
            }
            driver.rollback_entry(&chunk_dir, true).await;
            if let Some(dest) = dest.as_deref().filter(|_| info.is_file_touched) {
                driver.rollback_entry(dest, false).await;
            }
        }
        None => {
            driver.rollback_entry(&chunk_dir, true).await;
            if let Some(dest) = dest.as_deref() {
                driver.rollback_entry(dest, false).await;
            }
        }
    }

    tracing::warn!(chunk_dir = %chunk_dir.display(), error = %err, "Chunk merge failed");
    driver
        .hooks
        .emit(DriverEvent::error(HookPoint::UploadError, Some(&chunk_dir), &err));
    Err(err)
}

#[allow(clippy::too_many_arguments)]
async fn merge_into(
    driver: &FileSystemDriver,
    cmd: &UploadCommand,
    upload_dir: &PathInfo,
    chunk_dir: &Path,
    upload_name: &str,
    dest: &mut Option<PathBuf>,
    response: &mut UploadResponse,
    token: &CancellationToken,
) -> Result<()> {
    check_cancelled(token)?;
    let volume = &upload_dir.volume;
    if !exists(chunk_dir).await {
        return Err(ConnectorError::DirectoryNotFound);
    }
    if !upload_dir.attribute().can_create_object() {
        return Err(ConnectorError::PermissionDenied(format!(
            "Permission denied: {}",
            volume.relative_path(upload_dir.full_path())
        )));
    }

    let target = safely_combine(upload_dir.full_path(), &[upload_name])?;
    let resolved = driver
        .resolve_conflict(volume, &target, &cmd.renames, &cmd.suffix, cmd.overwrite(), false)
        .await?;
    if let Some(backup) = &resolved.backup {
        response.added.push(driver.file_info(volume, backup).await?);
    }

    // No lock when the registry was full while the parts arrived; merge
    // unguarded then.
    let key = lock_key(chunk_dir);
    let lock = driver.manager.get_lock::<ChunkedUploadInfo>(&key);
    {
        let mut info = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };
        if let Some(e) = info.as_ref().and_then(|info| info.exception.clone()) {
            return Err(e);
        }

        *dest = Some(resolved.path.clone());
        driver.hooks.emit(
            DriverEvent::pair(HookPoint::BeforeChunkMerged, chunk_dir, &resolved.path)
                .overwrite(resolved.is_overwrite),
        );
        if let Some(info) = info.as_mut() {
            info.is_file_touched = true;
        }
        driver
            .merge_chunk_files(&resolved.path, chunk_dir, resolved.is_overwrite, token)
            .await?;
        driver.hooks.emit(
            DriverEvent::pair(HookPoint::AfterChunkMerged, chunk_dir, &resolved.path)
                .overwrite(resolved.is_overwrite),
        );
    }
    if lock.is_some() {
        driver.manager.release_lock(&key);
    }

    response.added.push(driver.file_info(volume, &resolved.path).await?);
    Ok(())
}

pub(super) async fn upload(
    driver: &FileSystemDriver,
    cmd: &UploadCommand,
    token: &CancellationToken,
) -> Result<UploadResponse> {
    check_cancelled(token)?;
    validate_names(cmd)?;
    require_dir(&cmd.target)?;

    let mut response = UploadResponse::default();
    if cmd.is_final_uploading() {
        driver.create_upload_parents(cmd, &mut response).await?;
    }

    if cmd.is_chunk_merge() {
        merge(driver, cmd, &mut response, token).await?;
        return Ok(response);
    }

    let chunk = if cmd.is_chunking() {
        Some(cmd.chunk_info()?)
    } else {
        None
    };
    let cid = cmd.cid.as_deref().unwrap_or_default();

    for (idx, file) in cmd.files.iter().enumerate() {
        check_cancelled(token)?;
        let final_dir = cmd.upload_paths.get(idx).unwrap_or(&cmd.target);
        let file_name = match &chunk {
            Some(info) => base_name(&info.file_name),
            None => base_name(&file.file_name),
        };
        let chunk_dir = match &chunk {
            Some(_) => Some(driver.chunk_directory(
                &final_dir.volume,
                final_dir.full_path(),
                file_name,
                cid,
            )?),
            None => None,
        };

        let incoming = Incoming {
            file,
            final_dir,
            file_name,
            chunk: chunk.as_ref().zip(chunk_dir.as_deref()),
        };
        let Err(err) = receive(driver, cmd, incoming, &mut response).await else {
            continue;
        };

        if let Some(chunk_dir) = &chunk_dir {
            if driver.fail_chunk(chunk_dir, &err).await {
                tracing::debug!(file_name, error = %err, "Chunk rejected after earlier fault");
                return Err(err);
            }
            tracing::warn!(file_name, error = %err, "Chunk upload failed");
            driver
                .hooks
                .emit(DriverEvent::error(HookPoint::UploadError, Some(chunk_dir), &err));
            return Err(err);
        }

        driver
            .hooks
            .emit(DriverEvent::error(HookPoint::UploadError, None, &err));
        match err {
            ConnectorError::UploadMime => return Err(ConnectorError::UploadMime),
            ConnectorError::PermissionDenied(message) => {
                response.warning.push(if message.is_empty() {
                    format!("Permission denied: {file_name}")
                } else {
                    message
                });
            }
            other => {
                tracing::warn!(file_name, error = %other, "Upload failed");
                response.warning.push(format!("Failed to upload: {file_name}"));
            }
        }
        response
            .warning_details
            .push(ConnectorError::UploadFile(file_name.to_string()).to_response(CMD_UPLOAD));
    }

    Ok(response)
}

/// Cancel an in-flight chunked upload and drop its chunk directory.
pub(super) async fn abort_upload(
    driver: &FileSystemDriver,
    cmd: &UploadCommand,
    token: &CancellationToken,
) -> Result<()> {
    check_cancelled(token)?;
    validate_names(cmd)?;
    if cmd.is_final_uploading() {
        return Ok(());
    }

    let info = cmd.chunk_info()?;
    let upload_dir = cmd.upload_paths.first().unwrap_or(&cmd.target);
    let volume = &upload_dir.volume;
    let chunk_dir = driver.chunk_directory(
        volume,
        upload_dir.full_path(),
        base_name(&info.file_name),
        cmd.cid.as_deref().unwrap_or_default(),
    )?;

    let Some(lock) = driver
        .manager
        .get_lock::<ChunkedUploadInfo>(&lock_key(&chunk_dir))
    else {
        return Ok(());
    };

    let mut state = lock.lock().await;
    state.exception = Some(ConnectorError::ConnectionAborted);
    if !exists(&chunk_dir).await {
        return Err(ConnectorError::DirectoryNotFound);
    }
    if !volume.object_attribute(&chunk_dir, true).can_delete() {
        return Err(permission_denied());
    }

    driver.hooks.notify(HookPoint::BeforeRemove, &chunk_dir);
    tokio::fs::remove_dir_all(&chunk_dir).await?;
    driver.hooks.notify(HookPoint::AfterRemove, &chunk_dir);
    tracing::info!(file_name = %info.file_name, "Aborted chunked upload");
    Ok(())
}
