//! Zip archives: archive, extract and the two-phase zip download.
//!
//! The `zip` crate is synchronous, so archives are written and read on the
//! blocking pool. Entry infos are built afterwards, back on the runtime.

use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::ops::{require_dir, require_file};
use super::{check_cancelled, FileSystemDriver};
use crate::command::{ArchiveCommand, ExtractCommand, ZipdlCommand, ZipdlRawCommand};
use crate::driver::hooks::{DriverEvent, DriverHooks, HookPoint};
use crate::info::MIME_ZIP;
use crate::path::{file_name, is_name_valid, safely_combine, split_name, PathInfo};
use crate::response::{
    AddedResponse, Disposition, FileBody, FileResponse, ZipdlData, ZipdlResponse,
};
use crate::volume::Volume;
use crate::{ConnectorError, Result};

const ZIP_EXT: &str = ".zip";

/// Download name used when nothing better is known.
const DEFAULT_DOWNLOAD_NAME: &str = "download";

fn permission_denied() -> ConnectorError {
    ConnectorError::PermissionDenied(String::new())
}

fn malformed_key() -> ConnectorError {
    ConnectorError::PermissionDenied("Malformed key".to_string())
}

/// One top-level item of an archive being written.
struct ZipSource {
    path: PathBuf,
    is_directory: bool,
    /// Entry name of the item inside the archive.
    name: String,
}

impl ZipSource {
    fn new(target: &PathInfo, root_name: Option<&str>) -> Self {
        let name = match root_name {
            Some(root_name) if target.is_root() => root_name.to_string(),
            _ => target.name(),
        };
        Self {
            path: target.full_path().to_path_buf(),
            is_directory: target.is_directory(),
            name,
        }
    }
}

/// `a/b/c` form of `path` below `base`.
fn entry_name(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .map(|rest| {
            rest.components()
                .filter_map(|c| match c {
                    Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default()
}

/// Write `sources` into a new zip at `archive`, replacing any previous file.
///
/// Entries hidden by the volume are skipped, as is `archive` itself when it
/// sits inside one of the sources.
fn write_zip(
    volume: &Volume,
    archive: &Path,
    sources: &[ZipSource],
    token: &CancellationToken,
) -> Result<()> {
    let mut zip = ZipWriter::new(File::create(archive)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for source in sources {
        check_cancelled(token)?;
        if !source.is_directory {
            zip.start_file(source.name.as_str(), options)?;
            io::copy(&mut File::open(&source.path)?, &mut zip)?;
            continue;
        }

        zip.add_directory(source.name.as_str(), options)?;
        let walker = WalkDir::new(&source.path)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.path() != archive
                    && volume
                        .object_attribute(e.path(), e.file_type().is_dir())
                        .visible
            });

        for entry in walker {
            check_cancelled(token)?;
            let entry = entry.map_err(io::Error::from)?;
            let name = format!("{}/{}", source.name, entry_name(&source.path, entry.path()));
            if entry.file_type().is_dir() {
                zip.add_directory(name, options)?;
            } else {
                zip.start_file(name, options)?;
                io::copy(&mut File::open(entry.path())?, &mut zip)?;
            }
        }
    }

    zip.finish()?;
    Ok(())
}

/// Unpack `archive` under `dest`, returning what was written in archive order.
fn unpack_zip(
    hooks: &DriverHooks,
    volume: &Volume,
    archive: &Path,
    dest: &Path,
    token: &CancellationToken,
) -> Result<Vec<(PathBuf, bool)>> {
    let mut zip = ZipArchive::new(File::open(archive)?)?;
    let mut written = Vec::with_capacity(zip.len());

    for i in 0..zip.len() {
        check_cancelled(token)?;
        let mut entry = zip.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(ConnectorError::PermissionDenied(
                "Path must be inside parent".to_string(),
            ));
        };
        let segments: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        let full = safely_combine(dest, &segments)?;
        let is_directory = entry.is_dir();

        let parent = full.parent().ok_or_else(permission_denied)?;
        if !volume.object_attribute(parent, true).can_extract_to() {
            return Err(permission_denied());
        }

        match std::fs::metadata(&full) {
            Ok(meta) if meta.is_dir() != is_directory => {
                return Err(ConnectorError::Exists(file_name(&full)));
            }
            _ => {}
        }

        if is_directory {
            if !full.exists() {
                hooks.notify(HookPoint::BeforeMakeDir, &full);
                std::fs::create_dir_all(&full)?;
                hooks.notify(HookPoint::AfterMakeDir, &full);
            }
        } else {
            let is_overwrite = full.exists();
            std::fs::create_dir_all(parent)?;
            hooks.emit(
                DriverEvent::pair(HookPoint::BeforeExtractFile, archive, &full)
                    .overwrite(is_overwrite),
            );
            io::copy(&mut entry, &mut File::create(&full)?)?;
            hooks.emit(
                DriverEvent::pair(HookPoint::AfterExtractFile, archive, &full)
                    .overwrite(is_overwrite),
            );
        }

        written.push((full, is_directory));
    }

    Ok(written)
}

/// Suggested name of a zip download (without extension).
fn download_name(targets: &[PathInfo]) -> String {
    match targets {
        [] => DEFAULT_DOWNLOAD_NAME.to_string(),
        [only] if only.is_root() => only.volume.name.clone(),
        [only] => only.name(),
        [first, ..] => {
            let volume = &first.volume;
            match first.full_path().parent() {
                Some(parent) if volume.is_root(parent) => volume.name.clone(),
                Some(parent) => Some(file_name(parent))
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| DEFAULT_DOWNLOAD_NAME.to_string()),
                None => DEFAULT_DOWNLOAD_NAME.to_string(),
            }
        }
    }
}

/// Suffix of a prepared archive claimed by a download in progress.
const SENDING_EXT: &str = ".sending";

fn temp_archive_dir(volume: &Volume) -> PathBuf {
    volume
        .temp_archive_directory
        .clone()
        .unwrap_or_else(std::env::temp_dir)
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial archive");
        }
    }
}

pub(super) async fn archive(
    driver: &FileSystemDriver,
    cmd: &ArchiveCommand,
    token: &CancellationToken,
) -> Result<AddedResponse> {
    check_cancelled(token)?;
    if !is_name_valid(Some(cmd.name.as_str())) {
        return Err(ConnectorError::InvalidFileName);
    }
    if cmd.mime_type != MIME_ZIP {
        return Err(ConnectorError::ArchiveType);
    }

    let target = &cmd.target;
    let dir = require_dir(target)?;
    let volume = target.volume.clone();

    let mut filename = if cmd.name.is_empty() {
        target.name()
    } else {
        cmd.name.clone()
    };
    if !filename.ends_with(ZIP_EXT) {
        filename.push_str(ZIP_EXT);
    }

    let archive_path = safely_combine(dir, &[&filename])?;
    if !target.attribute().can_create_object() {
        return Err(permission_denied());
    }
    if tokio::fs::metadata(&archive_path)
        .await
        .is_ok_and(|m| m.is_dir())
    {
        return Err(ConnectorError::Exists(filename));
    }

    let mut sources = Vec::with_capacity(cmd.targets.targets.len());
    for path in &cmd.targets.targets {
        if !path.attribute().can_archive() {
            return Err(permission_denied());
        }
        sources.push(ZipSource::new(path, None));
    }

    driver.hooks.notify(HookPoint::BeforeArchive, &archive_path);

    let result = {
        let volume = volume.clone();
        let archive_path = archive_path.clone();
        let token = token.clone();
        tokio::task::spawn_blocking(move || write_zip(&volume, &archive_path, &sources, &token))
            .await
            .map_err(ConnectorError::from)
            .and_then(|r| r)
    };

    if let Err(e) = result {
        driver.hooks.emit(DriverEvent::error(
            HookPoint::ArchiveError,
            Some(&archive_path),
            &e,
        ));
        remove_partial(&archive_path).await;
        return Err(e);
    }

    driver.hooks.notify(HookPoint::AfterArchive, &archive_path);
    tracing::debug!(archive = %archive_path.display(), "Created archive");

    Ok(AddedResponse {
        added: vec![driver.file_info(&volume, &archive_path).await?],
    })
}

pub(super) async fn extract(
    driver: &FileSystemDriver,
    cmd: &ExtractCommand,
    token: &CancellationToken,
) -> Result<AddedResponse> {
    check_cancelled(token)?;
    let target = &cmd.target;
    let archive_path = require_file(target)?.to_path_buf();
    if !target.attribute().read {
        return Err(permission_denied());
    }

    let volume = target.volume.clone();
    let parent = archive_path.parent().ok_or_else(permission_denied)?.to_path_buf();
    let mut response = AddedResponse::default();

    let dest = if cmd.makedir {
        let name = target.name();
        let (stem, _) = split_name(&name);
        let dest = safely_combine(&parent, &[stem])?;

        if !volume.object_attribute(&parent, true).can_extract_to() {
            return Err(permission_denied());
        }
        match tokio::fs::metadata(&dest).await {
            Ok(meta) if !meta.is_dir() => return Err(ConnectorError::Exists(file_name(&dest))),
            Ok(_) => {}
            Err(_) => {
                driver.hooks.notify(HookPoint::BeforeMakeDir, &dest);
                tokio::fs::create_dir(&dest).await?;
                driver.hooks.notify(HookPoint::AfterMakeDir, &dest);
            }
        }

        response.added.push(driver.dir_info(&volume, &dest).await?);
        dest
    } else {
        parent
    };

    driver
        .hooks
        .notify_pair(HookPoint::BeforeExtract, &archive_path, &dest);

    let written = {
        let hooks: Arc<DriverHooks> = driver.hooks.clone();
        let volume = volume.clone();
        let archive_path = archive_path.clone();
        let dest = dest.clone();
        let token = token.clone();
        tokio::task::spawn_blocking(move || {
            unpack_zip(&hooks, &volume, &archive_path, &dest, &token)
        })
        .await??
    };

    driver
        .hooks
        .notify_pair(HookPoint::AfterExtract, &archive_path, &dest);

    if !cmd.makedir {
        for (path, is_directory) in written {
            response
                .added
                .push(driver.entry_info(&volume, &path, is_directory).await?);
        }
    }

    Ok(response)
}

pub(super) async fn zipdl(
    _driver: &FileSystemDriver,
    cmd: &ZipdlCommand,
    token: &CancellationToken,
) -> Result<ZipdlResponse> {
    check_cancelled(token)?;
    let targets = &cmd.targets.targets;
    let volume = cmd
        .targets
        .single_volume()
        .ok_or_else(|| ConnectorError::CommandParams("zipdl".to_string()))?;

    let mut sources = Vec::with_capacity(targets.len());
    for path in targets {
        if !path.attribute().can_download() {
            return Err(permission_denied());
        }
        sources.push(ZipSource::new(path, Some(&volume.name)));
    }

    let temp_dir = temp_archive_dir(&volume);
    tokio::fs::create_dir_all(&temp_dir).await?;
    let key = Uuid::new_v4().to_string();
    let archive_path = temp_dir.join(format!("{key}{ZIP_EXT}"));

    let result = {
        let volume = volume.clone();
        let archive_path = archive_path.clone();
        let token = token.clone();
        tokio::task::spawn_blocking(move || write_zip(&volume, &archive_path, &sources, &token))
            .await
            .map_err(ConnectorError::from)
            .and_then(|r| r)
    };
    if let Err(e) = result {
        remove_partial(&archive_path).await;
        return Err(e);
    }

    tracing::debug!(key = %key, "Prepared zip download");

    Ok(ZipdlResponse {
        zipdl: ZipdlData {
            file: key,
            name: format!("{}{ZIP_EXT}", download_name(targets)),
            mime: MIME_ZIP.to_string(),
        },
    })
}

pub(super) async fn zipdl_raw(
    _driver: &FileSystemDriver,
    cmd: &ZipdlRawCommand,
    token: &CancellationToken,
) -> Result<FileResponse> {
    check_cancelled(token)?;
    if cmd.name.is_empty() || !is_name_valid(Some(cmd.name.as_str())) {
        return Err(ConnectorError::InvalidFileName);
    }

    let key = Uuid::parse_str(&cmd.key).map_err(|_| malformed_key())?;
    let temp_dir = temp_archive_dir(&cmd.cwd.volume);
    let archive_path = temp_dir.join(format!("{key}{ZIP_EXT}"));
    // Claim the archive so a second download of the same key fails.
    let claimed = temp_dir.join(format!("{}{ZIP_EXT}{SENDING_EXT}", Uuid::new_v4()));
    match tokio::fs::rename(&archive_path, &claimed).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(malformed_key()),
        Err(e) => return Err(e.into()),
    }

    Ok(FileResponse {
        content_type: cmd.mime.clone(),
        file_name: cmd.name.clone(),
        body: FileBody::Temp(claimed),
        disposition: Disposition::Attachment,
    })
}
