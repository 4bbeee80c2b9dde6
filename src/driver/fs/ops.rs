//! Navigation and single-entry mutations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::conflict::exists;
use super::{check_cancelled, FileSystemDriver};
use crate::command::{
    FileCommand, InfoCommand, LsCommand, MkdirCommand, MkfileCommand, OpenCommand,
    ParentsCommand, RenameCommand, RmCommand, SizeCommand, TreeCommand,
};
use crate::driver::hooks::HookPoint;
use crate::info::{mime_matches, mime_of};
use crate::path::{file_name, is_name_valid, safely_combine, PathInfo};
use crate::response::{
    AddedResponse, ChangeResponse, DebugInfo, Disposition, FileBody, FileResponse, InfoResponse,
    LsResponse, MkdirResponse, OpenResponse, RmResponse, SizeResponse, TreeResponse,
    API_VERSION,
};
use crate::volume::Volume;
use crate::{ConnectorError, Result};

/// Name reported in the `debug` block of `open`.
const CONNECTOR_NAME: &str = "elfinder-connector";

fn permission_denied() -> ConnectorError {
    ConnectorError::PermissionDenied(String::new())
}

pub(super) fn require_dir(target: &PathInfo) -> Result<&Path> {
    if !target.is_directory() {
        return Err(ConnectorError::DirectoryNotFound);
    }
    Ok(target.full_path())
}

pub(super) fn require_file(target: &PathInfo) -> Result<&Path> {
    if target.is_directory() {
        return Err(ConnectorError::NotFile);
    }
    Ok(target.full_path())
}

/// `uplMaxSize` as the client expects it (kilobytes with a unit).
fn format_upload_size(bytes: u64) -> String {
    format!("{}K", bytes / 1024)
}

/// The configured start directory when it is usable as the initial cwd.
async fn start_directory(volume: &Volume) -> Option<PathBuf> {
    let start = volume.start_directory.as_ref()?;
    if volume.is_root(start) {
        return None;
    }
    let meta = tokio::fs::metadata(start).await.ok()?;
    (meta.is_dir() && volume.object_attribute(start, true).read).then(|| start.clone())
}

pub(super) async fn open(
    driver: &FileSystemDriver,
    cmd: &OpenCommand,
    token: &CancellationToken,
) -> Result<OpenResponse> {
    check_cancelled(token)?;
    let started = Instant::now();
    let volume = &cmd.volume;

    let cwd = match &cmd.target {
        Some(target) => {
            if !target.attribute().read {
                return Err(permission_denied());
            }
            require_dir(target)?.to_path_buf()
        }
        None => start_directory(volume)
            .await
            .unwrap_or_else(|| volume.root.clone()),
    };

    let cwd_info = driver.dir_info(volume, &cwd).await?;
    let cwd_is_root = volume.is_root(&cwd);
    let options = cwd_info
        .options
        .clone()
        .unwrap_or_else(|| driver.root_options(volume, &cwd));

    let mut files = Vec::new();
    if cmd.init && !cwd_is_root {
        files.extend(driver.parents_tree(volume, &cwd).await?);
    }

    let children = driver.read_children(volume, &cwd).await?;
    for file in &children.files {
        check_cancelled(token)?;
        if mime_matches(&mime_of(file), &cmd.mimes) {
            files.push(driver.file_info(volume, file).await?);
        }
    }
    for dir in &children.dirs {
        files.push(driver.dir_info(volume, dir).await?);
    }

    Ok(OpenResponse {
        cwd: cwd_info,
        files,
        options,
        upl_max_file: volume.max_upload_files,
        upl_max_size: volume.max_upload_size.map(format_upload_size),
        net_drivers: vec![],
        debug: DebugInfo {
            connector: CONNECTOR_NAME.to_string(),
            time: started.elapsed().as_secs_f64(),
        },
        api: cmd.init.then(|| API_VERSION.to_string()),
        cwd_is_root,
    })
}

pub(super) async fn ls(
    driver: &FileSystemDriver,
    cmd: &LsCommand,
    token: &CancellationToken,
) -> Result<LsResponse> {
    check_cancelled(token)?;
    let target = &cmd.target;
    let dir = require_dir(target)?;
    if !target.attribute().read {
        return Err(permission_denied());
    }

    let volume = &target.volume;
    let children = driver.read_children(volume, dir).await?;
    let files = children
        .files
        .into_iter()
        .filter(|f| mime_matches(&mime_of(f), &cmd.mimes));

    let mut list = HashMap::new();
    for path in files.chain(children.dirs) {
        let mut name = file_name(&path);
        if !cmd.intersect.is_empty() {
            match cmd
                .intersect
                .iter()
                .find(|candidate| candidate.eq_ignore_ascii_case(&name))
            {
                Some(candidate) => name = candidate.clone(),
                None => continue,
            }
        }
        list.insert(driver.hash_of(volume, &path), name);
    }

    Ok(LsResponse { list })
}

pub(super) async fn tree(
    driver: &FileSystemDriver,
    cmd: &TreeCommand,
    token: &CancellationToken,
) -> Result<TreeResponse> {
    check_cancelled(token)?;
    let target = &cmd.target;
    let dir = require_dir(target)?;
    if !target.attribute().read {
        return Err(permission_denied());
    }

    let mut tree = Vec::new();
    for sub in driver.read_children(&target.volume, dir).await?.dirs {
        tree.push(driver.dir_info(&target.volume, &sub).await?);
    }
    Ok(TreeResponse { tree })
}

pub(super) async fn parents(
    driver: &FileSystemDriver,
    cmd: &ParentsCommand,
    token: &CancellationToken,
) -> Result<TreeResponse> {
    check_cancelled(token)?;
    let target = &cmd.target;
    let dir = require_dir(target)?;

    let tree = if target.is_root() {
        vec![driver.dir_info(&target.volume, dir).await?]
    } else {
        driver.parents_tree(&target.volume, dir).await?
    };
    Ok(TreeResponse { tree })
}

pub(super) async fn info(
    driver: &FileSystemDriver,
    cmd: &InfoCommand,
    token: &CancellationToken,
) -> Result<InfoResponse> {
    check_cancelled(token)?;
    let mut files = Vec::new();

    for target in &cmd.targets.targets {
        match driver
            .entry_info(&target.volume, target.full_path(), target.is_directory())
            .await
        {
            Ok(info) => files.push(info),
            Err(e) => tracing::debug!(hash = %target.hash, error = %e, "Skipping entry in info"),
        }
    }

    Ok(InfoResponse { files })
}

pub(super) async fn mkdir(
    driver: &FileSystemDriver,
    cmd: &MkdirCommand,
    token: &CancellationToken,
) -> Result<MkdirResponse> {
    check_cancelled(token)?;
    if !is_name_valid(cmd.name.as_deref()) {
        return Err(ConnectorError::InvalidDirName);
    }

    let target = &cmd.target;
    let volume = &target.volume;
    let parent = require_dir(target)?;
    if !target.attribute().can_create_object() {
        return Err(permission_denied());
    }

    let mut response = MkdirResponse::default();

    if let Some(name) = cmd.name.as_deref().filter(|n| !n.is_empty()) {
        let new_dir = safely_combine(parent, &[name])?;
        if exists(&new_dir).await {
            return Err(ConnectorError::Exists(name.to_string()));
        }

        driver.hooks.notify(HookPoint::BeforeMakeDir, &new_dir);
        tokio::fs::create_dir(&new_dir).await?;
        driver.hooks.notify(HookPoint::AfterMakeDir, &new_dir);

        response.added.push(driver.dir_info(volume, &new_dir).await?);
    }

    for dir in &cmd.dirs {
        check_cancelled(token)?;
        let dir_name = dir.trim_start_matches('/');
        let new_dir = safely_combine(parent, &[dir_name])?;

        match tokio::fs::metadata(&new_dir).await {
            Ok(meta) if !meta.is_dir() => {
                return Err(ConnectorError::Exists(file_name(&new_dir)));
            }
            Ok(_) => {}
            Err(_) => {
                driver.hooks.notify(HookPoint::BeforeMakeDir, &new_dir);
                tokio::fs::create_dir_all(&new_dir).await?;
                driver.hooks.notify(HookPoint::AfterMakeDir, &new_dir);
            }
        }

        let info = driver.dir_info(volume, &new_dir).await?;
        response.hashes.insert(format!("/{dir_name}"), info.hash.clone());
        response.added.push(info);
    }

    Ok(response)
}

pub(super) async fn mkfile(
    driver: &FileSystemDriver,
    cmd: &MkfileCommand,
    token: &CancellationToken,
) -> Result<AddedResponse> {
    check_cancelled(token)?;
    if !is_name_valid(Some(cmd.name.as_str())) || cmd.name.is_empty() {
        return Err(ConnectorError::InvalidFileName);
    }

    let target = &cmd.target;
    let parent = require_dir(target)?;
    if !target.attribute().can_create_object() {
        return Err(permission_denied());
    }

    let new_file = safely_combine(parent, &[&cmd.name])?;
    if exists(&new_file).await {
        return Err(ConnectorError::Exists(cmd.name.clone()));
    }

    driver.hooks.notify(HookPoint::BeforeMakeFile, &new_file);
    tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&new_file)
        .await?;
    driver.hooks.notify(HookPoint::AfterMakeFile, &new_file);

    Ok(AddedResponse {
        added: vec![driver.file_info(&target.volume, &new_file).await?],
    })
}

pub(super) async fn rename(
    driver: &FileSystemDriver,
    cmd: &RenameCommand,
    token: &CancellationToken,
) -> Result<ChangeResponse> {
    check_cancelled(token)?;
    let target = &cmd.target;
    let is_dir = target.is_directory();

    if cmd.name.is_empty() || !is_name_valid(Some(cmd.name.as_str())) {
        return Err(if is_dir {
            ConnectorError::InvalidDirName
        } else {
            ConnectorError::InvalidFileName
        });
    }
    if !target.attribute().can_rename() {
        return Err(permission_denied());
    }

    let source = target.full_path();
    let parent = source.parent().ok_or_else(permission_denied)?;
    let renamed = safely_combine(parent, &[&cmd.name])?;
    if exists(&renamed).await {
        return Err(ConnectorError::Exists(cmd.name.clone()));
    }

    driver.remove_thumbs(target).await;

    driver
        .hooks
        .notify_pair(HookPoint::BeforeRename, source, &renamed);
    tokio::fs::rename(source, &renamed).await?;
    driver
        .hooks
        .notify_pair(HookPoint::AfterRename, source, &renamed);

    Ok(ChangeResponse {
        added: vec![driver.entry_info(&target.volume, &renamed, is_dir).await?],
        removed: vec![target.hash.clone()],
    })
}

pub(super) async fn rm(
    driver: &FileSystemDriver,
    cmd: &RmCommand,
    token: &CancellationToken,
) -> Result<RmResponse> {
    let mut removed = Vec::new();

    for target in &cmd.targets.targets {
        check_cancelled(token)?;
        if !target.attribute().can_delete() {
            return Err(permission_denied());
        }

        driver.remove_thumbs(target).await;

        let path = target.full_path();
        if target.entry.exists().await {
            driver.hooks.notify(HookPoint::BeforeRemove, path);
            if target.is_directory() {
                tokio::fs::remove_dir_all(path).await?;
            } else {
                tokio::fs::remove_file(path).await?;
            }
            driver.hooks.notify(HookPoint::AfterRemove, path);
        }

        removed.push(target.hash.clone());
    }

    Ok(RmResponse { removed })
}

/// `(bytes, files, directories)` below `dir`, working directories excluded.
fn dir_usage(volume: &Volume, dir: &Path, token: &CancellationToken) -> Result<(u64, u64, u64)> {
    let (mut size, mut files, mut dirs) = (0, 0, 0);

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !volume.is_internal(e.path()));

    for entry in walker.filter_map(|e| e.ok()) {
        check_cancelled(token)?;
        if entry.file_type().is_dir() {
            dirs += 1;
        } else {
            files += 1;
            size += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }

    Ok((size, files, dirs))
}

pub(super) async fn size(
    _driver: &FileSystemDriver,
    cmd: &SizeCommand,
    token: &CancellationToken,
) -> Result<SizeResponse> {
    check_cancelled(token)?;
    let mut response = SizeResponse::default();

    for target in &cmd.targets.targets {
        if !target.attribute().read {
            return Err(permission_denied());
        }

        if target.is_directory() {
            let volume: Arc<Volume> = target.volume.clone();
            let dir = target.full_path().to_path_buf();
            let token = token.clone();
            let (size, files, dirs) =
                tokio::task::spawn_blocking(move || dir_usage(&volume, &dir, &token)).await??;

            response.dir_cnt += 1 + dirs;
            response.file_cnt += files;
            response.size += size;
        } else {
            response.file_cnt += 1;
            response.size += tokio::fs::metadata(target.full_path()).await?.len();
        }
    }

    Ok(response)
}

pub(super) async fn file(
    _driver: &FileSystemDriver,
    cmd: &FileCommand,
    token: &CancellationToken,
) -> Result<FileResponse> {
    check_cancelled(token)?;
    let target = &cmd.target;
    let path = require_file(target)?;
    if !target.attribute().can_download() {
        return Err(permission_denied());
    }

    Ok(FileResponse {
        content_type: mime_of(path),
        file_name: target.name(),
        body: FileBody::Path(path.to_path_buf()),
        disposition: if cmd.download {
            Disposition::Attachment
        } else {
            Disposition::Inline
        },
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Fixture;
    use super::*;
    use crate::command::TargetsCommand;
    use crate::volume::ObjectAttribute;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn test_open_init_lists_root() {
        let fx = Fixture::new();
        fx.write("a.txt", b"a");
        fx.mkdir("docs");

        let cmd = OpenCommand {
            target: None,
            volume: fx.volume.clone(),
            init: true,
            tree: false,
            mimes: vec![],
        };
        let resp = open(&fx.driver, &cmd, &token()).await.unwrap();

        assert_eq!(resp.cwd.hash, "v1_");
        assert!(resp.cwd_is_root);
        assert_eq!(resp.api.as_deref(), Some("2.1"));
        let names: Vec<_> = resp.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "docs"]);
    }

    #[tokio::test]
    async fn test_open_uses_start_directory() {
        let fx = Fixture::with(|vol| vol.start_directory = Some(vol.root.join("home")));
        fx.write("home/note.txt", b"");
        fx.mkdir("other");

        let cmd = OpenCommand {
            target: None,
            volume: fx.volume.clone(),
            init: true,
            tree: false,
            mimes: vec![],
        };
        let resp = open(&fx.driver, &cmd, &token()).await.unwrap();

        assert_eq!(resp.cwd.name, "home");
        assert!(!resp.cwd_is_root);
        assert_eq!(resp.options.path, "files/home");
        let names: Vec<_> = resp.files.iter().map(|f| f.name.as_str()).collect();
        // Root's sub-directories come first, then the cwd listing
        assert_eq!(names, vec!["home", "other", "note.txt"]);
    }

    #[tokio::test]
    async fn test_open_filters_by_mime() {
        let fx = Fixture::new();
        fx.write("a.txt", b"");
        fx.write("b.png", b"");

        let cmd = OpenCommand {
            target: Some(fx.path("").await),
            volume: fx.volume.clone(),
            init: false,
            tree: false,
            mimes: vec!["image".to_string()],
        };
        let resp = open(&fx.driver, &cmd, &token()).await.unwrap();
        let names: Vec<_> = resp.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["b.png"]);
        assert!(resp.api.is_none());
    }

    #[tokio::test]
    async fn test_ls_intersect_is_case_insensitive() {
        let fx = Fixture::new();
        fx.write("Report.TXT", b"");
        fx.write("other.txt", b"");

        let cmd = LsCommand {
            target: fx.path("").await,
            intersect: vec!["report.txt".to_string()],
            mimes: vec![],
        };
        let resp = ls(&fx.driver, &cmd, &token()).await.unwrap();
        assert_eq!(resp.list.len(), 1);
        assert_eq!(resp.list.values().next().unwrap(), "report.txt");
    }

    #[tokio::test]
    async fn test_mkdir_name_and_dirs() {
        let fx = Fixture::new();
        let cmd = MkdirCommand {
            target: fx.path("").await,
            name: Some("docs".to_string()),
            dirs: vec!["/up/a".to_string(), "/up/b".to_string()],
        };
        let resp = mkdir(&fx.driver, &cmd, &token()).await.unwrap();

        assert_eq!(resp.added.len(), 3);
        assert!(fx.root().join("docs").is_dir());
        assert!(fx.root().join("up/a").is_dir());
        assert_eq!(
            resp.hashes["/up/b"],
            format!("v1_{}", fx.driver.codec().encode("/up/b"))
        );
    }

    #[tokio::test]
    async fn test_mkdir_existing_name_fails() {
        let fx = Fixture::new();
        fx.mkdir("docs");
        let cmd = MkdirCommand {
            target: fx.path("").await,
            name: Some("docs".to_string()),
            dirs: vec![],
        };
        let err = mkdir(&fx.driver, &cmd, &token()).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Exists(name) if name == "docs"));
    }

    #[tokio::test]
    async fn test_mkdir_rejects_bad_name() {
        let fx = Fixture::new();
        let cmd = MkdirCommand {
            target: fx.path("").await,
            name: Some("../escape".to_string()),
            dirs: vec![],
        };
        let err = mkdir(&fx.driver, &cmd, &token()).await.unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidDirName));
    }

    #[tokio::test]
    async fn test_mkdir_on_read_only_volume() {
        let fx = Fixture::with(|vol| vol.read_only = true);
        let cmd = MkdirCommand {
            target: fx.path("").await,
            name: Some("docs".to_string()),
            dirs: vec![],
        };
        let err = mkdir(&fx.driver, &cmd, &token()).await.unwrap_err();
        assert!(matches!(err, ConnectorError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_mkfile() {
        let fx = Fixture::new();
        let cmd = MkfileCommand {
            target: fx.path("").await,
            name: "new.txt".to_string(),
        };
        let resp = mkfile(&fx.driver, &cmd, &token()).await.unwrap();
        assert_eq!(resp.added[0].name, "new.txt");
        assert_eq!(resp.added[0].size, 0);

        let err = mkfile(&fx.driver, &cmd, &token()).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Exists(_)));
    }

    #[tokio::test]
    async fn test_rename() {
        let fx = Fixture::new();
        fx.write("a.txt", b"x");
        let target = fx.path("/a.txt").await;
        let old_hash = target.hash.clone();

        let cmd = RenameCommand {
            target,
            name: "b.txt".to_string(),
        };
        let resp = rename(&fx.driver, &cmd, &token()).await.unwrap();
        assert_eq!(resp.removed, vec![old_hash]);
        assert_eq!(resp.added[0].name, "b.txt");
        assert!(fx.root().join("b.txt").exists());
        assert!(!fx.root().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_rename_root_is_denied() {
        let fx = Fixture::new();
        let cmd = RenameCommand {
            target: fx.path("").await,
            name: "other".to_string(),
        };
        let err = rename(&fx.driver, &cmd, &token()).await.unwrap_err();
        assert!(matches!(err, ConnectorError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_rm_files_and_dirs() {
        let fx = Fixture::new();
        fx.write("a.txt", b"x");
        fx.write("docs/b.txt", b"x");

        let targets = vec![fx.path("/a.txt").await, fx.path("/docs").await];
        let hashes: Vec<_> = targets.iter().map(|t| t.hash.clone()).collect();
        let cmd = RmCommand {
            targets: TargetsCommand::new(targets),
        };
        let resp = rm(&fx.driver, &cmd, &token()).await.unwrap();
        assert_eq!(resp.removed, hashes);
        assert!(!fx.root().join("a.txt").exists());
        assert!(!fx.root().join("docs").exists());
    }

    #[tokio::test]
    async fn test_rm_locked_entry_is_denied() {
        let fx = Fixture::with(|vol| {
            vol.attribute_rules.push(Arc::new(|path, _| {
                path.ends_with("keep.txt").then_some(ObjectAttribute {
                    locked: true,
                    ..ObjectAttribute::default()
                })
            }));
        });
        fx.write("keep.txt", b"x");
        let cmd = RmCommand {
            targets: TargetsCommand::new(vec![fx.path("/keep.txt").await]),
        };
        assert!(rm(&fx.driver, &cmd, &token()).await.is_err());
        assert!(fx.root().join("keep.txt").exists());
    }

    #[tokio::test]
    async fn test_size_counts_recursively() {
        let fx = Fixture::new();
        fx.write("docs/a.txt", b"12345");
        fx.write("docs/sub/b.txt", b"123");
        fx.write("c.txt", b"12");

        let cmd = SizeCommand {
            targets: TargetsCommand::new(vec![fx.path("/docs").await, fx.path("/c.txt").await]),
        };
        let resp = size(&fx.driver, &cmd, &token()).await.unwrap();
        assert_eq!(resp.size, 10);
        assert_eq!(resp.file_cnt, 3);
        assert_eq!(resp.dir_cnt, 2);
    }

    #[tokio::test]
    async fn test_file_on_directory_is_not_file() {
        let fx = Fixture::new();
        fx.mkdir("docs");
        let cmd = FileCommand {
            target: fx.path("/docs").await,
            download: true,
            reqid: None,
            cpath: None,
        };
        let err = file(&fx.driver, &cmd, &token()).await.unwrap_err();
        assert!(matches!(err, ConnectorError::NotFile));
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts() {
        let fx = Fixture::new();
        let token = CancellationToken::new();
        token.cancel();
        let cmd = TreeCommand {
            target: fx.path("").await,
        };
        let err = tree(&fx.driver, &cmd, &token).await.unwrap_err();
        assert!(err.is_aborted());
    }
}
