//! Recursive name search.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::ops::require_dir;
use super::{check_cancelled, FileSystemDriver};
use crate::command::{SearchCommand, CMD_SEARCH};
use crate::info::{mime_matches, mime_of};
use crate::path::file_name;
use crate::response::SearchResponse;
use crate::volume::Volume;
use crate::{ConnectorError, Result};

/// Files and directories below `dir` whose name contains `query`, ignoring case.
fn find_matches(
    volume: &Volume,
    dir: &Path,
    query: &str,
    token: &CancellationToken,
) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let query = query.to_lowercase();
    let (mut files, mut dirs) = (Vec::new(), Vec::new());

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            volume
                .object_attribute(e.path(), e.file_type().is_dir())
                .visible
        });

    for entry in walker.filter_map(|e| e.ok()) {
        check_cancelled(token)?;
        if !file_name(entry.path()).to_lowercase().contains(&query) {
            continue;
        }
        if entry.file_type().is_dir() {
            dirs.push(entry.into_path());
        } else {
            files.push(entry.into_path());
        }
    }

    Ok((files, dirs))
}

pub(super) async fn search(
    driver: &FileSystemDriver,
    cmd: &SearchCommand,
    token: &CancellationToken,
) -> Result<SearchResponse> {
    check_cancelled(token)?;
    let target = &cmd.target;
    let dir = require_dir(target)?;
    if !target.attribute().read {
        return Err(ConnectorError::PermissionDenied(String::new()));
    }

    if let Some(search_type) = cmd.search_type.as_deref().filter(|t| !t.trim().is_empty()) {
        let handler = driver.search.get(search_type).ok_or_else(|| {
            tracing::debug!(search_type, "No custom search registered");
            ConnectorError::CommandParams(CMD_SEARCH.to_string())
        })?;
        return handler(cmd.clone(), token.clone()).await;
    }

    let volume: Arc<Volume> = target.volume.clone();
    let (files, dirs) = {
        let volume = volume.clone();
        let dir = dir.to_path_buf();
        let query = cmd.q.clone();
        let token = token.clone();
        tokio::task::spawn_blocking(move || find_matches(&volume, &dir, &query, &token)).await??
    };

    let mut response = SearchResponse::default();
    for file in files {
        if mime_matches(&mime_of(&file), &cmd.mimes) {
            response.files.push(driver.file_info(&volume, &file).await?);
        }
    }
    if cmd.mimes.is_empty() {
        for sub in dirs {
            response.files.push(driver.dir_info(&volume, &sub).await?);
        }
    }

    Ok(response)
}
