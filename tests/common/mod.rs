//! Test helpers for connector integration tests.
//!
//! Provides a connector over temporary volumes plus helpers for building
//! requests and target hashes.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tempfile::TempDir;

use elfinder_connector::config::ConnectorConfig;
use elfinder_connector::{
    Connector, ConnectorCommand, ConnectorManager, ConnectorOptions, ConnectorResult,
    FileSystemDriver, PathCodec, Volume,
};

/// Connector serving one temporary directory per volume.
pub struct TestVolumes {
    pub connector: Arc<Connector>,
    pub driver: Arc<FileSystemDriver>,
    dirs: Vec<TempDir>,
}

impl TestVolumes {
    /// `count` default volumes.
    pub async fn new(count: usize) -> Self {
        Self::with(count, |_| {}).await
    }

    /// `count` volumes, each passed through `configure` before registration.
    pub async fn with(count: usize, configure: impl Fn(&mut Volume)) -> Self {
        let codec = PathCodec::default();
        let manager = Arc::new(ConnectorManager::default());
        let driver = Arc::new(FileSystemDriver::new(
            codec.clone(),
            manager.clone(),
            &ConnectorConfig::default(),
        ));
        let options = ConnectorOptions {
            enabled_commands: None,
            error_delay: Duration::ZERO,
        };

        let mut connector = Connector::new(options, codec, manager);
        let mut dirs = Vec::with_capacity(count);
        for _ in 0..count {
            let dir = TempDir::new().expect("Failed to create temp dir");
            let mut volume = Volume::new(dir.path(), driver.clone());
            volume.chunk_directory = Some(volume.root.join(".chunks"));
            volume.thumbnail_directory = Some(volume.root.join(".tmb"));
            volume.temp_archive_directory = Some(volume.root.join(".tmp"));
            configure(&mut volume);
            connector.add_volume(volume);
            dirs.push(dir);
        }
        connector.setup().await.expect("Failed to set up volumes");

        Self {
            connector: Arc::new(connector),
            driver,
            dirs,
        }
    }

    /// Root directory of volume `idx`.
    pub fn root(&self, idx: usize) -> &Path {
        self.dirs[idx].path()
    }

    pub fn full(&self, idx: usize, relative: &str) -> PathBuf {
        self.root(idx).join(relative)
    }

    /// Target hash of `relative` (`""` or `/a/b`) on volume `idx`.
    pub fn hash(&self, idx: usize, relative: &str) -> String {
        format!(
            "{}{}",
            self.connector.volumes()[idx].volume_id,
            self.connector.codec().encode(relative)
        )
    }

    /// Write a file, creating its parents.
    pub fn write(&self, idx: usize, relative: &str, data: &[u8]) {
        let full = self.full(idx, relative);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent");
        }
        std::fs::write(full, data).expect("Failed to write file");
    }

    pub fn read(&self, idx: usize, relative: &str) -> Vec<u8> {
        std::fs::read(self.full(idx, relative)).expect("Failed to read file")
    }

    /// Run a command built from `pairs`.
    pub async fn process(&self, pairs: &[(&str, &str)]) -> ConnectorResult {
        self.connector
            .process(ConnectorCommand::from_pairs(pairs.iter().copied()))
            .await
    }

    /// Run a command and return its JSON body.
    pub async fn json(&self, pairs: &[(&str, &str)]) -> Value {
        let result = self.process(pairs).await;
        result.json().cloned().expect("Expected a JSON result")
    }
}

/// `name` of every entry in a JSON file list.
pub fn names(files: &Value) -> Vec<String> {
    let mut names: Vec<String> = files
        .as_array()
        .expect("Expected an array")
        .iter()
        .filter_map(|f| f["name"].as_str().map(str::to_string))
        .collect();
    names.sort();
    names
}

/// Relative paths of every file below `root`, sorted, skipping dot entries.
pub fn tree(root: &Path) -> Vec<String> {
    let mut paths: Vec<String> = walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    paths.sort();
    paths
}
