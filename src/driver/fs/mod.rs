//! Local filesystem driver.
//!
//! Every verb is implemented against `tokio::fs`; blocking work (zip
//! streams, recursive walks, media codecs) runs on the blocking pool via
//! `spawn_blocking`. Each sub-module holds one verb family:
//!
//! - `entries`: `FileInfo` construction and directory listing
//! - `conflict`: copy names, backups and overwrite decisions
//! - `ops`: navigation and simple mutations (open, ls, mkdir, rename, rm, ...)
//! - `transfer`: paste and duplicate
//! - `content`: get, put and image edits
//! - `archive`: archive, extract and zip downloads
//! - `upload`: plain and chunked uploads with rollback
//! - `search`: the built-in name search
//! - `thumb`: thumbnail generation and cleanup

mod archive;
mod conflict;
mod content;
mod entries;
mod ops;
mod search;
mod thumb;
mod transfer;
mod upload;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::command::{
    ArchiveCommand, DimCommand, DuplicateCommand, ExtractCommand, FileCommand, GetCommand,
    InfoCommand, LsCommand, MkdirCommand, MkfileCommand, OpenCommand, ParentsCommand,
    PasteCommand, PutCommand, RenameCommand, ResizeCommand, RmCommand, SearchCommand,
    SizeCommand, TmbCommand, TreeCommand, UploadCommand, ZipdlCommand, ZipdlRawCommand,
};
use crate::config::ConnectorConfig;
use crate::driver::hooks::DriverHooks;
use crate::driver::media::{NoopMedia, PictureEditor, ThumbnailGenerator, VideoEditor};
use crate::driver::search::SearchRegistry;
use crate::driver::Driver;
use crate::info::FileInfo;
use crate::manager::ConnectorManager;
use crate::path::{resolve_under, Entry, PathCodec, PathInfo};
use crate::response::{
    AddedResponse, ChangeResponse, ChangedResponse, DimResponse, FileResponse, GetResponse,
    ImageWithMime, InfoResponse, LsResponse, MkdirResponse, OpenResponse, RmResponse,
    SearchResponse, SizeResponse, TmbResponse, TreeResponse, UploadResponse, ZipdlResponse,
};
use crate::volume::Volume;
use crate::{ConnectorError, Result};

/// Driver serving volumes rooted on the local filesystem.
pub struct FileSystemDriver {
    codec: PathCodec,
    hooks: Arc<DriverHooks>,
    manager: Arc<ConnectorManager>,
    search: SearchRegistry,
    picture_editor: Arc<dyn PictureEditor>,
    video_editor: Arc<dyn VideoEditor>,
    thumbnail_generator: Arc<dyn ThumbnailGenerator>,
    http: reqwest::Client,
    status_file: String,
    chunk_secret: String,
    thumbnail_url: String,
    disabled_commands: Vec<String>,
}

impl Default for FileSystemDriver {
    fn default() -> Self {
        let config = ConnectorConfig::default();
        Self {
            codec: PathCodec::default(),
            hooks: Arc::new(DriverHooks::new()),
            manager: Arc::new(ConnectorManager::default()),
            search: SearchRegistry::new(),
            picture_editor: Arc::new(NoopMedia),
            video_editor: Arc::new(NoopMedia),
            thumbnail_generator: Arc::new(NoopMedia),
            http: reqwest::Client::new(),
            status_file: config.status_file,
            chunk_secret: config.chunk_secret,
            thumbnail_url: config.thumbnail_url,
            disabled_commands: config.disabled_ui_commands,
        }
    }
}

impl std::fmt::Debug for FileSystemDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystemDriver")
            .field("hooks", &self.hooks)
            .field("search", &self.search)
            .field("status_file", &self.status_file)
            .finish_non_exhaustive()
    }
}

impl FileSystemDriver {
    /// Driver sharing `codec` and `manager` with the connector.
    pub fn new(codec: PathCodec, manager: Arc<ConnectorManager>, config: &ConnectorConfig) -> Self {
        Self {
            codec,
            manager,
            status_file: config.status_file.clone(),
            chunk_secret: config.chunk_secret.clone(),
            thumbnail_url: config.thumbnail_url.clone(),
            disabled_commands: config.disabled_ui_commands.clone(),
            ..Self::default()
        }
    }

    pub fn with_picture_editor(mut self, editor: Arc<dyn PictureEditor>) -> Self {
        self.picture_editor = editor;
        self
    }

    pub fn with_video_editor(mut self, editor: Arc<dyn VideoEditor>) -> Self {
        self.video_editor = editor;
        self
    }

    pub fn with_thumbnail_generator(mut self, generator: Arc<dyn ThumbnailGenerator>) -> Self {
        self.thumbnail_generator = generator;
        self
    }

    /// Lifecycle hooks; register observers here before serving.
    pub fn hooks(&self) -> &DriverHooks {
        &self.hooks
    }

    /// Custom search strategies, selected by the `type` parameter.
    pub fn search_registry(&self) -> &SearchRegistry {
        &self.search
    }

    pub fn manager(&self) -> &Arc<ConnectorManager> {
        &self.manager
    }

    pub fn codec(&self) -> &PathCodec {
        &self.codec
    }
}

/// Fail fast once the request has been aborted.
pub(crate) fn check_cancelled(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        return Err(ConnectorError::ConnectionAborted);
    }
    Ok(())
}

async fn create_hidden_dir(path: &Path) -> Result<()> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        tokio::fs::create_dir_all(path).await?;
        tracing::debug!(path = %path.display(), "Created volume directory");
    }
    Ok(())
}

#[async_trait]
impl Driver for FileSystemDriver {
    async fn parse_path(
        &self,
        path: &str,
        volume: &Arc<Volume>,
        hash: &str,
        create_if_not_exists: bool,
        file_by_default: bool,
    ) -> Result<PathInfo> {
        let full = resolve_under(&volume.root, path)?;
        let meta = tokio::fs::metadata(&full).await.ok();

        let entry = match meta {
            Some(m) if m.is_dir() => Entry::Directory(full),
            Some(_) => Entry::File(full),
            None if create_if_not_exists && file_by_default => Entry::File(full),
            None if create_if_not_exists => Entry::Directory(full),
            None if file_by_default => return Err(ConnectorError::FileNotFound),
            None => return Err(ConnectorError::DirectoryNotFound),
        };

        Ok(PathInfo::new(
            path.to_string(),
            volume.clone(),
            entry,
            hash.to_string(),
        ))
    }

    async fn setup_volume(&self, volume: &Volume) -> Result<()> {
        for dir in [
            &volume.thumbnail_directory,
            &volume.temp_directory,
            &volume.temp_archive_directory,
            &volume.chunk_directory,
        ]
        .into_iter()
        .flatten()
        {
            create_hidden_dir(dir).await?;
        }
        create_hidden_dir(&volume.root).await
    }

    async fn root_info(&self, volume: &Arc<Volume>) -> Result<FileInfo> {
        self.dir_info(volume, &volume.root).await
    }

    async fn open(&self, cmd: &OpenCommand, token: &CancellationToken) -> Result<OpenResponse> {
        ops::open(self, cmd, token).await
    }

    async fn ls(&self, cmd: &LsCommand, token: &CancellationToken) -> Result<LsResponse> {
        ops::ls(self, cmd, token).await
    }

    async fn tree(&self, cmd: &TreeCommand, token: &CancellationToken) -> Result<TreeResponse> {
        ops::tree(self, cmd, token).await
    }

    async fn parents(
        &self,
        cmd: &ParentsCommand,
        token: &CancellationToken,
    ) -> Result<TreeResponse> {
        ops::parents(self, cmd, token).await
    }

    async fn info(&self, cmd: &InfoCommand, token: &CancellationToken) -> Result<InfoResponse> {
        ops::info(self, cmd, token).await
    }

    async fn mkdir(&self, cmd: &MkdirCommand, token: &CancellationToken) -> Result<MkdirResponse> {
        ops::mkdir(self, cmd, token).await
    }

    async fn mkfile(
        &self,
        cmd: &MkfileCommand,
        token: &CancellationToken,
    ) -> Result<AddedResponse> {
        ops::mkfile(self, cmd, token).await
    }

    async fn rename(
        &self,
        cmd: &RenameCommand,
        token: &CancellationToken,
    ) -> Result<ChangeResponse> {
        ops::rename(self, cmd, token).await
    }

    async fn rm(&self, cmd: &RmCommand, token: &CancellationToken) -> Result<RmResponse> {
        ops::rm(self, cmd, token).await
    }

    async fn paste(
        &self,
        cmd: &PasteCommand,
        token: &CancellationToken,
    ) -> Result<ChangeResponse> {
        transfer::paste(self, cmd, token).await
    }

    async fn duplicate(
        &self,
        cmd: &DuplicateCommand,
        token: &CancellationToken,
    ) -> Result<AddedResponse> {
        transfer::duplicate(self, cmd, token).await
    }

    async fn size(&self, cmd: &SizeCommand, token: &CancellationToken) -> Result<SizeResponse> {
        ops::size(self, cmd, token).await
    }

    async fn dim(&self, cmd: &DimCommand, token: &CancellationToken) -> Result<DimResponse> {
        content::dim(self, cmd, token).await
    }

    async fn tmb(&self, cmd: &TmbCommand, token: &CancellationToken) -> Result<TmbResponse> {
        thumb::tmb(self, cmd, token).await
    }

    async fn file(&self, cmd: &FileCommand, token: &CancellationToken) -> Result<FileResponse> {
        ops::file(self, cmd, token).await
    }

    async fn get(&self, cmd: &GetCommand, token: &CancellationToken) -> Result<GetResponse> {
        content::get(self, cmd, token).await
    }

    async fn put(&self, cmd: &PutCommand, token: &CancellationToken) -> Result<ChangedResponse> {
        content::put(self, cmd, token).await
    }

    async fn resize(
        &self,
        cmd: &ResizeCommand,
        token: &CancellationToken,
    ) -> Result<ChangedResponse> {
        content::resize(self, cmd, token).await
    }

    async fn archive(
        &self,
        cmd: &ArchiveCommand,
        token: &CancellationToken,
    ) -> Result<AddedResponse> {
        archive::archive(self, cmd, token).await
    }

    async fn extract(
        &self,
        cmd: &ExtractCommand,
        token: &CancellationToken,
    ) -> Result<AddedResponse> {
        archive::extract(self, cmd, token).await
    }

    async fn search(
        &self,
        cmd: &SearchCommand,
        token: &CancellationToken,
    ) -> Result<SearchResponse> {
        search::search(self, cmd, token).await
    }

    async fn upload(
        &self,
        cmd: &UploadCommand,
        token: &CancellationToken,
    ) -> Result<UploadResponse> {
        upload::upload(self, cmd, token).await
    }

    async fn abort_upload(&self, cmd: &UploadCommand, token: &CancellationToken) -> Result<()> {
        upload::abort_upload(self, cmd, token).await
    }

    async fn zipdl(&self, cmd: &ZipdlCommand, token: &CancellationToken) -> Result<ZipdlResponse> {
        archive::zipdl(self, cmd, token).await
    }

    async fn zipdl_raw(
        &self,
        cmd: &ZipdlRawCommand,
        token: &CancellationToken,
    ) -> Result<FileResponse> {
        archive::zipdl_raw(self, cmd, token).await
    }

    async fn thumb(
        &self,
        target: &PathInfo,
        token: &CancellationToken,
    ) -> Result<Option<ImageWithMime>> {
        thumb::thumb(self, target, token).await
    }
}
