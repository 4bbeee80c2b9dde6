//! Storage drivers.
//!
//! A [`Driver`] implements every protocol verb against one kind of storage.
//! The dispatcher resolves all paths before calling in, so each method gets a
//! populated command plus the request's cancellation token.

pub mod fs;
pub mod hooks;
pub mod media;
pub mod search;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::command::{
    ArchiveCommand, DimCommand, DuplicateCommand, ExtractCommand, FileCommand, GetCommand,
    InfoCommand, LsCommand, MkdirCommand, MkfileCommand, OpenCommand, ParentsCommand,
    PasteCommand, PutCommand, RenameCommand, ResizeCommand, RmCommand, SearchCommand,
    SizeCommand, TmbCommand, TreeCommand, UploadCommand, ZipdlCommand, ZipdlRawCommand,
};
use crate::info::FileInfo;
use crate::path::PathInfo;
use crate::response::{
    AddedResponse, ChangeResponse, ChangedResponse, DimResponse, FileResponse, GetResponse,
    ImageWithMime, InfoResponse, LsResponse, MkdirResponse, OpenResponse, RmResponse,
    SearchResponse, SizeResponse, TmbResponse, TreeResponse, UploadResponse, ZipdlResponse,
};
use crate::volume::Volume;
use crate::Result;

pub use fs::FileSystemDriver;
pub use hooks::{DriverEvent, DriverHooks, HookPoint};
pub use media::{MediaType, NoopMedia, PictureEditor, ThumbnailGenerator, VideoEditor};
pub use search::{SearchHandler, SearchRegistry};

/// Verb surface of a storage backend.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Materialize the entry at a decoded relative path.
    async fn parse_path(
        &self,
        path: &str,
        volume: &Arc<Volume>,
        hash: &str,
        create_if_not_exists: bool,
        file_by_default: bool,
    ) -> Result<PathInfo>;

    /// Create the volume's root and working directories.
    async fn setup_volume(&self, volume: &Volume) -> Result<()>;

    /// Client view of a volume root.
    async fn root_info(&self, volume: &Arc<Volume>) -> Result<FileInfo>;

    async fn open(&self, cmd: &OpenCommand, token: &CancellationToken) -> Result<OpenResponse>;
    async fn ls(&self, cmd: &LsCommand, token: &CancellationToken) -> Result<LsResponse>;
    async fn tree(&self, cmd: &TreeCommand, token: &CancellationToken) -> Result<TreeResponse>;
    async fn parents(&self, cmd: &ParentsCommand, token: &CancellationToken)
        -> Result<TreeResponse>;
    async fn info(&self, cmd: &InfoCommand, token: &CancellationToken) -> Result<InfoResponse>;
    async fn mkdir(&self, cmd: &MkdirCommand, token: &CancellationToken) -> Result<MkdirResponse>;
    async fn mkfile(&self, cmd: &MkfileCommand, token: &CancellationToken)
        -> Result<AddedResponse>;
    async fn rename(&self, cmd: &RenameCommand, token: &CancellationToken)
        -> Result<ChangeResponse>;
    async fn rm(&self, cmd: &RmCommand, token: &CancellationToken) -> Result<RmResponse>;
    async fn paste(&self, cmd: &PasteCommand, token: &CancellationToken)
        -> Result<ChangeResponse>;
    async fn duplicate(
        &self,
        cmd: &DuplicateCommand,
        token: &CancellationToken,
    ) -> Result<AddedResponse>;
    async fn size(&self, cmd: &SizeCommand, token: &CancellationToken) -> Result<SizeResponse>;
    async fn dim(&self, cmd: &DimCommand, token: &CancellationToken) -> Result<DimResponse>;
    async fn tmb(&self, cmd: &TmbCommand, token: &CancellationToken) -> Result<TmbResponse>;
    async fn file(&self, cmd: &FileCommand, token: &CancellationToken) -> Result<FileResponse>;
    async fn get(&self, cmd: &GetCommand, token: &CancellationToken) -> Result<GetResponse>;
    async fn put(&self, cmd: &PutCommand, token: &CancellationToken) -> Result<ChangedResponse>;
    async fn resize(
        &self,
        cmd: &ResizeCommand,
        token: &CancellationToken,
    ) -> Result<ChangedResponse>;
    async fn archive(&self, cmd: &ArchiveCommand, token: &CancellationToken)
        -> Result<AddedResponse>;
    async fn extract(&self, cmd: &ExtractCommand, token: &CancellationToken)
        -> Result<AddedResponse>;
    async fn search(&self, cmd: &SearchCommand, token: &CancellationToken)
        -> Result<SearchResponse>;
    async fn upload(&self, cmd: &UploadCommand, token: &CancellationToken)
        -> Result<UploadResponse>;
    /// Roll back an in-flight chunked upload.
    async fn abort_upload(&self, cmd: &UploadCommand, token: &CancellationToken) -> Result<()>;
    async fn zipdl(&self, cmd: &ZipdlCommand, token: &CancellationToken) -> Result<ZipdlResponse>;
    async fn zipdl_raw(
        &self,
        cmd: &ZipdlRawCommand,
        token: &CancellationToken,
    ) -> Result<FileResponse>;
    /// Thumbnail bytes for `target`, if one exists or can be made now.
    async fn thumb(&self, target: &PathInfo, token: &CancellationToken)
        -> Result<Option<ImageWithMime>>;
}
