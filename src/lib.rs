//! elFinder connector
//!
//! Server side of the elFinder file manager protocol: volume-backed file
//! operations, chunked uploads with rollback and zip downloads, served over
//! HTTP.

pub mod command;
pub mod config;
pub mod connector;
pub mod driver;
pub mod error;
pub mod info;
pub mod logging;
pub mod manager;
pub mod path;
pub mod response;
pub mod volume;
pub mod web;

pub use command::{Command, ConnectorCommand, UploadedFile};
pub use config::{Config, ConnectorConfig, ManagerConfig, ServerConfig, VolumeConfig};
pub use connector::{Connector, ConnectorOptions};
pub use driver::{
    Driver, DriverEvent, DriverHooks, FileSystemDriver, HookPoint, MediaType, PictureEditor,
    SearchRegistry, ThumbnailGenerator, VideoEditor,
};
pub use error::{ConnectorError, ErrorCode, ErrorResponse, Result};
pub use info::FileInfo;
pub use manager::{ConnectorManager, ManagerOptions};
pub use path::{PathCipher, PathCodec, PathInfo};
pub use response::ConnectorResult;
pub use volume::{ObjectAttribute, Volume};
pub use web::WebServer;
