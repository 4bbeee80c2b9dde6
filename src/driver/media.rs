//! Image and video collaborators.
//!
//! The connector never decodes media itself; it calls these traits and
//! treats the returned bytes as opaque.

use std::path::Path;

use crate::response::ImageWithMime;
use crate::{ConnectorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Image,
    Video,
}

pub trait PictureEditor: Send + Sync {
    /// Whether files with this extension (without the dot) can be processed.
    fn can_process_file(&self, extension: &str) -> bool;

    fn generate_thumbnail(
        &self,
        image: &[u8],
        size: u32,
        keep_aspect_ratio: bool,
    ) -> Result<ImageWithMime>;

    fn scale(&self, image: &[u8], width: u32, height: u32, quality: Option<u8>)
        -> Result<ImageWithMime>;

    fn crop(
        &self,
        image: &[u8],
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        quality: Option<u8>,
    ) -> Result<ImageWithMime>;

    fn rotate(
        &self,
        image: &[u8],
        degree: i32,
        background: Option<&str>,
        quality: Option<u8>,
    ) -> Result<ImageWithMime>;

    /// `(width, height)` of the image.
    fn image_size(&self, image: &[u8]) -> Result<(u32, u32)>;
}

pub trait VideoEditor: Send + Sync {
    fn can_process_file(&self, extension: &str) -> bool;

    fn generate_thumbnail(
        &self,
        video: &Path,
        size: u32,
        keep_aspect_ratio: bool,
    ) -> Result<ImageWithMime>;
}

/// Background thumbnail worker. Enqueueing never blocks.
pub trait ThumbnailGenerator: Send + Sync {
    /// Returns whether the job was accepted.
    fn try_enqueue(
        &self,
        source: &Path,
        thumb: &Path,
        size: u32,
        keep_aspect_ratio: bool,
        media_type: MediaType,
    ) -> bool;
}

/// Stand-in for deployments without media support.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMedia;

impl PictureEditor for NoopMedia {
    fn can_process_file(&self, _extension: &str) -> bool {
        false
    }

    fn generate_thumbnail(&self, _: &[u8], _: u32, _: bool) -> Result<ImageWithMime> {
        Err(ConnectorError::CommandNoSupport)
    }

    fn scale(&self, _: &[u8], _: u32, _: u32, _: Option<u8>) -> Result<ImageWithMime> {
        Err(ConnectorError::CommandNoSupport)
    }

    fn crop(&self, _: &[u8], _: u32, _: u32, _: u32, _: u32, _: Option<u8>) -> Result<ImageWithMime> {
        Err(ConnectorError::CommandNoSupport)
    }

    fn rotate(&self, _: &[u8], _: i32, _: Option<&str>, _: Option<u8>) -> Result<ImageWithMime> {
        Err(ConnectorError::CommandNoSupport)
    }

    fn image_size(&self, _: &[u8]) -> Result<(u32, u32)> {
        Err(ConnectorError::CommandNoSupport)
    }
}

impl VideoEditor for NoopMedia {
    fn can_process_file(&self, _extension: &str) -> bool {
        false
    }

    fn generate_thumbnail(&self, _: &Path, _: u32, _: bool) -> Result<ImageWithMime> {
        Err(ConnectorError::CommandNoSupport)
    }
}

impl ThumbnailGenerator for NoopMedia {
    fn try_enqueue(&self, _: &Path, _: &Path, _: u32, _: bool, _: MediaType) -> bool {
        false
    }
}
