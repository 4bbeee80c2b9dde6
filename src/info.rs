//! Entry model sent to the client.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;

/// Mime reported for directories.
pub const MIME_DIRECTORY: &str = "directory";

/// The only archive format the connector creates and extracts.
pub const MIME_ZIP: &str = "application/zip";

/// One file or directory as listed to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileInfo {
    pub name: String,
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phash: Option<String>,
    pub mime: String,
    pub ts: i64,
    pub size: u64,
    pub read: u8,
    pub write: u8,
    pub locked: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dirs: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumeid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isroot: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<RootOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmb: Option<String>,
}

impl FileInfo {
    pub fn is_directory(&self) -> bool {
        self.mime == MIME_DIRECTORY
    }
}

/// Archive capabilities advertised with every root.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Archivers {
    pub create: Vec<String>,
    pub extract: Vec<String>,
    pub createext: HashMap<String, String>,
}

impl Default for Archivers {
    fn default() -> Self {
        Self {
            create: vec![MIME_ZIP.to_string()],
            extract: vec![MIME_ZIP.to_string()],
            createext: HashMap::from([(MIME_ZIP.to_string(), "zip".to_string())]),
        }
    }
}

/// Volume options attached to roots and to the `open` response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RootOptions {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmb_url: Option<String>,
    pub disabled: Vec<String>,
    pub separator: String,
    pub copy_overwrite: u8,
    pub upload_overwrite: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_max_size: Option<u64>,
    pub archivers: Archivers,
}

/// Mime type of a file, guessed from its extension.
pub fn mime_of(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Top-level type of a mime string (`image/png` gives `image`).
pub fn mime_top_level(mime: &str) -> &str {
    mime.split('/').next().unwrap_or(mime)
}

/// Whether `mime` passes a client mime filter.
///
/// An empty filter passes everything; entries may be full types or
/// top-level types.
pub fn mime_matches(mime: &str, filter: &[String]) -> bool {
    filter.is_empty()
        || filter
            .iter()
            .any(|f| f == mime || f == mime_top_level(mime))
}
