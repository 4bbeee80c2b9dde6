//! Verb responses and the uniform connector result.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;

use crate::error::ErrorResponse;
use crate::info::{FileInfo, RootOptions};

/// Protocol version reported on `open` with `init=1`.
pub const API_VERSION: &str = "2.1";

/// Cookie set on downloads when the client asks for completion tracking.
pub const COOKIE_ELFDL: &str = "elfdl";

#[derive(Debug, Clone, Serialize)]
pub struct DebugInfo {
    pub connector: String,
    pub time: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenResponse {
    pub cwd: FileInfo,
    pub files: Vec<FileInfo>,
    pub options: RootOptions,
    pub upl_max_file: Option<usize>,
    pub upl_max_size: Option<String>,
    pub net_drivers: Vec<String>,
    pub debug: DebugInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api: Option<String>,
    #[serde(skip)]
    pub cwd_is_root: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LsResponse {
    /// Hash to name.
    pub list: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TreeResponse {
    pub tree: Vec<FileInfo>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InfoResponse {
    pub files: Vec<FileInfo>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MkdirResponse {
    pub added: Vec<FileInfo>,
    /// Requested relative dir (`/a/b`) to its hash, for `dirs[]`.
    pub hashes: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AddedResponse {
    pub added: Vec<FileInfo>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChangeResponse {
    pub added: Vec<FileInfo>,
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RmResponse {
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeResponse {
    pub size: u64,
    pub file_cnt: u64,
    pub dir_cnt: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DimResponse {
    pub dim: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TmbResponse {
    /// Hash to thumbnail file name.
    pub images: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    /// File content, or `false` when it cannot be shown.
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doconv: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChangedResponse {
    pub changed: Vec<FileInfo>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResponse {
    pub files: Vec<FileInfo>,
}

impl SearchResponse {
    pub fn concat(&mut self, other: SearchResponse) {
        self.files.extend(other.files);
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadResponse {
    pub added: Vec<FileInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warning: Vec<String>,
    #[serde(skip)]
    pub warning_details: Vec<ErrorResponse>,
    #[serde(rename = "_chunkmerged", skip_serializing_if = "Option::is_none")]
    pub chunk_merged: Option<String>,
    #[serde(rename = "_name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ZipdlData {
    pub file: String,
    pub name: String,
    pub mime: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ZipdlResponse {
    pub zipdl: ZipdlData,
}

#[derive(Debug, Clone, Serialize)]
pub struct AbortResponse {
    pub success: bool,
}

/// How the client should treat a raw file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Attachment,
    Inline,
}

#[derive(Debug, Clone)]
pub enum FileBody {
    /// Stream from disk.
    Path(PathBuf),
    /// Stream from disk, then delete the file.
    Temp(PathBuf),
    Bytes(Vec<u8>),
}

/// A raw file answer (`file`, `zipdl` download, thumbnails).
#[derive(Debug, Clone)]
pub struct FileResponse {
    pub content_type: String,
    pub file_name: String,
    pub body: FileBody,
    pub disposition: Disposition,
}

/// Thumbnail or edited image bytes.
#[derive(Debug, Clone)]
pub struct ImageWithMime {
    pub data: Vec<u8>,
    pub mime: String,
}

#[derive(Debug, Clone)]
pub enum ResultBody {
    Json(Value),
    File(FileResponse),
}

/// What the dispatcher hands back to the HTTP adapter.
#[derive(Debug, Clone)]
pub struct ConnectorResult {
    pub status: u16,
    pub body: ResultBody,
    pub cookies: Vec<(String, String)>,
}

impl ConnectorResult {
    pub fn success<T: Serialize>(response: &T) -> Self {
        let body = serde_json::to_value(response).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to serialize response");
            serde_json::json!({ "error": "errUnknown" })
        });
        Self {
            status: 200,
            body: ResultBody::Json(body),
            cookies: vec![],
        }
    }

    pub fn file(response: FileResponse) -> Self {
        Self {
            status: 200,
            body: ResultBody::File(response),
            cookies: vec![],
        }
    }

    pub fn error(response: &ErrorResponse) -> Self {
        let mut result = Self::success(response);
        result.status = response.status_code();
        result
    }

    pub fn with_cookies(mut self, cookies: Vec<(String, String)>) -> Self {
        self.cookies = cookies;
        self
    }

    /// JSON body, if this is not a file result.
    pub fn json(&self) -> Option<&Value> {
        match &self.body {
            ResultBody::Json(v) => Some(v),
            ResultBody::File(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.json().is_some_and(|v| v.get("error").is_some())
    }
}
