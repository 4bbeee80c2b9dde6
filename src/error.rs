//! Error types for the connector.
//!
//! Every fault raised while serving a command is a [`ConnectorError`]. The
//! dispatcher turns it into an [`ErrorResponse`] through
//! [`ConnectorError::to_response`], which owns the mapping onto the fixed set of
//! wire codes understood by the client.

use serde::Serialize;
use thiserror::Error;

/// Common error type for the connector.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// I/O error from the underlying filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The verb is not known to the dispatcher.
    #[error("unknown command")]
    UnknownCommand,

    /// Unsupported archive mime type.
    #[error("unsupported archive type")]
    ArchiveType,

    /// An entry with the given name already exists.
    #[error("{0} already exists")]
    Exists(String),

    /// The request carried no verb.
    #[error("command required")]
    CommandRequired,

    /// Access denied by the filesystem.
    #[error("access denied")]
    AccessDenied,

    /// File not found.
    #[error("file not found")]
    FileNotFound,

    /// Directory not found.
    #[error("directory not found")]
    DirectoryNotFound,

    /// Invalid parameters for the named command.
    #[error("invalid parameters: {0}")]
    CommandParams(String),

    /// The request was aborted by the client.
    #[error("connection aborted")]
    ConnectionAborted,

    /// Insufficient capability or a path outside of its volume.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// An uploaded file exceeds the volume limit.
    #[error("upload file size exceeded")]
    UploadFileSize,

    /// The verb is disabled on this connector.
    #[error("command not supported")]
    CommandNoSupport,

    /// The target is not a file.
    #[error("not a file")]
    NotFile,

    /// Upload failure for the given file name.
    #[error("upload failed: {0}")]
    UploadFile(String),

    /// Invalid file name.
    #[error("invalid file name")]
    InvalidFileName,

    /// Invalid directory name.
    #[error("invalid directory name")]
    InvalidDirName,

    /// Uploaded mime type rejected by the volume rules.
    #[error("mime type not allowed")]
    UploadMime,

    /// A hash or chunk parameter could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Zip read or write failure.
    #[error("archive error: {0}")]
    Archive(String),

    /// Remote fetch failure.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Validation error for request input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

impl Clone for ConnectorError {
    fn clone(&self) -> Self {
        match self {
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
            Self::UnknownCommand => Self::UnknownCommand,
            Self::ArchiveType => Self::ArchiveType,
            Self::Exists(name) => Self::Exists(name.clone()),
            Self::CommandRequired => Self::CommandRequired,
            Self::AccessDenied => Self::AccessDenied,
            Self::FileNotFound => Self::FileNotFound,
            Self::DirectoryNotFound => Self::DirectoryNotFound,
            Self::CommandParams(cmd) => Self::CommandParams(cmd.clone()),
            Self::ConnectionAborted => Self::ConnectionAborted,
            Self::PermissionDenied(msg) => Self::PermissionDenied(msg.clone()),
            Self::UploadFileSize => Self::UploadFileSize,
            Self::CommandNoSupport => Self::CommandNoSupport,
            Self::NotFile => Self::NotFile,
            Self::UploadFile(name) => Self::UploadFile(name.clone()),
            Self::InvalidFileName => Self::InvalidFileName,
            Self::InvalidDirName => Self::InvalidDirName,
            Self::UploadMime => Self::UploadMime,
            Self::Decode(msg) => Self::Decode(msg.clone()),
            Self::Archive(msg) => Self::Archive(msg.clone()),
            Self::Http(msg) => Self::Http(msg.clone()),
            Self::Config(msg) => Self::Config(msg.clone()),
            Self::Validation(msg) => Self::Validation(msg.clone()),
            Self::Other(msg) => Self::Other(msg.clone()),
        }
    }
}

impl From<zip::result::ZipError> for ConnectorError {
    fn from(e: zip::result::ZipError) -> Self {
        match e {
            zip::result::ZipError::Io(io) => ConnectorError::Io(io),
            other => ConnectorError::Archive(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(e: reqwest::Error) -> Self {
        ConnectorError::Http(e.to_string())
    }
}

impl From<tokio::task::JoinError> for ConnectorError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            ConnectorError::ConnectionAborted
        } else {
            ConnectorError::Other(format!("background task failed: {e}"))
        }
    }
}

/// Wire-visible error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "errUnknownCmd")]
    UnknownCommand,
    #[serde(rename = "errArcType")]
    ArchiveType,
    #[serde(rename = "errExists")]
    Exists,
    #[serde(rename = "errCmdReq")]
    CommandRequired,
    #[serde(rename = "errAccess")]
    AccessDenied,
    #[serde(rename = "errFileNotFound")]
    FileNotFound,
    #[serde(rename = "errFolderNotFound")]
    FolderNotFound,
    #[serde(rename = "errCmdParams")]
    CommandParams,
    #[serde(rename = "errAbort")]
    ConnectionAborted,
    #[serde(rename = "errUnknown")]
    Unknown,
    #[serde(rename = "errPerm")]
    PermissionDenied,
    #[serde(rename = "errUploadFileSize")]
    UploadFileSize,
    #[serde(rename = "errCmdNoSupport")]
    CommandNoSupport,
    #[serde(rename = "errNotFile")]
    NotFile,
    #[serde(rename = "errUploadFile")]
    UploadFile,
    #[serde(rename = "errInvName")]
    InvalidFileName,
    #[serde(rename = "errInvDirname")]
    InvalidDirName,
    #[serde(rename = "errUploadMime")]
    UploadMime,
}

impl ErrorCode {
    /// Wire string for this code.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::UnknownCommand => "errUnknownCmd",
            ErrorCode::ArchiveType => "errArcType",
            ErrorCode::Exists => "errExists",
            ErrorCode::CommandRequired => "errCmdReq",
            ErrorCode::AccessDenied => "errAccess",
            ErrorCode::FileNotFound => "errFileNotFound",
            ErrorCode::FolderNotFound => "errFolderNotFound",
            ErrorCode::CommandParams => "errCmdParams",
            ErrorCode::ConnectionAborted => "errAbort",
            ErrorCode::Unknown => "errUnknown",
            ErrorCode::PermissionDenied => "errPerm",
            ErrorCode::UploadFileSize => "errUploadFileSize",
            ErrorCode::CommandNoSupport => "errCmdNoSupport",
            ErrorCode::NotFile => "errNotFile",
            ErrorCode::UploadFile => "errUploadFile",
            ErrorCode::InvalidFileName => "errInvName",
            ErrorCode::InvalidDirName => "errInvDirname",
            ErrorCode::UploadMime => "errUploadMime",
        }
    }

    /// HTTP status the adapter should answer with.
    ///
    /// Only unclassified faults are reported as server errors; every other
    /// code travels in a 200 response the way the client expects.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorCode::Unknown => 500,
            _ => 200,
        }
    }
}

/// Error payload: a bare code or a code followed by structured detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ErrorValue {
    Code(ErrorCode),
    Detailed(Vec<String>),
}

/// Uniform error response returned for every failed command.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorValue,
    #[serde(skip)]
    pub code: ErrorCode,
}

impl ErrorResponse {
    fn code(code: ErrorCode) -> Self {
        Self {
            error: ErrorValue::Code(code),
            code,
        }
    }

    fn detailed(code: ErrorCode, detail: &str) -> Self {
        Self {
            error: ErrorValue::Detailed(vec![code.as_str().to_string(), detail.to_string()]),
            code,
        }
    }

    /// HTTP status for this response.
    pub fn status_code(&self) -> u16 {
        self.code.status_code()
    }
}

impl ConnectorError {
    /// Map this fault onto the wire taxonomy for the given verb.
    pub fn to_response(&self, cmd: &str) -> ErrorResponse {
        match self {
            ConnectorError::UnknownCommand => ErrorResponse::code(ErrorCode::UnknownCommand),
            ConnectorError::ArchiveType => ErrorResponse::code(ErrorCode::ArchiveType),
            ConnectorError::Exists(name) => ErrorResponse::detailed(ErrorCode::Exists, name),
            ConnectorError::CommandRequired => ErrorResponse::code(ErrorCode::CommandRequired),
            ConnectorError::AccessDenied => ErrorResponse::code(ErrorCode::AccessDenied),
            ConnectorError::FileNotFound => ErrorResponse::code(ErrorCode::FileNotFound),
            ConnectorError::DirectoryNotFound => ErrorResponse::code(ErrorCode::FolderNotFound),
            ConnectorError::CommandParams(_)
            | ConnectorError::Decode(_)
            | ConnectorError::Validation(_) => {
                ErrorResponse::detailed(ErrorCode::CommandParams, cmd)
            }
            ConnectorError::ConnectionAborted => ErrorResponse::code(ErrorCode::ConnectionAborted),
            ConnectorError::PermissionDenied(_) => {
                ErrorResponse::code(ErrorCode::PermissionDenied)
            }
            ConnectorError::UploadFileSize => ErrorResponse::code(ErrorCode::UploadFileSize),
            ConnectorError::CommandNoSupport => ErrorResponse::code(ErrorCode::CommandNoSupport),
            ConnectorError::NotFile => ErrorResponse::code(ErrorCode::NotFile),
            ConnectorError::UploadFile(name) => {
                ErrorResponse::detailed(ErrorCode::UploadFile, name)
            }
            ConnectorError::InvalidFileName => ErrorResponse::code(ErrorCode::InvalidFileName),
            ConnectorError::InvalidDirName => ErrorResponse::code(ErrorCode::InvalidDirName),
            ConnectorError::UploadMime => ErrorResponse::code(ErrorCode::UploadMime),
            ConnectorError::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorResponse::code(ErrorCode::FileNotFound),
                _ => ErrorResponse::code(ErrorCode::AccessDenied),
            },
            ConnectorError::Archive(_)
            | ConnectorError::Http(_)
            | ConnectorError::Config(_)
            | ConnectorError::Other(_) => ErrorResponse::code(ErrorCode::Unknown),
        }
    }

    /// Whether this fault is a cancellation.
    pub fn is_aborted(&self) -> bool {
        matches!(self, ConnectorError::ConnectionAborted)
    }
}

/// Result type alias for connector operations.
pub type Result<T> = std::result::Result<T, ConnectorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_exists_error_display() {
        let err = ConnectorError::Exists("a.txt".to_string());
        assert_eq!(err.to_string(), "a.txt already exists");
    }

    #[test]
    fn test_permission_error_display() {
        let err = ConnectorError::PermissionDenied("Path must be inside parent".to_string());
        assert_eq!(err.to_string(), "permission denied: Path must be inside parent");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ConnectorError = io_err.into();
        assert!(matches!(err, ConnectorError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_clone_keeps_io_kind() {
        let err = ConnectorError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "nope",
        ));
        match err.clone() {
            ConnectorError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::PermissionDenied),
            other => panic!("unexpected clone: {other:?}"),
        }
    }

    #[test]
    fn test_response_plain_code() {
        let resp = ConnectorError::FileNotFound.to_response("open");
        assert_eq!(serde_json::to_value(&resp).unwrap(), json!({"error": "errFileNotFound"}));
        assert_eq!(resp.status_code(), 200);
    }

    #[test]
    fn test_response_exists_carries_name() {
        let resp = ConnectorError::Exists("docs".to_string()).to_response("mkdir");
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"error": ["errExists", "docs"]})
        );
    }

    #[test]
    fn test_response_decode_is_command_params() {
        let resp = ConnectorError::Decode("bad hash".to_string()).to_response("ls");
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"error": ["errCmdParams", "ls"]})
        );
    }

    #[test]
    fn test_response_io_mapping() {
        let not_found = ConnectorError::Io(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert_eq!(not_found.to_response("rm").code, ErrorCode::FileNotFound);

        let denied =
            ConnectorError::Io(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert_eq!(denied.to_response("rm").code, ErrorCode::AccessDenied);
    }

    #[test]
    fn test_response_unknown_is_server_error() {
        let resp = ConnectorError::Other("boom".to_string()).to_response("paste");
        assert_eq!(resp.code, ErrorCode::Unknown);
        assert_eq!(resp.status_code(), 500);
        assert_eq!(serde_json::to_value(&resp).unwrap(), json!({"error": "errUnknown"}));
    }

    #[test]
    fn test_result_alias() {
        fn sample_ok() -> Result<i32> {
            Ok(42)
        }

        fn sample_err() -> Result<i32> {
            Err(ConnectorError::NotFile)
        }

        assert_eq!(sample_ok().unwrap(), 42);
        assert!(sample_err().is_err());
    }
}
