//! Connector endpoints: the command entry point and thumbnails.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{FromRequest, Multipart, Path, RawQuery, Request, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
        StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use futures::StreamExt;
use tokio_util::io::ReaderStream;

use super::request::{parse_multipart, parse_urlencoded};
use super::AppState;
use crate::command::ConnectorCommand;
use crate::response::{ConnectorResult, Disposition, FileBody, FileResponse, ResultBody};
use crate::web::ApiError;
use crate::ConnectorError;

/// Build a Content-Disposition header value with proper encoding.
///
/// Uses RFC 5987 encoding for non-ASCII filenames.
fn content_disposition_header(filename: &str, disposition: Disposition) -> String {
    let kind = match disposition {
        Disposition::Attachment => "attachment",
        Disposition::Inline => "inline",
    };

    if filename.is_ascii() && !filename.chars().any(|c| c.is_control() || c == '"' || c == '\\') {
        return format!("{}; filename=\"{}\"", kind, filename);
    }

    // ASCII-safe fallback for clients without filename* support
    let sanitized: String = filename
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '"' | '\\' => '_',
            c if !c.is_ascii() => '_',
            _ => c,
        })
        .collect();
    let encoded = urlencoding::encode(filename);

    format!(
        "{}; filename=\"{}\"; filename*=UTF-8''{}",
        kind, sanitized, encoded
    )
}

/// Deletes a spent temp file when the body streaming it is dropped.
struct RemoveOnDrop(PathBuf);

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            tracing::warn!(path = %self.0.display(), "Failed to remove temp download: {}", e);
        }
    }
}

async fn open_download(path: &std::path::Path) -> Result<(tokio::fs::File, Option<u64>), ApiError> {
    let handle = tokio::fs::File::open(path).await.map_err(|e| {
        tracing::warn!(path = %path.display(), "Failed to open file for download: {}", e);
        ApiError::from(ConnectorError::from(e))
    })?;
    let len = handle.metadata().await.ok().map(|meta| meta.len());
    Ok((handle, len))
}

async fn file_response(file: FileResponse) -> Result<Response, ApiError> {
    let builder = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, file.content_type.as_str())
        .header(
            CONTENT_DISPOSITION,
            content_disposition_header(&file.file_name, file.disposition),
        );

    let response = match file.body {
        FileBody::Path(path) => {
            let (handle, len) = open_download(&path).await?;
            let builder = match len {
                Some(len) => builder.header(CONTENT_LENGTH, len),
                None => builder,
            };
            builder.body(Body::from_stream(ReaderStream::new(handle)))
        }
        FileBody::Temp(path) => {
            let guard = RemoveOnDrop(path);
            let (handle, len) = open_download(&guard.0).await?;
            let builder = match len {
                Some(len) => builder.header(CONTENT_LENGTH, len),
                None => builder,
            };
            let stream = ReaderStream::new(handle).map(move |chunk| {
                let _guard = &guard;
                chunk
            });
            builder.body(Body::from_stream(stream))
        }
        FileBody::Bytes(data) => builder
            .header(CONTENT_LENGTH, data.len())
            .body(Body::from(data)),
    };

    response.map_err(|e| {
        tracing::error!("Failed to build response: {}", e);
        ApiError::internal("Failed to build response")
    })
}

/// Render a connector result, attaching its cookies.
async fn respond(result: ConnectorResult) -> Result<Response, ApiError> {
    let jar = result
        .cookies
        .iter()
        .fold(CookieJar::new(), |jar, (name, value)| {
            jar.add(Cookie::build((name.clone(), value.clone())).path("/"))
        });

    let response = match result.body {
        ResultBody::Json(value) => {
            let status =
                StatusCode::from_u16(result.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(value)).into_response()
        }
        ResultBody::File(file) => file_response(file).await?,
    };

    Ok((jar, response).into_response())
}

/// GET /connector - Run a command given in the query string.
pub async fn connector_get(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError> {
    let mut cmd = ConnectorCommand::new();
    if let Some(query) = query {
        parse_urlencoded(&mut cmd, query.as_bytes());
    }

    respond(state.connector.process(cmd).await).await
}

/// POST /connector - Run a command from an urlencoded or multipart body.
///
/// Query string parameters are merged in as well.
pub async fn connector_post(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
    request: Request,
) -> Result<Response, ApiError> {
    let mut cmd = ConnectorCommand::new();
    if let Some(query) = query {
        parse_urlencoded(&mut cmd, query.as_bytes());
    }

    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        parse_multipart(&mut cmd, multipart).await?;
    } else {
        let body = Bytes::from_request(request, &state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        parse_urlencoded(&mut cmd, &body);
    }

    respond(state.connector.process(cmd).await).await
}

/// GET /connector/thumb/:target - Thumbnail of a file, generated on demand.
pub async fn thumbnail(
    State(state): State<Arc<AppState>>,
    Path(target): Path<String>,
) -> Result<Response, ApiError> {
    match state.connector.thumb(&target).await? {
        Some(image) => Ok(([(CONTENT_TYPE, image.mime)], image.data).into_response()),
        None => Err(ApiError::not_found("Thumbnail not available")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition_ascii() {
        assert_eq!(
            content_disposition_header("report.pdf", Disposition::Attachment),
            "attachment; filename=\"report.pdf\""
        );
        assert_eq!(
            content_disposition_header("a.png", Disposition::Inline),
            "inline; filename=\"a.png\""
        );
    }

    #[test]
    fn test_content_disposition_non_ascii() {
        let header = content_disposition_header("資料 1.txt", Disposition::Attachment);
        assert_eq!(
            header,
            "attachment; filename=\"__ 1.txt\"; filename*=UTF-8''%E8%B3%87%E6%96%99%201.txt"
        );
    }

    #[tokio::test]
    async fn test_temp_body_is_removed_after_streaming() {
        use http_body_util::BodyExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.zip.sending");
        std::fs::write(&path, b"PK-data").unwrap();
        let file = FileResponse {
            content_type: "application/zip".to_string(),
            file_name: "x.zip".to_string(),
            body: FileBody::Temp(path.clone()),
            disposition: Disposition::Attachment,
        };

        let response = file_response(file).await.unwrap();
        assert_eq!(response.headers()[CONTENT_LENGTH], "7");
        let body = response.into_body().collect().await.unwrap().to_bytes();

        assert_eq!(&body[..], b"PK-data");
        assert!(!path.exists());
    }

    #[test]
    fn test_content_disposition_strips_control_characters() {
        let header = content_disposition_header("a\"b\r\n.txt", Disposition::Attachment);
        assert!(header.starts_with("attachment; filename=\"a_b.txt\"; filename*=UTF-8''"));
        assert!(!header.contains('\r'));
    }

    #[tokio::test]
    async fn test_respond_sets_cookies_and_status() {
        let result = ConnectorResult::success(&serde_json::json!({ "ok": true }))
            .with_cookies(vec![("elfdl7".to_string(), "1".to_string())]);
        let response = respond(result).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response.headers().get("set-cookie").unwrap().to_str().unwrap();
        assert!(cookie.starts_with("elfdl7=1"));
        assert!(cookie.contains("Path=/"));
    }
}
