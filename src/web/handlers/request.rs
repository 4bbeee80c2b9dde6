//! Query strings and request bodies into [`ConnectorCommand`].

use axum::extract::Multipart;
use url::form_urlencoded;

use crate::command::{ConnectorCommand, UploadedFile};
use crate::web::ApiError;

/// Multipart field carrying uploaded files.
const UPLOAD_FIELD: &str = "upload";

/// Add every `key=value` pair of an urlencoded string, keeping repeats.
pub fn parse_urlencoded(cmd: &mut ConnectorCommand, input: &[u8]) {
    for (key, value) in form_urlencoded::parse(input) {
        cmd.push(&key, value.into_owned());
    }
}

/// Add the text fields and uploaded files of a multipart body.
pub async fn parse_multipart(
    cmd: &mut ConnectorCommand,
    mut multipart: Multipart,
) -> Result<(), ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::warn!("Failed to read multipart field: {}", e);
        ApiError::bad_request("Invalid multipart data")
    })? {
        let name = field.name().unwrap_or("").to_string();

        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(|e| {
                    tracing::warn!("Failed to read uploaded file: {}", e);
                    ApiError::bad_request("Failed to read uploaded file")
                })?;

                if name.trim_end_matches("[]") != UPLOAD_FIELD {
                    tracing::debug!(field = %name, "Ignoring file outside of upload[]");
                    continue;
                }
                cmd.files.push(UploadedFile {
                    file_name,
                    content_type,
                    data: data.to_vec(),
                });
            }
            None => {
                let value = field.text().await.map_err(|e| {
                    tracing::warn!("Failed to read multipart text field: {}", e);
                    ApiError::bad_request("Invalid multipart data")
                })?;
                cmd.push(&name, value);
            }
        }
    }
    Ok(())
}
