//! Reading and writing file content: get, put and image edits.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use encoding_rs::{Encoding, UTF_8};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::ops::require_file;
use super::{check_cancelled, FileSystemDriver};
use crate::command::{DimCommand, GetCommand, PutCommand, ResizeCommand, ResizeMode, CMD_PUT};
use crate::driver::hooks::HookPoint;
use crate::info::{mime_of, mime_top_level};
use crate::response::{ChangedResponse, DimResponse, GetResponse};
use crate::{ConnectorError, Result};

const DATA_SCHEME: &str = "data:";

/// `put` encodings that are not text encodings.
const ENCODING_SCHEME: &str = "scheme";
const ENCODING_HASH: &str = "hash";

fn permission_denied() -> ConnectorError {
    ConnectorError::PermissionDenied(String::new())
}

/// Encoding name as reported to the client; UTF-8 is implied.
fn reported_encoding(encoding: &'static Encoding) -> Option<String> {
    (encoding != UTF_8).then(|| encoding.name().to_uppercase())
}

/// Payload of a `data:<mime>;base64,<payload>` URI.
fn parse_data_uri(uri: &str) -> Result<Vec<u8>> {
    let parts: Vec<&str> = uri.split(',').collect();
    let [_, payload] = parts.as_slice() else {
        return Err(ConnectorError::CommandParams(CMD_PUT.to_string()));
    };
    STANDARD
        .decode(payload.trim())
        .map_err(|_| ConnectorError::CommandParams(CMD_PUT.to_string()))
}

pub(super) async fn dim(
    driver: &FileSystemDriver,
    cmd: &DimCommand,
    token: &CancellationToken,
) -> Result<DimResponse> {
    check_cancelled(token)?;
    let target = &cmd.target;
    let path = require_file(target)?;
    if !target.attribute().read {
        return Err(permission_denied());
    }

    let bytes = tokio::fs::read(path).await?;
    let editor = driver.picture_editor.clone();
    let (width, height) = tokio::task::spawn_blocking(move || editor.image_size(&bytes)).await??;

    Ok(DimResponse {
        dim: format!("{width}x{height}"),
    })
}

pub(super) async fn get(
    _driver: &FileSystemDriver,
    cmd: &GetCommand,
    token: &CancellationToken,
) -> Result<GetResponse> {
    check_cancelled(token)?;
    let target = &cmd.target;
    let path = require_file(target)?;
    if !target.attribute().read {
        return Err(permission_denied());
    }

    let conv = cmd.conv.as_deref().unwrap_or_default();
    let auto = matches!(conv, "" | "1" | "0");

    let explicit = if auto {
        None
    } else {
        match Encoding::for_label(conv.as_bytes()) {
            Some(encoding) => Some(encoding),
            None => {
                return Ok(GetResponse {
                    content: Value::Bool(false),
                    encoding: Some(conv.to_string()),
                    doconv: None,
                })
            }
        }
    };

    let bytes = tokio::fs::read(path).await?;
    let (encoding, body) = match explicit {
        Some(encoding) => (encoding, &bytes[..]),
        None => match Encoding::for_bom(&bytes) {
            Some((encoding, bom_len)) => (encoding, &bytes[bom_len..]),
            None => (UTF_8, &bytes[..]),
        },
    };

    let mime = mime_of(path);
    if mime_top_level(&mime) != "text" {
        let data = STANDARD.encode(body);
        return Ok(GetResponse {
            content: Value::String(format!(
                "data:{mime};charset={};base64,{data}",
                encoding.name().to_lowercase()
            )),
            encoding: reported_encoding(encoding),
            doconv: None,
        });
    }

    let (text, had_errors) = encoding.decode_without_bom_handling(body);
    if had_errors && auto {
        tracing::debug!(hash = %target.hash, "Content is not valid {}", encoding.name());
        return Ok(match conv {
            "0" => GetResponse {
                content: Value::Null,
                encoding: None,
                doconv: Some("unknown".to_string()),
            },
            _ => GetResponse {
                content: Value::Bool(false),
                encoding: None,
                doconv: None,
            },
        });
    }

    Ok(GetResponse {
        content: Value::String(text.into_owned()),
        encoding: if auto {
            reported_encoding(encoding)
        } else {
            Some(conv.to_string())
        },
        doconv: None,
    })
}

pub(super) async fn put(
    driver: &FileSystemDriver,
    cmd: &PutCommand,
    token: &CancellationToken,
) -> Result<ChangedResponse> {
    check_cancelled(token)?;
    let target = &cmd.target;
    let path = require_file(target)?;
    if !target.attribute().can_put() {
        return Err(permission_denied());
    }

    let data = match cmd.encoding.as_deref() {
        Some(ENCODING_SCHEME) if cmd.content.starts_with(DATA_SCHEME) => {
            parse_data_uri(&cmd.content)?
        }
        Some(ENCODING_SCHEME) => {
            tracing::debug!(url = %cmd.content, "Fetching remote content");
            let response = driver
                .http
                .get(&cmd.content)
                .send()
                .await?
                .error_for_status()?;
            response.bytes().await?.to_vec()
        }
        Some(ENCODING_HASH) => {
            let source = cmd
                .content_path
                .as_ref()
                .ok_or_else(|| ConnectorError::CommandParams(CMD_PUT.to_string()))?;
            let source_path = require_file(source)?;
            if !source.attribute().read {
                return Err(permission_denied());
            }
            tokio::fs::read(source_path).await?
        }
        label => {
            let label = label.filter(|l| !l.is_empty()).unwrap_or("utf-8");
            let encoding = Encoding::for_label(label.as_bytes())
                .ok_or_else(|| ConnectorError::CommandParams(CMD_PUT.to_string()))?;
            let (encoded, _, _) = encoding.encode(&cmd.content);
            encoded.into_owned()
        }
    };

    check_cancelled(token)?;
    driver.hooks.notify(HookPoint::BeforeWriteContent, path);
    tokio::fs::write(path, &data).await?;
    driver.hooks.notify(HookPoint::AfterWriteContent, path);

    Ok(ChangedResponse {
        changed: vec![driver.file_info(&target.volume, path).await?],
    })
}

pub(super) async fn resize(
    driver: &FileSystemDriver,
    cmd: &ResizeCommand,
    token: &CancellationToken,
) -> Result<ChangedResponse> {
    check_cancelled(token)?;
    let target = &cmd.target;
    let path = require_file(target)?;
    if !target.attribute().can_edit_image() {
        return Err(permission_denied());
    }

    driver.remove_thumbs(target).await;

    let bytes = tokio::fs::read(path).await?;
    let editor = driver.picture_editor.clone();
    let mode = cmd.mode.clone();
    let quality = cmd.quality;
    let image = tokio::task::spawn_blocking(move || match mode {
        ResizeMode::Resize { width, height } => editor.scale(&bytes, width, height, quality),
        ResizeMode::Crop {
            x,
            y,
            width,
            height,
        } => editor.crop(&bytes, x, y, width, height, quality),
        ResizeMode::Rotate { degree, background } => {
            editor.rotate(&bytes, degree, background.as_deref(), quality)
        }
    })
    .await??;

    check_cancelled(token)?;
    driver.hooks.notify(HookPoint::BeforeWriteContent, path);
    tokio::fs::write(path, &image.data).await?;
    driver.hooks.notify(HookPoint::AfterWriteContent, path);

    Ok(ChangedResponse {
        changed: vec![driver.file_info(&target.volume, path).await?],
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Fixture;
    use super::*;
    use crate::volume::ObjectAttribute;
    use std::sync::Arc;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    async fn get_with(fx: &Fixture, relative: &str, conv: Option<&str>) -> GetResponse {
        let cmd = GetCommand {
            target: fx.path(relative).await,
            current: None,
            conv: conv.map(str::to_string),
        };
        get(&fx.driver, &cmd, &token()).await.unwrap()
    }

    #[tokio::test]
    async fn test_get_utf8_text() {
        let fx = Fixture::new();
        fx.write("a.txt", "héllo".as_bytes());

        let resp = get_with(&fx, "/a.txt", Some("1")).await;
        assert_eq!(resp.content, Value::String("héllo".to_string()));
        assert!(resp.encoding.is_none());
    }

    #[tokio::test]
    async fn test_get_detects_bom() {
        let fx = Fixture::new();
        fx.write("a.txt", &[0xFF, 0xFE, b'h', 0, b'i', 0]);

        let resp = get_with(&fx, "/a.txt", None).await;
        assert_eq!(resp.content, Value::String("hi".to_string()));
        assert_eq!(resp.encoding.as_deref(), Some("UTF-16LE"));
    }

    #[tokio::test]
    async fn test_get_explicit_encoding() {
        let fx = Fixture::new();
        fx.write("a.txt", &[b'c', b'a', b'f', 0xE9]);

        let resp = get_with(&fx, "/a.txt", Some("windows-1252")).await;
        assert_eq!(resp.content, Value::String("café".to_string()));
        assert_eq!(resp.encoding.as_deref(), Some("windows-1252"));
    }

    #[tokio::test]
    async fn test_get_undecodable_text() {
        let fx = Fixture::new();
        fx.write("a.txt", &[b'c', 0xE9, 0xFF]);

        let resp = get_with(&fx, "/a.txt", Some("1")).await;
        assert_eq!(resp.content, Value::Bool(false));

        let resp = get_with(&fx, "/a.txt", Some("0")).await;
        assert_eq!(resp.doconv.as_deref(), Some("unknown"));
    }

    #[tokio::test]
    async fn test_get_unknown_label() {
        let fx = Fixture::new();
        fx.write("a.txt", b"x");

        let resp = get_with(&fx, "/a.txt", Some("no-such-charset")).await;
        assert_eq!(resp.content, Value::Bool(false));
        assert_eq!(resp.encoding.as_deref(), Some("no-such-charset"));
    }

    #[tokio::test]
    async fn test_get_binary_as_data_uri() {
        let fx = Fixture::new();
        fx.write("a.png", &[1, 2, 3]);

        let resp = get_with(&fx, "/a.png", None).await;
        assert_eq!(
            resp.content,
            Value::String("data:image/png;charset=utf-8;base64,AQID".to_string())
        );
    }

    fn put_cmd(target: crate::path::PathInfo, content: &str, encoding: Option<&str>) -> PutCommand {
        PutCommand {
            target,
            content: content.to_string(),
            encoding: encoding.map(str::to_string),
            content_path: None,
        }
    }

    #[tokio::test]
    async fn test_put_text_in_encoding() {
        let fx = Fixture::new();
        fx.write("a.txt", b"");

        let cmd = put_cmd(fx.path("/a.txt").await, "café", Some("windows-1252"));
        let resp = put(&fx.driver, &cmd, &token()).await.unwrap();

        assert_eq!(resp.changed[0].size, 4);
        assert_eq!(std::fs::read(fx.root().join("a.txt")).unwrap(), [b'c', b'a', b'f', 0xE9]);
    }

    #[tokio::test]
    async fn test_put_data_uri() {
        let fx = Fixture::new();
        fx.write("a.png", b"");

        let cmd = put_cmd(fx.path("/a.png").await, "data:image/png;base64,AQID", Some("scheme"));
        put(&fx.driver, &cmd, &token()).await.unwrap();
        assert_eq!(std::fs::read(fx.root().join("a.png")).unwrap(), [1, 2, 3]);

        let bad = put_cmd(fx.path("/a.png").await, "data:image/png;base64", Some("scheme"));
        let err = put(&fx.driver, &bad, &token()).await.unwrap_err();
        assert!(matches!(err, ConnectorError::CommandParams(_)));
    }

    #[tokio::test]
    async fn test_put_from_hash() {
        let fx = Fixture::new();
        fx.write("src.txt", b"source");
        fx.write("a.txt", b"");

        let mut cmd = put_cmd(fx.path("/a.txt").await, "", Some("hash"));
        cmd.content_path = Some(fx.path("/src.txt").await);
        put(&fx.driver, &cmd, &token()).await.unwrap();
        assert_eq!(std::fs::read(fx.root().join("a.txt")).unwrap(), b"source");
    }

    #[tokio::test]
    async fn test_put_unknown_encoding() {
        let fx = Fixture::new();
        fx.write("a.txt", b"");

        let cmd = put_cmd(fx.path("/a.txt").await, "x", Some("klingon"));
        let err = put(&fx.driver, &cmd, &token()).await.unwrap_err();
        assert!(matches!(err, ConnectorError::CommandParams(_)));
    }

    #[tokio::test]
    async fn test_put_requires_write() {
        let fx = Fixture::with(|vol| {
            vol.attribute_rules.push(Arc::new(|_, _| {
                Some(ObjectAttribute {
                    write: false,
                    ..ObjectAttribute::default()
                })
            }));
        });
        fx.write("a.txt", b"old");

        let cmd = put_cmd(fx.path("/a.txt").await, "new", None);
        assert!(put(&fx.driver, &cmd, &token()).await.is_err());
        assert_eq!(std::fs::read(fx.root().join("a.txt")).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_resize_modes() {
        let fx = Fixture::new().with_editor();
        fx.write("a.png", b"img");

        for (mode, expected) in [
            (
                ResizeMode::Resize {
                    width: 10,
                    height: 20,
                },
                "scale10x20:img",
            ),
            (
                ResizeMode::Crop {
                    x: 1,
                    y: 2,
                    width: 3,
                    height: 4,
                },
                "crop1,2,3x4:img",
            ),
            (
                ResizeMode::Rotate {
                    degree: 90,
                    background: None,
                },
                "rotate90:img",
            ),
        ] {
            fx.write("a.png", b"img");
            let cmd = ResizeCommand {
                target: fx.path("/a.png").await,
                mode,
                quality: None,
            };
            let resp = resize(&fx.driver, &cmd, &token()).await.unwrap();
            assert_eq!(resp.changed[0].name, "a.png");
            assert_eq!(std::fs::read(fx.root().join("a.png")).unwrap(), expected.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_dim() {
        let fx = Fixture::new().with_editor();
        fx.write("a.png", b"img");

        let cmd = DimCommand {
            target: fx.path("/a.png").await,
        };
        assert_eq!(dim(&fx.driver, &cmd, &token()).await.unwrap().dim, "640x480");
    }

    #[tokio::test]
    async fn test_dim_without_editor_is_unsupported() {
        let fx = Fixture::new();
        fx.write("a.png", b"img");

        let cmd = DimCommand {
            target: fx.path("/a.png").await,
        };
        let err = dim(&fx.driver, &cmd, &token()).await.unwrap_err();
        assert!(matches!(err, ConnectorError::CommandNoSupport));
    }
}
