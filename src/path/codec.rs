//! Reversible, URL-safe encoding of relative paths into opaque hashes.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::{ConnectorError, Result};

/// Symmetric transform applied to a path before encoding and after decoding.
///
/// Deployments plug one in to keep raw paths out of client-visible hashes.
pub trait PathCipher: Send + Sync {
    fn encrypt(&self, path: &str) -> String;
    fn decrypt(&self, path: &str) -> Result<String>;
}

/// Cipher that leaves paths untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityCipher;

impl PathCipher for IdentityCipher {
    fn encrypt(&self, path: &str) -> String {
        path.to_string()
    }

    fn decrypt(&self, path: &str) -> Result<String> {
        Ok(path.to_string())
    }
}

/// Encoder between relative paths (`""`, `/a/b`) and hashes.
#[derive(Clone)]
pub struct PathCodec {
    cipher: Arc<dyn PathCipher>,
}

impl Default for PathCodec {
    fn default() -> Self {
        Self::new(Arc::new(IdentityCipher))
    }
}

impl std::fmt::Debug for PathCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathCodec").finish_non_exhaustive()
    }
}

impl PathCodec {
    pub fn new(cipher: Arc<dyn PathCipher>) -> Self {
        Self { cipher }
    }

    /// Encode a relative path. The empty path encodes to the empty hash.
    pub fn encode(&self, path: &str) -> String {
        if path.is_empty() {
            return String::new();
        }

        let encrypted = self.cipher.encrypt(path);
        STANDARD
            .encode(encrypted.as_bytes())
            .trim_end_matches('=')
            .chars()
            .map(|c| match c {
                '+' => '-',
                '/' => '_',
                other => other,
            })
            .collect()
    }

    /// Decode a hash back into its relative path.
    ///
    /// Malformed input is a protocol error, never "not found".
    pub fn decode(&self, hash: &str) -> Result<String> {
        if hash.is_empty() {
            return Ok(String::new());
        }

        let mut base64: String = hash
            .chars()
            .map(|c| match c {
                '-' => '+',
                '_' => '/',
                '.' => '=',
                other => other,
            })
            .collect();

        let unpadded = base64.trim_end_matches('=').len();
        base64.truncate(unpadded);
        match unpadded % 4 {
            0 => {}
            2 => base64.push_str("=="),
            3 => base64.push('='),
            _ => return Err(ConnectorError::Decode(format!("invalid hash length: {hash}"))),
        }

        let bytes = STANDARD
            .decode(base64.as_bytes())
            .map_err(|e| ConnectorError::Decode(format!("invalid hash {hash}: {e}")))?;
        let encrypted = String::from_utf8(bytes)
            .map_err(|_| ConnectorError::Decode(format!("hash is not UTF-8: {hash}")))?;

        self.cipher.decrypt(&encrypted)
    }
}
