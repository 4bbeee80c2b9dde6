//! Configuration module for the connector.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use crate::{ConnectorError, Result};

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origins.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Maximum request body size in megabytes (uploads included).
    #[serde(default = "default_max_body_mb")]
    pub max_body_mb: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_mb() -> usize {
    512
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
            max_body_mb: default_max_body_mb(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/elfinder-connector.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorConfig {
    /// Verbs accepted by the dispatcher. `None` enables every verb.
    #[serde(default)]
    pub enabled_commands: Option<Vec<String>>,
    /// Verbs the client UI should hide (echoed in `options.disabled`).
    #[serde(default)]
    pub disabled_ui_commands: Vec<String>,
    /// Minimum delay before an error response is returned.
    #[serde(default = "default_error_delay_ms")]
    pub error_delay_ms: u64,
    /// Key for chunk directory names.
    #[serde(default = "default_chunk_secret")]
    pub chunk_secret: String,
    /// Name of the liveness sentinel written into chunk directories.
    #[serde(default = "default_status_file")]
    pub status_file: String,
    /// URL prefix the thumbnail endpoint is mounted at.
    #[serde(default = "default_thumbnail_url")]
    pub thumbnail_url: String,
}

fn default_error_delay_ms() -> u64 {
    1000
}

fn default_chunk_secret() -> String {
    "elfinder-chunk".to_string()
}

fn default_status_file() -> String {
    ".status".to_string()
}

fn default_thumbnail_url() -> String {
    "/connector/thumb/".to_string()
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            enabled_commands: None,
            disabled_ui_commands: vec![],
            error_delay_ms: default_error_delay_ms(),
            chunk_secret: default_chunk_secret(),
            status_file: default_status_file(),
            thumbnail_url: default_thumbnail_url(),
        }
    }
}

/// Request lifecycle manager configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    /// Maximum entries in each registry.
    #[serde(default = "default_maximum_items")]
    pub maximum_items: usize,
    /// Age after which a registered request is force-cancelled.
    #[serde(default = "default_request_lifetime")]
    pub request_lifetime_secs: u64,
    /// Idle time after which a named lock is dropped.
    #[serde(default = "default_lock_lifetime")]
    pub lock_lifetime_secs: u64,
    /// Sweep interval for both registries.
    #[serde(default = "default_polling_interval")]
    pub polling_interval_secs: u64,
}

fn default_maximum_items() -> usize {
    10000
}

fn default_request_lifetime() -> u64 {
    1800 // 30 minutes
}

fn default_lock_lifetime() -> u64 {
    600 // 10 minutes
}

fn default_polling_interval() -> u64 {
    300 // 5 minutes
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            maximum_items: default_maximum_items(),
            request_lifetime_secs: default_request_lifetime(),
            lock_lifetime_secs: default_lock_lifetime(),
            polling_interval_secs: default_polling_interval(),
        }
    }
}

/// One mounted volume.
#[derive(Debug, Clone, Deserialize)]
pub struct VolumeConfig {
    /// Root directory of the volume.
    pub root: String,
    /// Display name; defaults to the root's last segment.
    #[serde(default)]
    pub name: Option<String>,
    /// Public URL of the root, if files are served directly.
    #[serde(default)]
    pub url: Option<String>,
    /// Directory opened on `init` when no target is given.
    #[serde(default)]
    pub start_directory: Option<String>,
    #[serde(default)]
    pub thumbnail_directory: Option<String>,
    #[serde(default)]
    pub temp_directory: Option<String>,
    #[serde(default)]
    pub chunk_directory: Option<String>,
    #[serde(default)]
    pub temp_archive_directory: Option<String>,
    /// Thumbnail edge length in pixels.
    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_size: u32,
    /// Maximum upload size in bytes.
    #[serde(default)]
    pub max_upload_size: Option<u64>,
    /// Maximum number of files per upload request.
    #[serde(default)]
    pub max_upload_files: Option<usize>,
    /// Evaluation order of the mime rules, e.g. `["deny", "allow"]`.
    #[serde(default = "default_upload_order")]
    pub upload_order: Vec<String>,
    #[serde(default = "default_upload_allow")]
    pub upload_allow: Vec<String>,
    #[serde(default)]
    pub upload_deny: Vec<String>,
    #[serde(default)]
    pub copy_overwrite: bool,
    #[serde(default = "default_upload_overwrite")]
    pub upload_overwrite: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub locked: bool,
}

fn default_thumbnail_size() -> u32 {
    48
}

fn default_upload_order() -> Vec<String> {
    vec!["deny".to_string(), "allow".to_string()]
}

fn default_upload_allow() -> Vec<String> {
    vec!["all".to_string()]
}

fn default_upload_overwrite() -> bool {
    true
}

impl VolumeConfig {
    /// Configuration for a volume rooted at `root` with every default.
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            name: None,
            url: None,
            start_directory: None,
            thumbnail_directory: None,
            temp_directory: None,
            chunk_directory: None,
            temp_archive_directory: None,
            thumbnail_size: default_thumbnail_size(),
            max_upload_size: None,
            max_upload_files: None,
            upload_order: default_upload_order(),
            upload_allow: default_upload_allow(),
            upload_deny: vec![],
            copy_overwrite: false,
            upload_overwrite: default_upload_overwrite(),
            read_only: false,
            locked: false,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Dispatcher configuration.
    #[serde(default)]
    pub connector: ConnectorConfig,
    /// Request lifecycle manager configuration.
    #[serde(default)]
    pub manager: ManagerConfig,
    /// Mounted volumes, in registration order.
    #[serde(default)]
    pub volumes: Vec<VolumeConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConnectorError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| ConnectorError::Validation(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `CONNECTOR_CHUNK_SECRET`: Override the chunk directory key
    /// - `CONNECTOR_ERROR_DELAY_MS`: Override the error response delay
    pub fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var("CONNECTOR_CHUNK_SECRET") {
            if !secret.is_empty() {
                self.connector.chunk_secret = secret;
            }
        }

        if let Ok(delay) = std::env::var("CONNECTOR_ERROR_DELAY_MS") {
            if let Ok(delay) = delay.parse() {
                self.connector.error_delay_ms = delay;
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Returns an error if:
    /// - no volume is configured
    /// - a volume root is empty or mounted twice
    /// - the manager sweep interval is zero
    pub fn validate(&self) -> Result<()> {
        if self.volumes.is_empty() {
            return Err(ConnectorError::Validation(
                "at least one [[volumes]] entry is required".to_string(),
            ));
        }

        let mut roots = HashSet::new();
        for volume in &self.volumes {
            if volume.root.trim().is_empty() {
                return Err(ConnectorError::Validation(
                    "volume root must not be empty".to_string(),
                ));
            }
            if !roots.insert(volume.root.as_str()) {
                return Err(ConnectorError::Validation(format!(
                    "volume root {} is mounted twice",
                    volume.root
                )));
            }
        }

        if self.manager.polling_interval_secs == 0 {
            return Err(ConnectorError::Validation(
                "manager.polling_interval_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert!(config.server.cors_origins.is_empty());
        assert_eq!(config.server.max_body_mb, 512);

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.file, "logs/elfinder-connector.log");

        assert!(config.connector.enabled_commands.is_none());
        assert_eq!(config.connector.error_delay_ms, 1000);
        assert_eq!(config.connector.status_file, ".status");
        assert_eq!(config.connector.thumbnail_url, "/connector/thumb/");

        assert_eq!(config.manager.maximum_items, 10000);
        assert_eq!(config.manager.request_lifetime_secs, 1800);
        assert_eq!(config.manager.lock_lifetime_secs, 600);
        assert_eq!(config.manager.polling_interval_secs, 300);

        assert!(config.volumes.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 3000
cors_origins = ["http://localhost:5173"]
max_body_mb = 64

[logging]
level = "debug"
file = "custom/logs/app.log"

[connector]
enabled_commands = ["open", "ls", "upload"]
disabled_ui_commands = ["resize"]
error_delay_ms = 0
chunk_secret = "s3cret"
status_file = ".alive"

[manager]
maximum_items = 100
request_lifetime_secs = 60
lock_lifetime_secs = 30
polling_interval_secs = 10

[[volumes]]
root = "/srv/files"
name = "Files"
url = "/files/"
thumbnail_directory = "/srv/.tmb"
chunk_directory = "/srv/.chunks"
max_upload_size = 1048576
upload_order = ["allow", "deny"]
upload_allow = ["image"]
upload_deny = ["all"]
copy_overwrite = true

[[volumes]]
root = "/srv/shared"
read_only = true
"#;

        let config = Config::parse(toml).unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.cors_origins, vec!["http://localhost:5173"]);
        assert_eq!(config.server.max_body_mb, 64);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.connector.enabled_commands,
            Some(vec!["open".to_string(), "ls".to_string(), "upload".to_string()])
        );
        assert_eq!(config.connector.disabled_ui_commands, vec!["resize"]);
        assert_eq!(config.connector.error_delay_ms, 0);
        assert_eq!(config.connector.chunk_secret, "s3cret");
        assert_eq!(config.connector.status_file, ".alive");
        assert_eq!(config.manager.maximum_items, 100);
        assert_eq!(config.manager.polling_interval_secs, 10);

        assert_eq!(config.volumes.len(), 2);
        let files = &config.volumes[0];
        assert_eq!(files.root, "/srv/files");
        assert_eq!(files.name.as_deref(), Some("Files"));
        assert_eq!(files.max_upload_size, Some(1048576));
        assert_eq!(files.upload_order, vec!["allow", "deny"]);
        assert_eq!(files.upload_allow, vec!["image"]);
        assert!(files.copy_overwrite);
        assert!(files.upload_overwrite);

        let shared = &config.volumes[1];
        assert!(shared.read_only);
        assert_eq!(shared.thumbnail_size, 48);
        assert_eq!(shared.upload_allow, vec!["all"]);
    }

    #[test]
    fn test_parse_empty_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(config.volumes.is_empty());
    }

    #[test]
    fn test_parse_invalid_config() {
        let toml = "this is not valid toml [[[";
        let result = Config::parse(toml);
        assert!(result.is_err());
        if let Err(ConnectorError::Validation(msg)) = result {
            assert!(msg.contains("config parse error"));
        } else {
            panic!("Expected Validation error");
        }
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load("nonexistent.toml");
        assert!(matches!(result, Err(ConnectorError::Io(_))));
    }

    #[test]
    fn test_apply_env_overrides() {
        let original_secret = std::env::var("CONNECTOR_CHUNK_SECRET").ok();
        let original_delay = std::env::var("CONNECTOR_ERROR_DELAY_MS").ok();

        std::env::set_var("CONNECTOR_CHUNK_SECRET", "env-secret");
        std::env::set_var("CONNECTOR_ERROR_DELAY_MS", "25");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.connector.chunk_secret, "env-secret");
        assert_eq!(config.connector.error_delay_ms, 25);

        // Empty or unparsable values leave the config alone
        std::env::set_var("CONNECTOR_CHUNK_SECRET", "");
        std::env::set_var("CONNECTOR_ERROR_DELAY_MS", "soon");
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.connector.chunk_secret, "elfinder-chunk");
        assert_eq!(config.connector.error_delay_ms, 1000);

        match original_secret {
            Some(val) => std::env::set_var("CONNECTOR_CHUNK_SECRET", val),
            None => std::env::remove_var("CONNECTOR_CHUNK_SECRET"),
        }
        match original_delay {
            Some(val) => std::env::set_var("CONNECTOR_ERROR_DELAY_MS", val),
            None => std::env::remove_var("CONNECTOR_ERROR_DELAY_MS"),
        }
    }

    #[test]
    fn test_validate_requires_volume() {
        let config = Config::default();
        let result = config.validate();
        assert!(matches!(result, Err(ConnectorError::Validation(msg)) if msg.contains("volumes")));
    }

    #[test]
    fn test_validate_duplicate_roots() {
        let mut config = Config::default();
        config.volumes.push(VolumeConfig::new("/srv/a"));
        config.volumes.push(VolumeConfig::new("/srv/a"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_ok() {
        let mut config = Config::default();
        config.volumes.push(VolumeConfig::new("/srv/a"));
        config.volumes.push(VolumeConfig::new("/srv/b"));
        assert!(config.validate().is_ok());
    }
}
