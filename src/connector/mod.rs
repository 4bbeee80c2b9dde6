//! Command dispatch.
//!
//! [`Connector`] owns the registered volumes, turns a raw
//! [`ConnectorCommand`] into a resolved [`Command`](crate::command::Command)
//! and runs it against the owning volume's driver. Every fault ends in one
//! place, [`Connector::fail`], which logs it, waits out the configured error
//! delay and renders the wire error.

mod dispatch;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::command::{ConnectorCommand, ALL_COMMANDS, CMD_ABORT, CMD_FILE};
use crate::config::{Config, ConnectorConfig};
use crate::driver::FileSystemDriver;
use crate::manager::{ConnectorManager, ManagerOptions};
use crate::path::{PathCodec, PathInfo};
use crate::response::{ConnectorResult, ImageWithMime};
use crate::response::COOKIE_ELFDL;
use crate::volume::Volume;
use crate::{ConnectorError, Result};

/// Separator closing a volume id inside a target hash.
pub const VOLUME_SEPARATOR: char = '_';

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct ConnectorOptions {
    /// Verbs accepted by [`Connector::process`]. `None` accepts all of them.
    pub enabled_commands: Option<Vec<String>>,
    /// Minimum delay before an error response goes out.
    pub error_delay: Duration,
}

impl Default for ConnectorOptions {
    fn default() -> Self {
        Self::from(&ConnectorConfig::default())
    }
}

impl From<&ConnectorConfig> for ConnectorOptions {
    fn from(config: &ConnectorConfig) -> Self {
        Self {
            enabled_commands: config.enabled_commands.clone(),
            error_delay: Duration::from_millis(config.error_delay_ms),
        }
    }
}

/// Entry point of the protocol: volumes plus the dispatch engine.
pub struct Connector {
    volumes: Vec<Arc<Volume>>,
    codec: PathCodec,
    manager: Arc<ConnectorManager>,
    options: ConnectorOptions,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("volumes", &self.volumes)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Connector {
    /// Empty connector. Drivers of the volumes added later must share `codec`
    /// and `manager` with it.
    pub fn new(options: ConnectorOptions, codec: PathCodec, manager: Arc<ConnectorManager>) -> Self {
        Self {
            volumes: Vec::new(),
            codec,
            manager,
            options,
        }
    }

    /// Connector serving every configured volume through one
    /// [`FileSystemDriver`].
    pub fn from_config(config: &Config) -> Self {
        let codec = PathCodec::default();
        let manager = Arc::new(ConnectorManager::new(ManagerOptions::from(&config.manager)));
        let driver = Arc::new(FileSystemDriver::new(
            codec.clone(),
            manager.clone(),
            &config.connector,
        ));

        let mut connector = Self::new(ConnectorOptions::from(&config.connector), codec, manager);
        for volume in &config.volumes {
            connector.add_volume(Volume::from_config(volume, driver.clone()));
        }
        connector
    }

    /// Register a volume, assigning `v<N>_` when it carries no id.
    pub fn add_volume(&mut self, mut volume: Volume) -> Arc<Volume> {
        if volume.volume_id.is_empty() {
            volume.volume_id = format!("v{}{}", self.volumes.len() + 1, VOLUME_SEPARATOR);
        }
        let volume = Arc::new(volume);
        self.volumes.push(volume.clone());
        volume
    }

    pub fn volumes(&self) -> &[Arc<Volume>] {
        &self.volumes
    }

    pub fn manager(&self) -> &Arc<ConnectorManager> {
        &self.manager
    }

    pub fn codec(&self) -> &PathCodec {
        &self.codec
    }

    /// Create every volume's root and working directories.
    pub async fn setup(&self) -> Result<()> {
        for volume in &self.volumes {
            volume.driver.setup_volume(volume).await?;
            tracing::info!(
                volume = %volume.volume_id,
                root = %volume.root.display(),
                "Volume ready"
            );
        }
        Ok(())
    }

    pub fn volume(&self, volume_id: &str) -> Option<&Arc<Volume>> {
        self.volumes.iter().find(|v| v.volume_id == volume_id)
    }

    /// Resolve `<volumeId><hash>` into a path on its volume.
    pub async fn resolve(
        &self,
        target: &str,
        create_if_not_exists: bool,
        file_by_default: bool,
    ) -> Result<PathInfo> {
        let (volume_id, hash) = match target.find(VOLUME_SEPARATOR) {
            Some(idx) => target.split_at(idx + 1),
            None => return Err(ConnectorError::FileNotFound),
        };
        let volume = self.volume(volume_id).ok_or(ConnectorError::FileNotFound)?;
        let path = self.codec.decode(hash)?;

        volume
            .driver
            .parse_path(&path, volume, target, create_if_not_exists, file_by_default)
            .await
    }

    /// Resolve every target, failing on the first one that does not.
    pub async fn resolve_all(
        &self,
        targets: &[String],
        create_if_not_exists: bool,
        file_by_default: bool,
    ) -> Result<Vec<PathInfo>> {
        let mut resolved = Vec::with_capacity(targets.len());
        for target in targets {
            resolved.push(
                self.resolve(target, create_if_not_exists, file_by_default)
                    .await?,
            );
        }
        Ok(resolved)
    }

    /// Run one request to completion.
    ///
    /// A request carrying `reqid` is registered with the manager while it runs
    /// so a later `abort` can cancel it.
    pub async fn process(&self, args: ConnectorCommand) -> ConnectorResult {
        let verb = args.cmd().unwrap_or_default().to_string();
        let reqid = args
            .get("reqid")
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let token = CancellationToken::new();

        let registered = match &reqid {
            Some(id) if verb != CMD_ABORT => {
                match self.manager.register(id, args.without_files(), token.clone()) {
                    Ok(registered) => registered,
                    Err(e) => {
                        tracing::debug!(reqid = %id, error = %e, "Request not registered");
                        false
                    }
                }
            }
            _ => false,
        };

        tracing::debug!(cmd = %verb, reqid = reqid.as_deref().unwrap_or_default(), "Processing command");
        let result = match self.execute(&verb, &args, &token).await {
            Ok(result) => result,
            Err(err) => self.fail(&verb, err).await,
        };

        if let (true, Some(id)) = (registered, &reqid) {
            self.manager.release(id);
        }

        match (verb.as_str(), &reqid, args.get("cpath")) {
            (CMD_FILE, Some(id), Some(cpath)) if !cpath.is_empty() => {
                result.with_cookies(vec![(format!("{COOKIE_ELFDL}{id}"), "1".to_string())])
            }
            _ => result,
        }
    }

    async fn execute(
        &self,
        verb: &str,
        args: &ConnectorCommand,
        token: &CancellationToken,
    ) -> Result<ConnectorResult> {
        if let Some(enabled) = &self.options.enabled_commands {
            if !enabled.iter().any(|c| c == verb) {
                return Err(ConnectorError::CommandNoSupport);
            }
        }
        if verb.is_empty() {
            return Err(ConnectorError::CommandRequired);
        }
        if !ALL_COMMANDS.contains(&verb) {
            return Err(ConnectorError::UnknownCommand);
        }

        let command = self.parse(verb, args).await?;
        self.run(command, token).await
    }

    /// Log a fault, wait out the error delay and render it for the client.
    async fn fail(&self, verb: &str, err: ConnectorError) -> ConnectorResult {
        let response = err.to_response(verb);
        if response.status_code() >= 500 {
            tracing::error!(cmd = %verb, error = %err, "Command failed");
        } else {
            tracing::warn!(cmd = %verb, code = ?response.code, error = %err, "Command rejected");
        }

        if !self.options.error_delay.is_zero() {
            tokio::time::sleep(self.options.error_delay).await;
        }
        ConnectorResult::error(&response)
    }

    /// Thumbnail bytes for a target hash, generating the thumbnail if needed.
    pub async fn thumb(&self, target: &str) -> Result<Option<ImageWithMime>> {
        let path = self.resolve(target, false, true).await?;
        path.volume
            .driver
            .thumb(&path, &CancellationToken::new())
            .await
    }
}


#[cfg(test)]
mod tests {
    use std::time::Instant;

    use serde_json::Value;

    use super::test_support::TestConnector;
    use super::*;

    fn error_of(result: &ConnectorResult) -> Value {
        result.json().unwrap()["error"].clone()
    }

    #[test]
    fn test_volume_ids_are_assigned_in_order() {
        let tc = TestConnector::new(2);
        let ids: Vec<_> = tc.connector.volumes().iter().map(|v| v.volume_id.as_str()).collect();
        assert_eq!(ids, vec!["v1_", "v2_"]);
    }

    #[tokio::test]
    async fn test_resolve() {
        let tc = TestConnector::new(1);
        tc.write(0, "docs/a.txt", b"x");

        let file = tc.connector.resolve(&tc.hash(0, "/docs/a.txt"), false, true).await.unwrap();
        assert!(!file.is_directory());
        assert_eq!(file.path, "/docs/a.txt");

        let root = tc.connector.resolve("v1_", false, false).await.unwrap();
        assert!(root.is_root());

        let err = tc.connector.resolve("v9_", false, false).await.unwrap_err();
        assert!(matches!(err, ConnectorError::FileNotFound));

        let err = tc.connector.resolve(&tc.hash(0, "/missing"), false, false).await.unwrap_err();
        assert!(matches!(err, ConnectorError::DirectoryNotFound));

        let err = tc.connector.resolve("v1_Y", false, true).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Decode(_)));

        let escape = tc.hash(0, "/../../etc/passwd");
        let err = tc.connector.resolve(&escape, true, true).await.unwrap_err();
        assert!(matches!(err, ConnectorError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_missing_and_unknown_verbs() {
        let tc = TestConnector::new(1);

        let result = tc.run(&[("target", "v1_")]).await;
        assert_eq!(error_of(&result), "errCmdReq");

        let result = tc.run(&[("cmd", "format")]).await;
        assert_eq!(error_of(&result), "errUnknownCmd");
    }

    #[tokio::test]
    async fn test_disabled_verb() {
        let mut tc = TestConnector::new(1);
        tc.connector.options.enabled_commands = Some(vec!["open".to_string()]);

        let result = tc.run(&[("cmd", "mkdir"), ("target", "v1_"), ("name", "a")]).await;
        assert_eq!(error_of(&result), "errCmdNoSupport");
        assert!(!tc.root(0).join("a").exists());

        // The whitelist is checked before the verb is validated
        let result = tc.run(&[("cmd", "format"), ("target", "v1_")]).await;
        assert_eq!(error_of(&result), "errCmdNoSupport");
        let result = tc.run(&[("target", "v1_")]).await;
        assert_eq!(error_of(&result), "errCmdNoSupport");

        let result = tc.run(&[("cmd", "open"), ("init", "1")]).await;
        assert!(!result.is_error());
    }

    #[tokio::test]
    async fn test_error_delay_applies_to_errors_only() {
        let mut tc = TestConnector::new(1);
        tc.connector.options.error_delay = Duration::from_millis(150);

        let start = Instant::now();
        let result = tc.run(&[("cmd", "ls"), ("target", "v1_")]).await;
        assert!(!result.is_error());
        assert!(start.elapsed() < Duration::from_millis(150));

        let start = Instant::now();
        let result = tc.run(&[("cmd", "ls"), ("target", "v7_")]).await;
        assert!(result.is_error());
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_request_is_released_after_completion() {
        let tc = TestConnector::new(1);
        let result = tc.run(&[("cmd", "ls"), ("target", "v1_"), ("reqid", "r1")]).await;
        assert!(!result.is_error());
        assert_eq!(tc.connector.manager().request_count(), 0);
    }

    #[tokio::test]
    async fn test_file_cookie() {
        let tc = TestConnector::new(1);
        tc.write(0, "a.txt", b"hello");
        let target = tc.hash(0, "/a.txt");

        let result = tc
            .run(&[
                ("cmd", "file"),
                ("target", &target),
                ("download", "1"),
                ("reqid", "42"),
                ("cpath", "/"),
            ])
            .await;
        assert_eq!(result.cookies, vec![("elfdl42".to_string(), "1".to_string())]);

        let result = tc.run(&[("cmd", "file"), ("target", &target)]).await;
        assert!(result.cookies.is_empty());
    }

    #[tokio::test]
    async fn test_thumb_of_unsupported_file() {
        let tc = TestConnector::with(1, |v| v.thumbnail_directory = Some(v.root.join(".tmb")));
        tc.write(0, "a.txt", b"hello");
        let thumb = tc.connector.thumb(&tc.hash(0, "/a.txt")).await.unwrap();
        assert!(thumb.is_none());
    }
}
