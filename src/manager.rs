//! Request lifecycle manager.
//!
//! Holds the two pieces of cross-request state the connector needs:
//!
//! - a cancellation registry mapping client request ids to a
//!   [`CancellationToken`], so `abort` can stop a running command;
//! - a named-lock registry of `tokio::sync::Mutex` payloads keyed by chunk
//!   directory, so chunk receipt, merge and rollback of one upload are
//!   serialized.
//!
//! Both are swept on an interval by background tasks started with
//! [`ConnectorManager::start_sweepers`]. Once a registry is full, new entries
//! are silently dropped and callers proceed without the guarantee.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::command::ConnectorCommand;
use crate::config::ManagerConfig;
use crate::{ConnectorError, Result};

/// A named lock: one async mutex per key.
pub type NamedLock<T> = Arc<tokio::sync::Mutex<T>>;

/// Manager limits and timings.
#[derive(Debug, Clone, Copy)]
pub struct ManagerOptions {
    pub maximum_items: usize,
    pub request_lifetime: Duration,
    pub lock_lifetime: Duration,
    pub polling_interval: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self::from(&ManagerConfig::default())
    }
}

impl From<&ManagerConfig> for ManagerOptions {
    fn from(config: &ManagerConfig) -> Self {
        Self {
            maximum_items: config.maximum_items,
            request_lifetime: Duration::from_secs(config.request_lifetime_secs),
            lock_lifetime: Duration::from_secs(config.lock_lifetime_secs),
            polling_interval: Duration::from_secs(config.polling_interval_secs),
        }
    }
}

/// Payload of a chunk directory lock.
#[derive(Debug, Default)]
pub struct ChunkedUploadInfo {
    /// First fault recorded for this upload; later writers re-raise it.
    pub exception: Option<ConnectorError>,
    pub total_uploaded: u32,
    /// Whether the merge destination has been written to.
    pub is_file_touched: bool,
}

struct RequestEntry {
    command: ConnectorCommand,
    token: CancellationToken,
    created_at: Instant,
}

struct LockEntry {
    payload: Arc<dyn Any + Send + Sync>,
    last_access: Instant,
}

/// Cancellation and named-lock registries.
pub struct ConnectorManager {
    options: ManagerOptions,
    requests: Mutex<HashMap<String, RequestEntry>>,
    locks: Mutex<HashMap<String, LockEntry>>,
    shutdown: CancellationToken,
}

impl Default for ConnectorManager {
    fn default() -> Self {
        Self::new(ManagerOptions::default())
    }
}

impl ConnectorManager {
    pub fn new(options: ManagerOptions) -> Self {
        Self {
            options,
            requests: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    /// Register a running request under `id`.
    ///
    /// Returns `Ok(false)` when the registry is full and the request was not
    /// registered. A duplicate id is a caller bug and fails without touching
    /// the existing registration.
    pub fn register(
        &self,
        id: &str,
        command: ConnectorCommand,
        token: CancellationToken,
    ) -> Result<bool> {
        let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);

        if requests.contains_key(id) {
            return Err(ConnectorError::Validation(format!(
                "request id {id} is already registered"
            )));
        }

        if requests.len() >= self.options.maximum_items {
            tracing::debug!(reqid = id, "Request registry full; not registering");
            return Ok(false);
        }

        requests.insert(
            id.to_string(),
            RequestEntry {
                command,
                token,
                created_at: Instant::now(),
            },
        );
        Ok(true)
    }

    /// Cancel and remove the request registered under `id`.
    ///
    /// Returns whether it was found, along with the command it was running.
    pub fn abort(&self, id: &str) -> (bool, Option<ConnectorCommand>) {
        let entry = self
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);

        match entry {
            Some(entry) => {
                entry.token.cancel();
                (true, Some(entry.command))
            }
            None => (false, None),
        }
    }

    /// Remove the request registered under `id` without cancelling it.
    pub fn release(&self, id: &str) -> bool {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Fetch the lock under `key`, creating it with `factory` if absent.
    ///
    /// Returns `None` when the registry is full, or when `key` holds a lock
    /// of another payload type.
    pub fn get_or_create_lock<T, F>(&self, key: &str, factory: F) -> Option<NamedLock<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T,
    {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(entry) = locks.get_mut(key) {
            entry.last_access = Instant::now();
            return downcast(key, entry.payload.clone());
        }

        if locks.len() >= self.options.maximum_items {
            tracing::debug!(key, "Lock registry full; not creating lock");
            return None;
        }

        let lock: NamedLock<T> = Arc::new(tokio::sync::Mutex::new(factory()));
        locks.insert(
            key.to_string(),
            LockEntry {
                payload: lock.clone(),
                last_access: Instant::now(),
            },
        );
        Some(lock)
    }

    /// Fetch an existing lock under `key`.
    pub fn get_lock<T: Send + 'static>(&self, key: &str) -> Option<NamedLock<T>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = locks.get_mut(key)?;
        entry.last_access = Instant::now();
        downcast(key, entry.payload.clone())
    }

    /// Drop the lock under `key`.
    pub fn release_lock(&self, key: &str) -> bool {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    pub fn lock_count(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Force-cancel and remove requests older than the configured lifetime.
    pub fn sweep_requests(&self) -> usize {
        let lifetime = self.options.request_lifetime;
        let expired: Vec<(String, RequestEntry)> = {
            let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
            let ids: Vec<String> = requests
                .iter()
                .filter(|(_, e)| e.created_at.elapsed() >= lifetime)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| requests.remove(&id).map(|e| (id, e)))
                .collect()
        };

        for (id, entry) in &expired {
            tracing::debug!(reqid = %id, "Cancelling expired request");
            entry.token.cancel();
        }
        expired.len()
    }

    /// Remove locks idle for longer than the configured lifetime.
    pub fn sweep_locks(&self) -> usize {
        let lifetime = self.options.lock_lifetime;
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let before = locks.len();
        locks.retain(|_, e| e.last_access.elapsed() < lifetime);
        before - locks.len()
    }

    /// Start both sweeps on the configured interval.
    ///
    /// The tasks hold only a weak reference and stop on [`shutdown`] or when
    /// the manager is dropped.
    ///
    /// [`shutdown`]: ConnectorManager::shutdown
    pub fn start_sweepers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![
            spawn_sweeper(Arc::downgrade(self), "requests", |m| m.sweep_requests()),
            spawn_sweeper(Arc::downgrade(self), "locks", |m| m.sweep_locks()),
        ]
    }

    /// Stop the background sweeps.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for ConnectorManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn downcast<T: Send + 'static>(
    key: &str,
    payload: Arc<dyn Any + Send + Sync>,
) -> Option<NamedLock<T>> {
    match payload.downcast::<tokio::sync::Mutex<T>>() {
        Ok(lock) => Some(lock),
        Err(_) => {
            tracing::warn!(key, "Named lock holds a different payload type");
            None
        }
    }
}

fn spawn_sweeper(
    manager: Weak<ConnectorManager>,
    registry: &'static str,
    sweep: fn(&ConnectorManager) -> usize,
) -> JoinHandle<()> {
    let (interval, shutdown) = match manager.upgrade() {
        Some(m) => (m.options.polling_interval, m.shutdown.clone()),
        None => return tokio::spawn(async {}),
    };

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(manager) = manager.upgrade() else {
                break;
            };

            let removed = sweep(&manager);
            if removed > 0 {
                tracing::info!(registry, removed_count = removed, "Swept expired entries");
            } else {
                tracing::debug!(registry, "No expired entries to sweep");
            }
        }

        tracing::debug!(registry, "Sweeper stopped");
    })
}
