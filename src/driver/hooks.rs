//! Driver lifecycle hooks.
//!
//! Observers are registered per [`HookPoint`] and run synchronously, in
//! registration order, whenever the driver reaches that point. A panicking
//! observer is logged and does not affect the operation or later observers.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use crate::ConnectorError;

/// Points in the driver lifecycle observers can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    BeforeMakeDir,
    AfterMakeDir,
    BeforeMakeFile,
    AfterMakeFile,
    BeforeRename,
    AfterRename,
    BeforeRemove,
    AfterRemove,
    BeforeRemoveThumb,
    AfterRemoveThumb,
    RemoveThumbError,
    BeforeRollbackChunk,
    AfterRollbackChunk,
    BeforeUpload,
    AfterUpload,
    UploadError,
    BeforeChunkMerged,
    AfterChunkMerged,
    BeforeChunkTransfer,
    AfterChunkTransfer,
    BeforeMove,
    AfterMove,
    BeforeCopy,
    AfterCopy,
    BeforeArchive,
    AfterArchive,
    ArchiveError,
    BeforeExtract,
    AfterExtract,
    BeforeExtractFile,
    AfterExtractFile,
    BeforeWriteContent,
    AfterWriteContent,
}

/// What an observer receives.
#[derive(Debug, Clone, Copy)]
pub struct DriverEvent<'a> {
    pub point: HookPoint,
    /// Entry the operation acts on.
    pub path: Option<&'a Path>,
    /// Second entry, e.g. the destination of a copy or the new name of a rename.
    pub related: Option<&'a Path>,
    pub is_overwrite: bool,
    pub error: Option<&'a ConnectorError>,
}

impl<'a> DriverEvent<'a> {
    pub fn new(point: HookPoint, path: &'a Path) -> Self {
        Self {
            point,
            path: Some(path),
            related: None,
            is_overwrite: false,
            error: None,
        }
    }

    pub fn pair(point: HookPoint, path: &'a Path, related: &'a Path) -> Self {
        Self {
            related: Some(related),
            ..Self::new(point, path)
        }
    }

    pub fn error(point: HookPoint, path: Option<&'a Path>, error: &'a ConnectorError) -> Self {
        Self {
            point,
            path,
            related: None,
            is_overwrite: false,
            error: Some(error),
        }
    }

    pub fn overwrite(mut self, is_overwrite: bool) -> Self {
        self.is_overwrite = is_overwrite;
        self
    }
}

pub type Hook = Arc<dyn Fn(&DriverEvent<'_>) + Send + Sync>;

/// Observer registry keyed by hook point.
#[derive(Default)]
pub struct DriverHooks {
    hooks: RwLock<HashMap<HookPoint, Vec<Hook>>>,
}

impl std::fmt::Debug for DriverHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("DriverHooks")
            .field("points", &hooks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DriverHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observer for `point`.
    pub fn register<F>(&self, point: HookPoint, hook: F)
    where
        F: Fn(&DriverEvent<'_>) + Send + Sync + 'static,
    {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(point)
            .or_default()
            .push(Arc::new(hook));
    }

    /// Run every observer of the event's point.
    pub fn emit(&self, event: DriverEvent<'_>) {
        // Cloned out so observers may register further hooks
        let observers: Vec<Hook> = {
            let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
            match hooks.get(&event.point) {
                Some(list) => list.clone(),
                None => return,
            }
        };

        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(&event))).is_err() {
                tracing::warn!(point = ?event.point, "Hook observer panicked");
            }
        }
    }

    pub fn notify(&self, point: HookPoint, path: &Path) {
        self.emit(DriverEvent::new(point, path));
    }

    pub fn notify_pair(&self, point: HookPoint, path: &Path, related: &Path) {
        self.emit(DriverEvent::pair(point, path, related));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_observers_run_in_order() {
        let hooks = DriverHooks::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let log = log.clone();
            hooks.register(HookPoint::BeforeMakeDir, move |event| {
                log.lock()
                    .unwrap()
                    .push(format!("{tag}:{}", event.path.unwrap().display()));
            });
        }

        hooks.notify(HookPoint::BeforeMakeDir, Path::new("/vol/a"));
        hooks.notify(HookPoint::AfterMakeDir, Path::new("/vol/a"));

        assert_eq!(*log.lock().unwrap(), vec!["first:/vol/a", "second:/vol/a"]);
    }

    #[test]
    fn test_panicking_observer_is_contained() {
        let hooks = DriverHooks::new();
        let called = Arc::new(Mutex::new(false));

        hooks.register(HookPoint::AfterRemove, |_| panic!("observer failure"));
        let flag = called.clone();
        hooks.register(HookPoint::AfterRemove, move |_| {
            *flag.lock().unwrap() = true;
        });

        hooks.notify(HookPoint::AfterRemove, Path::new("/vol/a"));
        assert!(*called.lock().unwrap());
    }

    #[test]
    fn test_event_carries_pair_and_error() {
        let hooks = DriverHooks::new();
        let seen = Arc::new(Mutex::new(None));

        let slot = seen.clone();
        hooks.register(HookPoint::AfterCopy, move |event| {
            *slot.lock().unwrap() = event.related.map(|p| p.to_path_buf());
        });
        hooks.emit(
            DriverEvent::pair(HookPoint::AfterCopy, Path::new("/a"), Path::new("/b"))
                .overwrite(true),
        );
        assert_eq!(seen.lock().unwrap().as_deref(), Some(Path::new("/b")));

        let errors = Arc::new(Mutex::new(0));
        let count = errors.clone();
        hooks.register(HookPoint::UploadError, move |event| {
            if event.error.is_some() {
                *count.lock().unwrap() += 1;
            }
        });
        let err = ConnectorError::ConnectionAborted;
        hooks.emit(DriverEvent::error(HookPoint::UploadError, None, &err));
        assert_eq!(*errors.lock().unwrap(), 1);
    }
}
