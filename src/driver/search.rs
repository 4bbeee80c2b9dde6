//! Named custom search strategies.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::command::SearchCommand;
use crate::response::SearchResponse;
use crate::Result;

pub type SearchHandler = Arc<
    dyn Fn(SearchCommand, CancellationToken) -> BoxFuture<'static, Result<SearchResponse>>
        + Send
        + Sync,
>;

/// Search handlers keyed by the `type` parameter, populated at startup.
#[derive(Default)]
pub struct SearchRegistry {
    handlers: RwLock<HashMap<String, SearchHandler>>,
}

impl std::fmt::Debug for SearchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("SearchRegistry")
            .field("types", &handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SearchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(SearchCommand, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<SearchResponse>> + Send + 'static,
    {
        let handler: SearchHandler = Arc::new(move |cmd, token| handler(cmd, token).boxed());
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<SearchHandler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}
