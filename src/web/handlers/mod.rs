//! HTTP handlers.

pub mod connector;
pub mod request;

use std::sync::Arc;

use crate::connector::Connector;

pub use connector::{connector_get, connector_post, thumbnail};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub connector: Arc<Connector>,
}

impl AppState {
    pub fn new(connector: Arc<Connector>) -> Self {
        Self { connector }
    }
}
