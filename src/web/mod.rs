//! HTTP adapter.
//!
//! Exposes the connector over axum: one command endpoint accepting query
//! strings, urlencoded forms and multipart uploads, a thumbnail endpoint and
//! a health check.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod server;

pub use error::ApiError;
pub use router::create_router;
pub use server::WebServer;
