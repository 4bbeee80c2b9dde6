//! Middleware for the HTTP adapter.

pub mod cors;

pub use cors::create_cors_layer;
