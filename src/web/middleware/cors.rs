//! CORS middleware configuration.

use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};

/// Header the client attaches to every connector request.
const X_REQUESTED_WITH: HeaderName = HeaderName::from_static("x-requested-with");

/// Create a CORS layer from configuration.
pub fn create_cors_layer(origins: &[String]) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];

    let parsed_origins: Vec<HeaderValue> =
        origins.iter().filter_map(|o| o.parse().ok()).collect();

    // No usable origins: allow any origin, without credentials
    if parsed_origins.is_empty() {
        return CorsLayer::new()
            .allow_methods(methods)
            .allow_headers(Any)
            .allow_origin(Any);
    }

    // Download cookies need credentials, so origins must be explicit
    CorsLayer::new()
        .allow_methods(methods)
        .allow_headers([CONTENT_TYPE, ACCEPT, X_REQUESTED_WITH])
        .allow_credentials(true)
        .allow_origin(parsed_origins)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_cors_layer_empty_origins() {
        let _layer = create_cors_layer(&[]);
    }

    #[test]
    fn test_create_cors_layer_with_origins() {
        let origins = vec![
            "http://localhost:3000".to_string(),
            "not a header\n".to_string(),
        ];
        let _layer = create_cors_layer(&origins);
    }
}
