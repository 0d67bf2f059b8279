//! CORS policy.
//!
//! Browsers will happily combine `Access-Control-Allow-Origin: *` with
//! credentialed requests if a server misconfigures both, so this builder
//! refuses the combination outright: wildcard origins forcibly disable
//! credentials and log a warning. With no origins configured, development
//! mode (`SAM_DEV_MODE=1`) gets a wildcard and everything else gets a
//! fixed loopback list suitable for local front-ends.

use axum::http::{header, HeaderValue, Method};
use log::{info, warn};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Loopback origins used when nothing is configured outside dev mode.
const DEFAULT_DEV_ORIGINS: [&str; 6] = [
    "http://localhost:3000",
    "http://localhost:3001",
    "http://localhost:5173",
    "http://127.0.0.1:3000",
    "http://127.0.0.1:3001",
    "http://127.0.0.1:5173",
];

fn configured_origins() -> Vec<String> {
    std::env::var("SAM_API_CORS_ORIGINS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Build the CORS layer from the environment.
pub fn build_cors_layer() -> CorsLayer {
    let mut origins = configured_origins();
    let dev_mode = std::env::var("SAM_DEV_MODE").map(|v| v == "1").unwrap_or(false);

    if origins.is_empty() {
        if dev_mode {
            warn!(
                "CORS: Allowing all origins (SAM_DEV_MODE=1). This is insecure for production. \
                 Set SAM_API_CORS_ORIGINS explicitly."
            );
            origins = vec!["*".to_string()];
        } else {
            info!(
                "CORS: Using default development origins. Set SAM_API_CORS_ORIGINS for \
                 production or SAM_DEV_MODE=1 for wildcard."
            );
            origins = DEFAULT_DEV_ORIGINS.iter().map(|s| s.to_string()).collect();
        }
    }

    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-csrf-token"),
            header::HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([
            header::HeaderName::from_static("x-csrf-token"),
            header::HeaderName::from_static("x-request-id"),
        ]);

    // Credentials together with wildcard origins must never be emitted.
    if origins.iter().any(|o| o == "*") {
        warn!(
            "CORS: Wildcard origins detected. Credentials disabled for security. \
             Set explicit origins to enable credentials."
        );
        return layer.allow_origin(Any).allow_credentials(false);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("CORS: Ignoring invalid origin '{}'", origin);
                None
            }
        })
        .collect();

    layer
        .allow_origin(AllowOrigin::list(parsed))
        .allow_credentials(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_origins_parsing() {
        std::env::set_var(
            "SAM_API_CORS_ORIGINS",
            "https://app.example.com, https://admin.example.com",
        );
        let origins = configured_origins();
        std::env::remove_var("SAM_API_CORS_ORIGINS");
        assert_eq!(
            origins,
            vec![
                "https://app.example.com".to_string(),
                "https://admin.example.com".to_string()
            ]
        );
    }

    #[test]
    fn test_builder_accepts_wildcard_without_panicking() {
        // tower-http panics on Any + credentials; the builder must never
        // hit that combination.
        std::env::set_var("SAM_API_CORS_ORIGINS", "*");
        let _ = build_cors_layer();
        std::env::remove_var("SAM_API_CORS_ORIGINS");
    }
}
