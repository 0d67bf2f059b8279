//! Request-ID middleware for tracing and log correlation.
//!
//! Every request gets an id — taken from the incoming `X-Request-ID`
//! header or freshly generated — stored in a task-local so any code in the
//! request's call graph can read it without plumbing, and echoed on the
//! response. [`request_id_log_format`] wires the task-local into
//! `env_logger` so every record emitted while handling a request carries
//! its id.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use std::io::Write;
use uuid::Uuid;

/// Header used on both request and response.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

tokio::task_local! {
    static REQUEST_ID: Option<String>;
}

/// The current request's id, readable from anywhere inside the request's
/// call graph. `None` outside a request scope.
pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(|id| id.clone()).ok().flatten()
}

/// Generate a fresh UUIDv4 request id.
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Axum middleware: resolve the id, scope the task-local around the inner
/// handler, and echo the id on the response.
pub async fn request_id_middleware(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(generate_request_id);

    let mut response = REQUEST_ID
        .scope(Some(request_id.clone()), next.run(request))
        .await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// `env_logger` format function attaching `[request_id]` to every record.
///
/// ```rust,no_run
/// env_logger::Builder::from_default_env()
///     .format(sam::api::request_id::request_id_log_format)
///     .init();
/// ```
pub fn request_id_log_format(
    buf: &mut env_logger::fmt::Formatter,
    record: &log::Record<'_>,
) -> std::io::Result<()> {
    writeln!(
        buf,
        "{} [{}] [{}] {}",
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        record.level(),
        current_request_id().unwrap_or_else(|| "-".to_string()),
        record.args()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_request_id_is_uuid() {
        let id = generate_request_id();
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[tokio::test]
    async fn test_task_local_outside_scope_is_none() {
        assert_eq!(current_request_id(), None);
    }

    #[tokio::test]
    async fn test_task_local_inside_scope() {
        let seen = REQUEST_ID
            .scope(Some("abc".to_string()), async { current_request_id() })
            .await;
        assert_eq!(seen.as_deref(), Some("abc"));
    }
}
