//! HTTP boundary behaviour: double-submit CSRF enforcement and request-ID
//! propagation, exercised against a minimal router with the real
//! middleware stack.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use sam::api::csrf::{csrf_middleware, CSRF_COOKIE_NAME, CSRF_HEADER_NAME};
use sam::api::request_id::{request_id_middleware, REQUEST_ID_HEADER};
use tower::util::ServiceExt;

fn app() -> Router {
    Router::new()
        .route("/x", get(|| async { "ok" }).post(|| async { "changed" }))
        .route("/health", get(|| async { "healthy" }).post(|| async { "healthy" }))
        .route("/v1/agents/public/list", post(|| async { "public" }))
        .layer(middleware::from_fn(csrf_middleware))
        .layer(middleware::from_fn(request_id_middleware))
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    String::from_utf8_lossy(&bytes).into_owned()
}

#[tokio::test]
async fn test_get_without_cookie_sets_one() {
    let response = app()
        .oneshot(Request::builder().uri("/x").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("csrf cookie set")
        .to_str()
        .unwrap()
        .to_string();
    assert!(cookie.starts_with(&format!("{}=", CSRF_COOKIE_NAME)));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(cookie.contains("Path=/"));
    assert!(cookie.contains("Max-Age=604800"));
    // HttpOnly must be absent: the client script reads this cookie.
    assert!(!cookie.contains("HttpOnly"));
}

#[tokio::test]
async fn test_get_with_cookie_does_not_reset_it() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/x")
                .header(header::COOKIE, format!("{}=tok", CSRF_COOKIE_NAME))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_post_with_matching_tokens_passes() {
    let response = app()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/x")
                .header(header::COOKIE, format!("{}=tok-equal", CSRF_COOKIE_NAME))
                .header(CSRF_HEADER_NAME, "tok-equal")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "changed");
}

#[tokio::test]
async fn test_post_with_cookie_only_is_missing() {
    let response = app()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/x")
                .header(header::COOKIE, format!("{}=tok", CSRF_COOKIE_NAME))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_string(response).await, "{\"detail\": \"CSRF token missing\"}");
}

#[tokio::test]
async fn test_post_with_header_only_is_missing() {
    let response = app()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/x")
                .header(CSRF_HEADER_NAME, "tok")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(body_string(response).await.contains("missing"));
}

#[tokio::test]
async fn test_post_with_mismatched_tokens_is_invalid() {
    let response = app()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/x")
                .header(header::COOKIE, format!("{}=tok-a", CSRF_COOKIE_NAME))
                .header(CSRF_HEADER_NAME, "tok-b")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_string(response).await, "{\"detail\": \"CSRF token invalid\"}");
}

#[tokio::test]
async fn test_exempt_route_passes_without_tokens() {
    let response = app()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_exempt_prefix_passes_without_tokens() {
    let response = app()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/v1/agents/public/list")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_request_id_is_generated_and_echoed() {
    let response = app()
        .oneshot(Request::builder().uri("/x").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let id = response
        .headers()
        .get(REQUEST_ID_HEADER)
        .expect("request id echoed")
        .to_str()
        .unwrap();
    assert!(uuid::Uuid::parse_str(id).is_ok());
}

#[tokio::test]
async fn test_incoming_request_id_is_preserved() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/x")
                .header(REQUEST_ID_HEADER, "trace-me-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        response.headers().get(REQUEST_ID_HEADER).unwrap(),
        "trace-me-42"
    );
}
