//! CSRF protection using the double-submit cookie pattern.
//!
//! The token lives in a **non-HttpOnly** cookie (the client must be able
//! to read it) and must be echoed back in the `X-CSRF-Token` header on
//! every state-changing request. The middleware verifies the two values
//! match under constant-time comparison; a forged cross-site request can
//! send the cookie but cannot read it to fill in the header.
//!
//! Safe methods and a small set of exempt routes (auth establishment,
//! docs, health, public-read prefixes) pass through; any passing safe
//! response gets the cookie set if it is missing, so clients are primed
//! before their first mutation.

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use subtle::ConstantTimeEq;

/// Cookie carrying the token. The client script must be able to read it.
pub const CSRF_COOKIE_NAME: &str = "sam_csrf_token";
/// Header the client must echo the token in.
pub const CSRF_HEADER_NAME: &str = "x-csrf-token";
/// Cookie lifetime: 7 days.
pub const CSRF_COOKIE_MAX_AGE: u64 = 7 * 24 * 60 * 60;

/// Routes exempt from the CSRF check. Auth endpoints must work without a
/// token initially; they carry their own protection (signature
/// verification, JWT).
const EXEMPT_ROUTES: [&str; 8] = [
    "/v1/auth/challenge",
    "/v1/auth/verify",
    "/v1/auth/refresh",
    "/v1/auth/logout",
    "/docs",
    "/redoc",
    "/openapi.json",
    "/health",
];

/// Prefixes exempt from the CSRF check. Only truly read-only public
/// surfaces belong here; authenticated state-changing routes must never
/// be added.
const EXEMPT_PREFIXES: [&str; 2] = ["/v1/agents/public/", "/v1/agents/shared/"];

/// Generate a 32-byte URL-safe random token.
pub fn generate_csrf_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn cookie_secure() -> bool {
    std::env::var("SAM_DEV_MODE").map(|v| v != "1").unwrap_or(true)
}

/// Extract a cookie value from the request's `Cookie` headers.
fn read_cookie(request: &Request, name: &str) -> Option<String> {
    for header_value in request.headers().get_all(header::COOKIE) {
        let Ok(raw) = header_value.to_str() else {
            continue;
        };
        for pair in raw.split(';') {
            if let Some((key, value)) = pair.trim().split_once('=') {
                if key == name {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

fn set_csrf_cookie(response: &mut Response, token: &str) {
    let secure = if cookie_secure() { "; Secure" } else { "" };
    // HttpOnly intentionally absent: the client script must read the
    // token to echo it in the header.
    let cookie = format!(
        "{}={}; Max-Age={}; Path=/; SameSite=Lax{}",
        CSRF_COOKIE_NAME, token, CSRF_COOKIE_MAX_AGE, secure
    );
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
}

fn forbidden(detail: &str) -> Response {
    let body = format!("{{\"detail\": \"{}\"}}", detail);
    Response::builder()
        .status(StatusCode::FORBIDDEN)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::FORBIDDEN.into_response())
}

/// Axum middleware enforcing the double-submit check.
pub async fn csrf_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let state_changing = matches!(
        method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    );

    if !state_changing || EXEMPT_ROUTES.contains(&path.as_str()) {
        let existing = read_cookie(&request, CSRF_COOKIE_NAME);
        let mut response = next.run(request).await;
        if existing.is_none() {
            set_csrf_cookie(&mut response, &generate_csrf_token());
        }
        return response;
    }

    if EXEMPT_PREFIXES.iter().any(|p| path.starts_with(p)) {
        return next.run(request).await;
    }

    let cookie = read_cookie(&request, CSRF_COOKIE_NAME);
    let header = request
        .headers()
        .get(CSRF_HEADER_NAME)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let (cookie, header) = match (cookie, header) {
        (Some(cookie), Some(header)) => (cookie, header),
        _ => return forbidden("CSRF token missing"),
    };

    let matches: bool = cookie.as_bytes().ct_eq(header.as_bytes()).into();
    if !matches {
        return forbidden("CSRF token invalid");
    }

    next.run(request).await
}
