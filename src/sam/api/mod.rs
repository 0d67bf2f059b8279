//! HTTP boundary.
//!
//! Safety at the edge: request-ID propagation for log correlation,
//! double-submit-cookie CSRF protection, and a CORS policy that refuses
//! the credentials-with-wildcard foot-gun. The [`app`] module wires the
//! three middlewares around the API router.

pub mod app;
pub mod cors;
pub mod csrf;
pub mod request_id;
