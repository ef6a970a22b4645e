//! CORS handling for tenant traffic.
//!
//! Preflights are answered by the proxy itself. Other requests only get CORS
//! headers when they belong to a resolved environment.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, Response, StatusCode};

use crate::config::CorsConfig;
use crate::session::RequestContext;

pub const DEFAULT_ALLOWED_METHODS: &str =
    "GET,POST,PUT,PATCH,DELETE,COPY,HEAD,OPTIONS,LINK,UNLINK,PURGE,LOCK,UNLOCK,PROPFIND";

#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allowed_methods: HeaderValue,
    allowed_origin: HeaderValue,
}

impl CorsPolicy {
    pub fn from_config(config: &CorsConfig) -> Self {
        let allowed_methods = HeaderValue::from_str(&config.allowed_methods.join(","))
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_ALLOWED_METHODS));
        let allowed_origin = HeaderValue::from_str(&config.allowed_origin)
            .unwrap_or_else(|_| HeaderValue::from_static("*"));
        Self {
            allowed_methods,
            allowed_origin,
        }
    }

    /// Answer an `OPTIONS` request directly and mark the context skipped.
    ///
    /// Returns `None` for every other method.
    pub fn preflight(&self, ctx: &RequestContext) -> Option<Response<Body>> {
        if *ctx.method() != Method::OPTIONS {
            return None;
        }

        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::OK;
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        self.insert_allow(headers, requested_headers(ctx.headers()));
        headers.insert(
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static("Content-Length"),
        );

        ctx.mark_skip();
        tracing::debug!(session_id = %ctx.id(), "Answered CORS preflight");
        Some(response)
    }

    /// Annotate the outbound request so the upstream sees the same policy.
    pub fn annotate_request(&self, headers: &mut HeaderMap) {
        let requested = requested_headers(headers);
        self.insert_allow(headers, requested);
        headers.insert(
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static("Content-Length"),
        );
    }

    /// Re-apply the Allow-* set on the way back to the client.
    pub fn finalize_response(&self, ctx: &RequestContext, headers: &mut HeaderMap) {
        self.insert_allow(headers, requested_headers(ctx.headers()));
    }

    fn insert_allow(&self, headers: &mut HeaderMap, requested: Option<HeaderValue>) {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            requested.unwrap_or_else(|| HeaderValue::from_static("")),
        );
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, self.allowed_methods.clone());
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, self.allowed_origin.clone());
    }
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self::from_config(&CorsConfig::default())
    }
}

fn requested_headers(headers: &HeaderMap) -> Option<HeaderValue> {
    headers.get(header::ACCESS_CONTROL_REQUEST_HEADERS).cloned()
}
