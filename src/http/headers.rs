//! Control headers and header manipulation.
//!
//! # Responsibilities
//! - Name the request-side control headers the proxy reads
//! - Scrub control headers once a request is done with them
//! - Append X-Forwarded-For and the capture marker on responses
//! - Strip hop-by-hop headers when re-framing a message

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use std::net::IpAddr;

/// `true` suppresses capture of this exchange.
pub const IGNORE_HEADER: &str = "x-capture-ignore";
/// `true` forces capture; sent by the dashboard's own traffic.
pub const DASHBOARD_HEADER: &str = "x-capture-dashboard";
/// Attribute the request to this project id.
pub const PROJECT_HEADER: &str = "x-capture-project";
/// Attribute the request to this API id.
pub const API_HEADER: &str = "x-capture-api";
/// Forward to this origin instead of the environment's upstream.
pub const URL_HOST_HEADER: &str = "x-capture-url-host";
/// `true` records the exchange without tenant attribution.
pub const NO_CONTEXT_HEADER: &str = "x-capture-no-context";
/// Caller token used to attribute the capture to a user.
pub const AUTHORIZATION_HEADER: &str = "x-capture-authorization";

/// Response marker set on every tracked exchange.
pub const CAPTURE_MARKER_HEADER: &str = "x-capture-request";

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Set on outbound requests with the forwarding instance's id, to detect loops.
pub const HOP_HEADER: &str = "x-capture-hop";

/// Headers removed at cleanup (and before forwarding, when configured).
pub const CONTROL_HEADERS: [&str; 6] = [
    DASHBOARD_HEADER,
    PROJECT_HEADER,
    API_HEADER,
    URL_HOST_HEADER,
    NO_CONTEXT_HEADER,
    AUTHORIZATION_HEADER,
];

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// True if `name` is present with the value `true` (case-insensitive).
pub fn is_flag_set(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub fn scrub_control_headers(headers: &mut HeaderMap) {
    for name in CONTROL_HEADERS {
        headers.remove(name);
    }
}

/// Remove hop-by-hop headers plus `content-length`; the body is re-framed.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove(axum::http::header::CONTENT_LENGTH);
}

/// Append `client` to X-Forwarded-For, creating the header if absent.
pub fn append_forwarded_for(headers: &mut HeaderMap, client: IpAddr) {
    let value = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.is_empty() => format!("{existing}, {client}"),
        _ => client.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

pub fn mark_captured(headers: &mut HeaderMap) {
    headers.insert(
        HeaderName::from_static(CAPTURE_MARKER_HEADER),
        HeaderValue::from_static("true"),
    );
}
