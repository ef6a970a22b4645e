//! Capture record and live event payload.

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tenant::model::{Api, Environment, Project, User};

/// Event name broadcast for every persisted capture.
pub const REQUEST_CREATE_EVENT: &str = "request.create";

/// Tenant attribution of a capture. Empty when the no-context directive is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Attribution {
    pub environment_id: Option<String>,
    pub environment_slug: Option<String>,
    pub project_id: Option<String>,
    pub api_id: Option<String>,
}

impl Attribution {
    pub fn new(env: Option<&Environment>, project: Option<&Project>, api: Option<&Api>) -> Self {
        Self {
            environment_id: env.map(|e| e.id.clone()),
            environment_slug: env.map(|e| e.slug.clone()),
            project_id: project.map(|p| p.id.clone()),
            api_id: api.map(|a| a.id.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CapturedRequest {
    pub method: String,
    pub url: String,
    /// Rewritten target; absent for pass-through traffic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_url: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CapturedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// One recorded request/response pair. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CaptureRecord {
    pub id: Uuid,
    pub created_at_unix_ms: u64,
    pub duration_ms: u64,
    pub attribution: Attribution,
    pub user_id: Option<String>,
    /// Sent by the dashboard rather than proxied tenant traffic.
    pub dashboard: bool,
    pub request: CapturedRequest,
    pub response: CapturedResponse,
}

impl CaptureRecord {
    pub fn with_user(mut self, user: Option<&User>) -> Self {
        self.user_id = user.map(|u| u.id.clone());
        self
    }
}

/// Payload of a `request.create` broadcast.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureEvent<'a> {
    pub model: &'static str,
    pub data: &'a CaptureRecord,
}

impl<'a> CaptureEvent<'a> {
    pub fn new(record: &'a CaptureRecord) -> Self {
        Self {
            model: "request",
            data: record,
        }
    }
}

/// Header pairs with values decoded lossily.
pub fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
        .collect()
}

pub fn body_text(body: &Bytes) -> String {
    String::from_utf8_lossy(body).into_owned()
}

pub fn captured_response(status: StatusCode, headers: &HeaderMap, body: &Bytes) -> CapturedResponse {
    CapturedResponse {
        status: status.as_u16(),
        headers: header_pairs(headers),
        body: body_text(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_event_payload_shape() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let record = CaptureRecord {
            id: Uuid::nil(),
            created_at_unix_ms: 1,
            duration_ms: 2,
            attribution: Attribution {
                environment_slug: Some("acme".into()),
                ..Default::default()
            },
            user_id: None,
            dashboard: false,
            request: CapturedRequest {
                method: "GET".into(),
                url: "/widgets".into(),
                upstream_url: None,
                headers: vec![],
                body: String::new(),
            },
            response: captured_response(StatusCode::OK, &headers, &Bytes::from_static(b"{\"ok\":true}")),
        };

        let json = serde_json::to_value(CaptureEvent::new(&record)).unwrap();
        assert_eq!(json["model"], "request");
        assert_eq!(json["data"]["attribution"]["environment_slug"], "acme");
        assert_eq!(json["data"]["response"]["status"], 200);
        assert_eq!(json["data"]["response"]["headers"][0][0], "content-type");
        assert_eq!(json["data"]["response"]["body"], "{\"ok\":true}");
    }
}
