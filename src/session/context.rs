//! Per-request state carried across the intercept pipeline.

use axum::body::Bytes;
use axum::http::{request::Parts, HeaderMap, Method, StatusCode, Uri};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::OnceCell;

use crate::tenant::model::{Api, Environment, Project, User};

/// Opaque identifier the interception engine assigns to one in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One upstream attempt, as reported by the interception engine.
pub trait Attempt: Send + Sync + fmt::Debug {
    fn duration(&self) -> Duration;

    /// Transport error, if the attempt failed before a response arrived.
    fn error(&self) -> Option<&str>;

    /// Status of the upstream response, if one arrived.
    fn response_status(&self) -> Option<StatusCode>;
}

/// Plain attempt record used by the bundled engine driver.
#[derive(Debug, Clone)]
pub struct BaseAttempt {
    pub duration: Duration,
    pub error: Option<String>,
    pub status: Option<StatusCode>,
}

impl Attempt for BaseAttempt {
    fn duration(&self) -> Duration {
        self.duration
    }

    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn response_status(&self) -> Option<StatusCode> {
        self.status
    }
}

type UserData = HashMap<String, Arc<dyn Any + Send + Sync>>;

/// State for one proxied request, keyed by [`SessionId`] in the session store.
///
/// Headers are snapshotted at creation: later stages may scrub control
/// headers from the live request, and the capture stage still needs them.
/// Tenant identity is resolved at most once and memoized here.
pub struct RequestContext {
    id: SessionId,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
    started_at: Instant,
    started_at_unix_ms: u64,
    skip: AtomicBool,
    upstream_uri: Mutex<Option<Uri>>,

    pub(crate) environment: OnceCell<Option<Environment>>,
    pub(crate) project: OnceCell<Option<Project>>,
    pub(crate) api: OnceCell<Option<Api>>,
    pub(crate) user: OnceCell<Option<User>>,

    attempts: Mutex<Vec<Arc<dyn Attempt>>>,
    user_data: RwLock<UserData>,
}

impl RequestContext {
    /// Snapshot the inbound request head together with its already-read body.
    pub fn new(id: SessionId, parts: &Parts, body: Bytes, remote_addr: Option<SocketAddr>) -> Self {
        let started_at_unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        Self {
            id,
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
            body,
            remote_addr,
            started_at: Instant::now(),
            started_at_unix_ms,
            skip: AtomicBool::new(false),
            upstream_uri: Mutex::new(None),
            environment: OnceCell::new(),
            project: OnceCell::new(),
            api: OnceCell::new(),
            user: OnceCell::new(),
            attempts: Mutex::new(Vec::new()),
            user_data: RwLock::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Inbound headers as they were when the request arrived.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value from the snapshot, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Request body, read once at creation.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Host the client addressed: URI authority first, then the Host header.
    pub fn host(&self) -> &str {
        self.uri
            .authority()
            .map(|a| a.as_str())
            .or_else(|| self.header("host"))
            .unwrap_or_default()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn started_at_unix_ms(&self) -> u64 {
        self.started_at_unix_ms
    }

    /// Whether capture and header injection are suppressed for this request.
    pub fn is_skipped(&self) -> bool {
        self.skip.load(Ordering::Acquire)
    }

    pub fn mark_skip(&self) {
        self.skip.store(true, Ordering::Release);
    }

    /// Where the request was actually sent, once rewritten.
    pub fn upstream_uri(&self) -> Option<Uri> {
        self.upstream_uri.lock().clone()
    }

    pub fn set_upstream_uri(&self, uri: Uri) {
        *self.upstream_uri.lock() = Some(uri);
    }

    // --- Attempts ---

    pub fn add_attempt(&self, attempt: Arc<dyn Attempt>) {
        self.attempts.lock().push(attempt);
    }

    pub fn attempts(&self) -> Vec<Arc<dyn Attempt>> {
        self.attempts.lock().clone()
    }

    pub fn last_attempt(&self) -> Option<Arc<dyn Attempt>> {
        self.attempts.lock().last().cloned()
    }

    // --- User data ---

    /// Store extension state under `key`, replacing any previous value.
    pub fn set_user_data<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.user_data.write().insert(key.into(), Arc::new(value));
    }

    /// Fetch extension state previously stored under `key` as `T`.
    pub fn user_data<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = self.user_data.read().get(key).cloned()?;
        value.downcast::<T>().ok()
    }

    pub fn delete_user_data(&self, key: &str) {
        self.user_data.write().remove(key);
    }

    // --- Memoized identity (populated by the tenant resolver) ---

    /// Environment if already resolved for this request.
    pub fn resolved_environment(&self) -> Option<&Environment> {
        self.environment.get().and_then(Option::as_ref)
    }

    pub fn resolved_project(&self) -> Option<&Project> {
        self.project.get().and_then(Option::as_ref)
    }

    pub fn resolved_api(&self) -> Option<&Api> {
        self.api.get().and_then(Option::as_ref)
    }
}

impl fmt::Display for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Request(id={}, method={}, url={}, attempts={})",
            self.id,
            self.method,
            self.uri,
            self.attempts.lock().len()
        )
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("skip", &self.is_skipped())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn context(uri: &str) -> RequestContext {
        let (parts, _) = Request::builder()
            .method("POST")
            .uri(uri)
            .header("host", "proxy.local")
            .header("x-capture-project", "p1")
            .body(())
            .unwrap()
            .into_parts();
        RequestContext::new(SessionId(7), &parts, Bytes::from_static(b"{}"), None)
    }

    #[test]
    fn test_snapshot_outlives_live_header_removal() {
        let (mut parts, _) = Request::builder()
            .uri("/acme")
            .header("x-capture-dashboard", "true")
            .body(())
            .unwrap()
            .into_parts();
        let ctx = RequestContext::new(SessionId(1), &parts, Bytes::new(), None);

        parts.headers.remove("x-capture-dashboard");
        assert_eq!(ctx.header("x-capture-dashboard"), Some("true"));
    }

    #[test]
    fn test_host_prefers_authority() {
        assert_eq!(context("http://api.acme.test/x").host(), "api.acme.test");
        assert_eq!(context("/x").host(), "proxy.local");
    }

    #[test]
    fn test_skip_flag() {
        let ctx = context("/");
        assert!(!ctx.is_skipped());
        ctx.mark_skip();
        assert!(ctx.is_skipped());
    }

    #[test]
    fn test_attempt_log() {
        let ctx = context("/");
        assert!(ctx.last_attempt().is_none());

        ctx.add_attempt(Arc::new(BaseAttempt {
            duration: Duration::from_millis(5),
            error: Some("connection refused".into()),
            status: None,
        }));
        ctx.add_attempt(Arc::new(BaseAttempt {
            duration: Duration::from_millis(9),
            error: None,
            status: Some(StatusCode::OK),
        }));

        assert_eq!(ctx.attempts().len(), 2);
        let last = ctx.last_attempt().unwrap();
        assert_eq!(last.response_status(), Some(StatusCode::OK));
        assert!(last.error().is_none());
        assert_eq!(ctx.to_string(), "Request(id=7, method=POST, url=/, attempts=2)");
    }

    #[test]
    fn test_user_data_bag() {
        let ctx = context("/");
        assert!(ctx.user_data::<u32>("count").is_none());

        ctx.set_user_data("count", 3u32);
        assert_eq!(*ctx.user_data::<u32>("count").unwrap(), 3);
        // Wrong type is a miss, not a panic.
        assert!(ctx.user_data::<String>("count").is_none());

        ctx.delete_user_data("count");
        assert!(ctx.user_data::<u32>("count").is_none());
        ctx.delete_user_data("count");
    }

    #[test]
    fn test_user_data_concurrent_access() {
        let ctx = Arc::new(context("/"));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ctx = ctx.clone();
                std::thread::spawn(move || {
                    ctx.set_user_data(format!("k{i}"), i);
                    ctx.user_data::<i32>(&format!("k{i}")).map(|v| *v)
                })
            })
            .collect();

        for (i, h) in handles.into_iter().enumerate() {
            assert_eq!(h.join().unwrap(), Some(i as i32));
        }
    }
}
