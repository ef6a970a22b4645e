//! Session id → request context mapping.

use axum::body::{Body, Bytes};
use axum::http::Request;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

use crate::observability::metrics;
use crate::session::context::{RequestContext, SessionId};

#[derive(Debug, Error)]
pub enum SessionError {
    /// The engine handed out a session id that is still in flight.
    #[error("session {0} already exists")]
    AlreadyExists(SessionId),
}

/// Owns every live [`RequestContext`], one per in-flight session.
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<RequestContext>>,
    max_body_bytes: usize,
}

impl SessionStore {
    pub fn new(max_body_bytes: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_body_bytes,
        }
    }

    /// Create the context for `id`, reading the request body once.
    ///
    /// Returns the context and the request with its body replaced by the
    /// buffered copy, ready to be forwarded.
    pub async fn create(
        &self,
        id: SessionId,
        request: Request<Body>,
        remote_addr: Option<SocketAddr>,
    ) -> Result<(Arc<RequestContext>, Request<Body>), SessionError> {
        if self.sessions.contains_key(&id) {
            return Err(SessionError::AlreadyExists(id));
        }

        let (parts, body) = request.into_parts();
        let body = read_body(id, body, self.max_body_bytes).await;
        let ctx = Arc::new(RequestContext::new(id, &parts, body.clone(), remote_addr));

        match self.sessions.entry(id) {
            Entry::Occupied(_) => return Err(SessionError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(ctx.clone());
            }
        }
        metrics::record_active_sessions(self.sessions.len());

        Ok((ctx, Request::from_parts(parts, Body::from(body))))
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<RequestContext>> {
        self.sessions.get(&id).map(|r| r.value().clone())
    }

    /// Remove the context for `id`. Removing an unknown id is a no-op.
    pub fn remove(&self, id: SessionId) -> Option<Arc<RequestContext>> {
        let removed = self.sessions.remove(&id).map(|(_, ctx)| ctx);
        if removed.is_some() {
            metrics::record_active_sessions(self.sessions.len());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Buffer a request body. A failed read is logged and yields an empty body.
async fn read_body(id: SessionId, body: Body, limit: usize) -> Bytes {
    match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(session_id = %id, error = %e, "Failed to read request body, continuing with empty body");
            Bytes::new()
        }
    }
}

/// Removes a session when dropped, so every exit path tears down exactly once.
pub struct SessionGuard {
    store: Arc<SessionStore>,
    id: SessionId,
}

impl SessionGuard {
    pub fn new(store: Arc<SessionStore>, id: SessionId) -> Self {
        Self { store, id }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.store.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::model::Environment;

    fn request(uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_get_remove() {
        let store = SessionStore::new(1024);
        let (ctx, req) = store
            .create(SessionId(1), request("/acme", "payload"), None)
            .await
            .unwrap();

        assert_eq!(ctx.body().as_ref(), b"payload");
        // Body is replayed to the outbound request.
        let replayed = axum::body::to_bytes(req.into_body(), 1024).await.unwrap();
        assert_eq!(replayed.as_ref(), b"payload");

        assert!(store.get(SessionId(1)).is_some());
        assert_eq!(store.len(), 1);

        assert!(store.remove(SessionId(1)).is_some());
        assert!(store.get(SessionId(1)).is_none());
    }

    #[tokio::test]
    async fn test_duplicate_session_is_rejected() {
        let store = SessionStore::new(1024);
        store.create(SessionId(1), request("/", ""), None).await.unwrap();

        let err = store
            .create(SessionId(1), request("/", ""), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::AlreadyExists(SessionId(1))));
    }

    #[tokio::test]
    async fn test_double_remove_is_noop() {
        let store = SessionStore::new(1024);
        store.create(SessionId(3), request("/", ""), None).await.unwrap();

        assert!(store.remove(SessionId(3)).is_some());
        assert!(store.remove(SessionId(3)).is_none());
        assert!(store.remove(SessionId(99)).is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_body_degrades_to_empty() {
        let store = SessionStore::new(4);
        let (ctx, _) = store
            .create(SessionId(1), request("/", "too large"), None)
            .await
            .unwrap();
        assert!(ctx.body().is_empty());
    }

    #[tokio::test]
    async fn test_guard_removes_on_drop() {
        let store = Arc::new(SessionStore::new(1024));
        store.create(SessionId(5), request("/", ""), None).await.unwrap();

        {
            let _guard = SessionGuard::new(store.clone(), SessionId(5));
            store.remove(SessionId(5));
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = Arc::new(SessionStore::new(1024));

        let tasks: Vec<_> = (0..16u64)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let (ctx, _) = store
                        .create(SessionId(i), request(&format!("/t{i}"), ""), None)
                        .await
                        .unwrap();
                    ctx.set_user_data("owner", i);
                    ctx.environment
                        .get_or_init(|| async move {
                            Some(Environment {
                                id: format!("env-{i}"),
                                slug: format!("t{i}"),
                                upstream_host: "upstream".into(),
                                use_tls: false,
                                project_id: None,
                                api_id: None,
                                running: true,
                            })
                        })
                        .await;
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }

        for i in 0..16u64 {
            let ctx = store.get(SessionId(i)).unwrap();
            assert_eq!(*ctx.user_data::<u64>("owner").unwrap(), i);
            assert_eq!(ctx.resolved_environment().unwrap().slug, format!("t{i}"));
        }
    }
}
