//! Off-path capture publishing.
//!
//! # Data Flow
//! ```text
//! response path (synchronous):
//!     publish(ctx, response, body)
//!         → snapshot control flags, identity, request, response
//!         → try_send(CaptureJob)            (never waits; drops when full)
//!
//! CaptureWorker (detached):
//!     recv CaptureJob → resolve user → CaptureStore::create
//!         → ok:  EventBroadcaster::broadcast("request.create", record)
//!         → err: log + metric, no broadcast, no retry
//! ```

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::capture::record::{
    body_text, captured_response, header_pairs, Attribution, CaptureEvent, CaptureRecord,
    CapturedRequest, REQUEST_CREATE_EVENT,
};
use crate::capture::sink::{CaptureStore, EventBroadcaster};
use crate::http::headers::{is_flag_set, AUTHORIZATION_HEADER, DASHBOARD_HEADER, NO_CONTEXT_HEADER};
use crate::observability::metrics::{self, CaptureOutcome};
use crate::session::{RequestContext, SessionId};
use crate::tenant::TenantResolver;

/// Everything the worker needs, owned. Does not reference the session.
#[derive(Debug)]
pub struct CaptureJob {
    pub session_id: SessionId,
    pub record: CaptureRecord,
    pub auth_token: Option<String>,
}

/// Hands capture jobs to the worker without blocking the response path.
#[derive(Debug, Clone)]
pub struct CapturePublisher {
    tx: mpsc::Sender<CaptureJob>,
}

impl CapturePublisher {
    /// Create a publisher and the receiving end for its [`CaptureWorker`].
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<CaptureJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Snapshot this exchange and queue it for persistence.
    ///
    /// Tenant identity is read from what is already memoized on `ctx`.
    /// Returns false if the job was dropped.
    pub fn publish(&self, ctx: &RequestContext, status: StatusCode, headers: &HeaderMap, body: &Bytes) -> bool {
        let job = snapshot(ctx, status, headers, body);
        match self.tx.try_send(job) {
            Ok(()) => {
                metrics::record_capture(CaptureOutcome::Queued);
                true
            }
            Err(e) => {
                tracing::warn!(session_id = %ctx.id(), error = %e, "Capture queue unavailable, dropping capture");
                metrics::record_capture(CaptureOutcome::Dropped);
                false
            }
        }
    }
}

fn snapshot(ctx: &RequestContext, status: StatusCode, headers: &HeaderMap, body: &Bytes) -> CaptureJob {
    let request_headers = ctx.headers();
    let dashboard = is_flag_set(request_headers, DASHBOARD_HEADER);
    let attribution = if is_flag_set(request_headers, NO_CONTEXT_HEADER) {
        Attribution::default()
    } else {
        Attribution::new(ctx.resolved_environment(), ctx.resolved_project(), ctx.resolved_api())
    };
    let auth_token = ctx
        .header(AUTHORIZATION_HEADER)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let mut recorded_headers = request_headers.clone();
    recorded_headers.remove(AUTHORIZATION_HEADER);

    let duration = ctx
        .last_attempt()
        .map(|a| a.duration())
        .unwrap_or_else(|| ctx.elapsed());

    let record = CaptureRecord {
        id: Uuid::new_v4(),
        created_at_unix_ms: ctx.started_at_unix_ms(),
        duration_ms: duration.as_millis() as u64,
        attribution,
        user_id: None,
        dashboard,
        request: CapturedRequest {
            method: ctx.method().to_string(),
            url: ctx.uri().to_string(),
            upstream_url: ctx.upstream_uri().map(|u| u.to_string()),
            headers: header_pairs(&recorded_headers),
            body: body_text(ctx.body()),
        },
        response: captured_response(status, headers, body),
    };

    CaptureJob {
        session_id: ctx.id(),
        record,
        auth_token,
    }
}

/// Persists and broadcasts queued captures with bounded concurrency.
pub struct CaptureWorker {
    rx: mpsc::Receiver<CaptureJob>,
    store: Arc<dyn CaptureStore>,
    broadcaster: Arc<dyn EventBroadcaster>,
    resolver: Arc<TenantResolver>,
    max_in_flight: usize,
}

impl CaptureWorker {
    pub fn new(
        rx: mpsc::Receiver<CaptureJob>,
        store: Arc<dyn CaptureStore>,
        broadcaster: Arc<dyn EventBroadcaster>,
        resolver: Arc<TenantResolver>,
        max_in_flight: usize,
    ) -> Self {
        Self {
            rx,
            store,
            broadcaster,
            resolver,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Process jobs until every publisher is gone or shutdown is signalled.
    /// On shutdown, already-queued jobs are drained first.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(max_in_flight = self.max_in_flight, "Capture worker starting");
        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                job = self.rx.recv() => match job {
                    Some(job) => self.dispatch(job, &permits, &mut tasks).await,
                    None => break,
                },
                _ = shutdown.recv() => {
                    tracing::info!("Capture worker received shutdown signal, draining queue");
                    self.rx.close();
                    while let Some(job) = self.rx.recv().await {
                        self.dispatch(job, &permits, &mut tasks).await;
                    }
                    break;
                }
            }
            // Reap finished tasks so the set does not grow unbounded.
            while tasks.try_join_next().is_some() {}
        }

        while tasks.join_next().await.is_some() {}
        tracing::info!("Capture worker stopped");
    }

    async fn dispatch(&self, job: CaptureJob, permits: &Arc<Semaphore>, tasks: &mut JoinSet<()>) {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            return;
        };
        let store = self.store.clone();
        let broadcaster = self.broadcaster.clone();
        let resolver = self.resolver.clone();
        tasks.spawn(async move {
            process(job, store.as_ref(), broadcaster.as_ref(), &resolver).await;
            drop(permit);
        });
    }
}

/// Persist one capture and, only if that succeeded, broadcast it.
pub async fn process(
    job: CaptureJob,
    store: &dyn CaptureStore,
    broadcaster: &dyn EventBroadcaster,
    resolver: &TenantResolver,
) -> CaptureOutcome {
    let user = match job.auth_token.as_deref() {
        Some(token) => resolver.lookup_user(token).await,
        None => None,
    };
    let record = job.record.with_user(user.as_ref());

    if let Err(e) = store.create(&record).await {
        tracing::error!(session_id = %job.session_id, capture_id = %record.id, error = %e, "Failed to persist capture");
        metrics::record_capture(CaptureOutcome::PersistFailed);
        return CaptureOutcome::PersistFailed;
    }
    metrics::record_capture(CaptureOutcome::Persisted);

    match serde_json::to_value(CaptureEvent::new(&record)) {
        Ok(payload) => {
            broadcaster.broadcast(REQUEST_CREATE_EVENT, payload);
            metrics::record_capture(CaptureOutcome::Broadcast);
            tracing::debug!(session_id = %job.session_id, capture_id = %record.id, "Capture published");
            CaptureOutcome::Broadcast
        }
        Err(e) => {
            tracing::error!(capture_id = %record.id, error = %e, "Failed to encode capture event");
            CaptureOutcome::Persisted
        }
    }
}
