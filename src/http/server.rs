//! HTTP server: the interception engine driver.
//!
//! # Responsibilities
//! - Create Axum Router with the intercept handler
//! - Wire up middleware (tracing, timeout, body limit)
//! - Assign a session id per request and run the pipeline hooks in order
//! - Forward rewritten requests upstream and record each attempt
//! - Spawn the capture worker and the admin API
//! - Apply configuration reloads and shut down gracefully

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin::{setup_admin_router, AdminState};
use crate::capture::{
    CapturePublisher, CaptureStore, CaptureWorker, EventHub, JsonLinesCaptureStore,
    MemoryCaptureStore,
};
use crate::config::ProxyConfig;
use crate::http::headers::{strip_hop_by_hop, HOP_HEADER};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::pipeline::{Forward, Interceptor};
use crate::session::{BaseAttempt, SessionGuard, SessionId, SessionStore};
use crate::tenant::{InMemoryTenantStore, TenantResolver, TenantStore};

/// How long the capture worker may keep draining after the listener stops.
const CAPTURE_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub interceptor: Arc<Interceptor>,
    pub client: reqwest::Client,
    pub next_session: Arc<AtomicU64>,
    pub upstream_timeout: Duration,
    /// Identifies this instance on outbound requests.
    pub hop_id: HeaderValue,
}

/// HTTP server for the capture proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    interceptor: Arc<Interceptor>,
    events: EventHub,
    worker: Option<CaptureWorker>,
}

impl HttpServer {
    /// Create a server whose collaborators come from the configuration:
    /// the seeded in-memory tenant store and a JSON-lines or in-memory
    /// capture store.
    pub fn new(config: ProxyConfig) -> Self {
        let tenants: Arc<dyn TenantStore> = Arc::new(InMemoryTenantStore::from_seed(&config.tenants));
        let captures: Arc<dyn CaptureStore> = match &config.capture.store_path {
            Some(path) => Arc::new(JsonLinesCaptureStore::new(path)),
            None => Arc::new(MemoryCaptureStore::new()),
        };
        Self::with_collaborators(config, tenants, captures, EventHub::default())
    }

    /// Create a server around externally provided collaborators.
    pub fn with_collaborators(
        config: ProxyConfig,
        tenants: Arc<dyn TenantStore>,
        captures: Arc<dyn CaptureStore>,
        events: EventHub,
    ) -> Self {
        let resolver = Arc::new(TenantResolver::new(tenants, &config.tenant_cache));
        let sessions = Arc::new(SessionStore::new(config.listener.max_body_bytes));

        let (publisher, worker) = if config.capture.enabled {
            let (publisher, rx) = CapturePublisher::channel(config.capture.queue_capacity);
            let worker = CaptureWorker::new(
                rx,
                captures,
                Arc::new(events.clone()),
                resolver.clone(),
                config.capture.max_in_flight,
            );
            (Some(publisher), Some(worker))
        } else {
            tracing::info!("Capture disabled, proxying only");
            (None, None)
        };

        let interceptor = Arc::new(Interceptor::new(sessions, resolver, publisher, &config));

        // Redirects are returned to the client as-is; env proxies are ignored.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Failed to build upstream client, using defaults");
                reqwest::Client::new()
            });

        let hop_id = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("capture-proxy"));

        let state = AppState {
            interceptor: interceptor.clone(),
            client,
            next_session: Arc::new(AtomicU64::new(1)),
            upstream_timeout: Duration::from_secs(config.upstream.request_timeout_secs),
            hop_id,
        };

        let router = Self::build_router(&config, state);
        Self {
            router,
            config,
            interceptor,
            events,
            worker,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        // Leave room for the upstream timeout to fire first and produce a 503.
        let timeout = Duration::from_secs(config.upstream.request_timeout_secs + 5);
        Router::new()
            .route("/{*path}", any(intercept_handler))
            .route("/", any(intercept_handler))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes))
            .layer(TimeoutLayer::new(timeout))
            .layer(TraceLayer::new_for_http())
    }

    pub fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Run until `shutdown` fires, then drain in-flight captures.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        shutdown: Shutdown,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let worker_handle = self
            .worker
            .map(|worker| tokio::spawn(worker.run(shutdown.subscribe())));

        // Config reloads
        let interceptor = self.interceptor.clone();
        let mut reload_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = config_updates.recv() => match update {
                        Some(config) => interceptor.apply_config(&config),
                        None => break,
                    },
                    _ = reload_shutdown.recv() => break,
                }
            }
        });

        if self.config.admin.enabled {
            let admin_listener = TcpListener::bind(&self.config.admin.bind_address).await?;
            let admin_addr = admin_listener.local_addr()?;
            let admin = setup_admin_router(AdminState::new(
                self.interceptor.clone(),
                self.events.clone(),
                &self.config.admin.api_key,
            ));
            let mut admin_shutdown = shutdown.subscribe();
            tokio::spawn(async move {
                tracing::info!(address = %admin_addr, "Admin API listening");
                let served = axum::serve(admin_listener, admin)
                    .with_graceful_shutdown(async move {
                        let _ = admin_shutdown.recv().await;
                    })
                    .await;
                if let Err(e) = served {
                    tracing::error!(error = %e, "Admin API failed");
                }
            });
        }

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let mut serve_shutdown = shutdown.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = serve_shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        if let Some(handle) = worker_handle {
            if tokio::time::timeout(CAPTURE_DRAIN_TIMEOUT, handle).await.is_err() {
                tracing::warn!("Capture worker did not drain in time");
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Runs the four pipeline hooks for one request.
async fn intercept_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    if request.headers().get(HOP_HEADER) == Some(&state.hop_id) {
        tracing::warn!(uri = %request.uri(), "Request looped back to this proxy");
        metrics::record_request(&method, StatusCode::LOOP_DETECTED.as_u16(), start);
        return (StatusCode::LOOP_DETECTED, "Request looped back to the proxy").into_response();
    }

    let interceptor = &state.interceptor;
    let id = SessionId(state.next_session.fetch_add(1, Ordering::Relaxed));

    let request = match interceptor.pre_request(id, request, remote_addr).await {
        Ok(request) => request,
        Err(e) => {
            tracing::error!(session_id = %id, error = %e, "Failed to create session");
            metrics::record_request(&method, 500, start);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Session error").into_response();
        }
    };
    let _guard = SessionGuard::new(interceptor.sessions().clone(), id);

    let upstream = match interceptor.pre_forward(id, request).await {
        Forward::Respond(response) => Some(response),
        Forward::Upstream(request) => {
            let attempt_start = Instant::now();
            let result = forward(&state, request).await;
            if let Some(ctx) = interceptor.sessions().get(id) {
                ctx.add_attempt(Arc::new(BaseAttempt {
                    duration: attempt_start.elapsed(),
                    error: result.as_ref().err().cloned(),
                    status: result.as_ref().ok().map(|r| r.status()),
                }));
            }
            match result {
                Ok(response) => Some(response),
                Err(e) => {
                    tracing::warn!(session_id = %id, error = %e, "Upstream request failed");
                    None
                }
            }
        }
    };

    let response = interceptor.post_response(id, upstream).await;
    interceptor.cleanup(id, None);

    metrics::record_request(&method, response.status().as_u16(), start);
    response
}

/// Send one request upstream and buffer the response.
async fn forward(state: &AppState, request: Request<Body>) -> Result<Response, String> {
    let (mut parts, body) = request.into_parts();
    let url = upstream_url(&parts.uri, parts.headers.get(header::HOST))
        .ok_or_else(|| format!("no upstream target for {}", parts.uri))?;

    strip_hop_by_hop(&mut parts.headers);
    parts.headers.insert(HOP_HEADER, state.hop_id.clone());

    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| format!("request body: {e}"))?;

    let upstream = state
        .client
        .request(parts.method, url)
        .headers(parts.headers)
        .body(body)
        .timeout(state.upstream_timeout)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);
    let bytes = upstream.bytes().await.map_err(|e| format!("response body: {e}"))?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

/// Absolute URL for `uri`; origin-form URIs are completed from the Host header.
fn upstream_url(uri: &Uri, host: Option<&HeaderValue>) -> Option<String> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Some(uri.to_string());
    }
    let host = host?.to_str().ok()?;
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    Some(format!("http://{host}{path}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_url_absolute() {
        let uri: Uri = "https://api.internal:9000/widgets?x=1".parse().unwrap();
        assert_eq!(
            upstream_url(&uri, None).as_deref(),
            Some("https://api.internal:9000/widgets?x=1")
        );
    }

    #[test]
    fn test_upstream_url_from_host_header() {
        let uri: Uri = "/widgets?x=1".parse().unwrap();
        let host = HeaderValue::from_static("backend.test:8080");
        assert_eq!(
            upstream_url(&uri, Some(&host)).as_deref(),
            Some("http://backend.test:8080/widgets?x=1")
        );
        assert!(upstream_url(&uri, None).is_none());
    }
}
