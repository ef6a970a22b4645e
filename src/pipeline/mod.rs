//! Interception pipeline hooks.
//!
//! # Data Flow
//! ```text
//! engine                     Interceptor
//! ───────────────────────    ─────────────────────────────────────────────
//! request arrives         →  pre_request   create session, buffer body
//! before forwarding       →  pre_forward   CORS preflight | resolve tenant
//!                                          → CORS annotate → rewrite target
//! response (or failure)   →  post_response CORS finalize, XFF, marker
//!                                          → relevance → publish capture
//! after response returned →  cleanup       scrub control headers, remove session
//! ```
//!
//! # Design Decisions
//! - Hooks only see a [`SessionId`]; state lives in the [`SessionStore`]
//! - A missing session degrades to pass-through, never to an error response
//! - Reloadable policies sit behind `ArcSwap` so in-flight requests keep
//!   the policy they started with

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Request, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::capture::{CapturePublisher, RelevanceFilter};
use crate::config::ProxyConfig;
use crate::http::cors::CorsPolicy;
use crate::http::headers::{
    append_forwarded_for, mark_captured, scrub_control_headers, URL_HOST_HEADER,
};
use crate::http::rewrite::{apply_rewrite, rewrite_target};
use crate::session::{SessionError, SessionId, SessionStore};
use crate::tenant::TenantResolver;

/// Body of the response synthesized when the upstream could not be reached.
pub const UNAVAILABLE_BODY: &str = "Service not available. Is the server running?";

/// What the engine should do after `pre_forward`.
#[derive(Debug)]
pub enum Forward {
    /// Send this (possibly rewritten) request upstream.
    Upstream(Request<Body>),
    /// Answer the client directly; nothing goes upstream.
    Respond(Response<Body>),
}

pub struct Interceptor {
    sessions: Arc<SessionStore>,
    resolver: Arc<TenantResolver>,
    cors: ArcSwap<CorsPolicy>,
    relevance: ArcSwap<RelevanceFilter>,
    publisher: Option<CapturePublisher>,
    strip_control_headers: AtomicBool,
}

impl Interceptor {
    /// `publisher = None` disables capture entirely.
    pub fn new(
        sessions: Arc<SessionStore>,
        resolver: Arc<TenantResolver>,
        publisher: Option<CapturePublisher>,
        config: &ProxyConfig,
    ) -> Self {
        Self {
            sessions,
            resolver,
            cors: ArcSwap::from_pointee(CorsPolicy::from_config(&config.cors)),
            relevance: ArcSwap::from_pointee(RelevanceFilter::new(config.relevance)),
            publisher,
            strip_control_headers: AtomicBool::new(config.upstream.strip_control_headers),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn resolver(&self) -> &Arc<TenantResolver> {
        &self.resolver
    }

    /// Swap in the reloadable parts of a new configuration.
    pub fn apply_config(&self, config: &ProxyConfig) {
        self.cors.store(Arc::new(CorsPolicy::from_config(&config.cors)));
        self.relevance.store(Arc::new(RelevanceFilter::new(config.relevance)));
        self.strip_control_headers
            .store(config.upstream.strip_control_headers, Ordering::Relaxed);
        tracing::info!(
            force_capture_requires_tenant = config.relevance.force_capture_requires_tenant,
            require_api = config.relevance.require_api,
            strip_control_headers = config.upstream.strip_control_headers,
            "Interceptor policies updated"
        );
    }

    /// Create the session for `id` and return the request with its body buffered.
    pub async fn pre_request(
        &self,
        id: SessionId,
        request: Request<Body>,
        remote_addr: Option<SocketAddr>,
    ) -> Result<Request<Body>, SessionError> {
        let (_, request) = self.sessions.create(id, request, remote_addr).await?;
        Ok(request)
    }

    /// Answer preflights, otherwise retarget the request at its tenant's upstream.
    pub async fn pre_forward(&self, id: SessionId, request: Request<Body>) -> Forward {
        let Some(ctx) = self.sessions.get(id) else {
            tracing::warn!(session_id = %id, "No session in pre_forward, passing through");
            return Forward::Upstream(request);
        };

        let cors = self.cors.load_full();
        if let Some(response) = cors.preflight(&ctx) {
            return Forward::Respond(response);
        }

        let env = self.resolver.environment(&ctx).await;
        let (mut parts, body) = request.into_parts();

        if env.is_some() {
            cors.annotate_request(&mut parts.headers);
        }

        match rewrite_target(ctx.header(URL_HOST_HEADER), env) {
            Some(origin) => {
                apply_rewrite(&mut parts, &origin, env);
                ctx.set_upstream_uri(parts.uri.clone());
                tracing::debug!(
                    session_id = %id,
                    slug = env.map(|e| e.slug.as_str()).unwrap_or_default(),
                    upstream = %parts.uri,
                    "Rewrote request target"
                );
            }
            None => tracing::debug!(session_id = %id, uri = %parts.uri, "No tenant matched, passing through"),
        }

        if self.strip_control_headers.load(Ordering::Relaxed) {
            scrub_control_headers(&mut parts.headers);
        }

        Forward::Upstream(Request::from_parts(parts, body))
    }

    /// Finalize the client response and, if relevant, publish a capture.
    ///
    /// `None` means the upstream exchange failed; the client gets a 503.
    pub async fn post_response(&self, id: SessionId, response: Option<Response<Body>>) -> Response<Body> {
        let Some(ctx) = self.sessions.get(id) else {
            tracing::warn!(session_id = %id, "No session in post_response");
            return response.unwrap_or_else(unavailable);
        };

        if !ctx.is_skipped() {
            // Relevance reads these from the context.
            self.resolver.project(&ctx).await;
            self.resolver.api(&ctx).await;
        }

        let capturable = self.publisher.is_some()
            && self.relevance.load().is_capturable(Some(ctx.as_ref()), response.as_ref());

        let mut response = response.unwrap_or_else(unavailable);

        if !ctx.is_skipped() {
            let headers = response.headers_mut();
            if ctx.resolved_environment().is_some() {
                self.cors.load().finalize_response(&ctx, headers);
            }
            if let Some(addr) = ctx.remote_addr() {
                append_forwarded_for(headers, addr.ip());
            }
            mark_captured(headers);
        }

        match (&self.publisher, capturable) {
            (Some(publisher), true) => {
                let (parts, body) = response.into_parts();
                let bytes = match axum::body::to_bytes(body, usize::MAX).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(session_id = %id, error = %e, "Failed to read response body, capturing empty body");
                        Default::default()
                    }
                };
                publisher.publish(&ctx, parts.status, &parts.headers, &bytes);
                Response::from_parts(parts, Body::from(bytes))
            }
            _ => response,
        }
    }

    /// Scrub control headers from `headers`, if given, and tear the session down.
    ///
    /// Safe to call more than once for the same id.
    pub fn cleanup(&self, id: SessionId, headers: Option<&mut HeaderMap>) {
        if let Some(headers) = headers {
            scrub_control_headers(headers);
        }
        if let Some(ctx) = self.sessions.remove(id) {
            tracing::debug!(session_id = %id, request = %ctx, elapsed_ms = ctx.elapsed().as_millis() as u64, "Session closed");
        }
    }
}

/// Placeholder returned to the client when the upstream is unreachable.
pub fn unavailable() -> Response<Body> {
    let mut response = Response::new(Body::from(UNAVAILABLE_BODY));
    *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
