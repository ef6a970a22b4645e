//! Management API.
//!
//! # Endpoints
//! ```text
//! GET  /admin/status            version, active sessions, event subscribers
//! GET  /admin/sessions          in-flight session count
//! GET  /admin/cache             tenant cache sizes
//! POST /admin/cache/invalidate  drop cached tenant lookups
//! GET  /admin/events            WebSocket feed of broadcast events
//! ```
//! Every route requires `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::capture::EventHub;
use crate::pipeline::Interceptor;

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub interceptor: Arc<Interceptor>,
    pub events: EventHub,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(interceptor: Arc<Interceptor>, events: EventHub, api_key: &str) -> Self {
        Self {
            interceptor,
            events,
            api_key: Arc::from(api_key),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/sessions", get(get_sessions))
        .route("/admin/cache", get(get_cache))
        .route("/admin/cache/invalidate", post(invalidate_cache))
        .route("/admin/events", get(events_feed))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
