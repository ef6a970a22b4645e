use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    Json,
};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use crate::admin::AdminState;
use crate::capture::EventHub;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub active_sessions: usize,
    pub event_subscribers: usize,
}

#[derive(Serialize)]
pub struct CacheSize {
    pub cache: &'static str,
    pub entries: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        active_sessions: state.interceptor.sessions().len(),
        event_subscribers: state.events.subscriber_count(),
    })
}

pub async fn get_sessions(State(state): State<AdminState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "active": state.interceptor.sessions().len(),
    }))
}

pub async fn get_cache(State(state): State<AdminState>) -> Json<serde_json::Value> {
    let caches: Vec<CacheSize> = state
        .interceptor
        .resolver()
        .cache_sizes()
        .into_iter()
        .map(|(cache, entries)| CacheSize { cache, entries })
        .collect();
    Json(serde_json::json!({ "caches": caches }))
}

/// Lets whatever writes tenant records drop stale lookups immediately.
pub async fn invalidate_cache(State(state): State<AdminState>) -> Json<serde_json::Value> {
    state.interceptor.resolver().invalidate_all();
    Json(serde_json::json!({ "invalidated": true }))
}

pub async fn events_feed(ws: WebSocketUpgrade, State(state): State<AdminState>) -> Response {
    ws.on_upgrade(move |socket| stream_events(socket, state.events))
}

/// Forward every broadcast event to one WebSocket client as JSON text.
async fn stream_events(mut socket: WebSocket, events: EventHub) {
    let mut rx = events.subscribe();
    tracing::debug!(subscribers = events.subscriber_count(), "Event feed client connected");

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to encode live event");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event feed client lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::debug!("Event feed client disconnected");
}
