//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status
//! - `proxy_request_duration_seconds` (histogram): end-to-end latency
//! - `proxy_active_sessions` (gauge): in-flight sessions
//! - `tenant_cache_lookups_total` (counter): lookups by cache, hit/miss
//! - `capture_events_total` (counter): capture pipeline outcomes
//!
//! Recording is a no-op until a recorder is installed, so tests and
//! library users need no setup.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Where one capture ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Queued,
    Dropped,
    Persisted,
    PersistFailed,
    Broadcast,
}

impl CaptureOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            CaptureOutcome::Queued => "queued",
            CaptureOutcome::Dropped => "dropped",
            CaptureOutcome::Persisted => "persisted",
            CaptureOutcome::PersistFailed => "persist_failed",
            CaptureOutcome::Broadcast => "broadcast",
        }
    }
}

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_active_sessions(count: usize) {
    metrics::gauge!("proxy_active_sessions").set(count as f64);
}

pub fn record_cache_lookup(cache: &'static str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    metrics::counter!("tenant_cache_lookups_total", "cache" => cache, "result" => result).increment(1);
}

pub fn record_capture(outcome: CaptureOutcome) {
    metrics::counter!("capture_events_total", "outcome" => outcome.as_str()).increment(1);
}
