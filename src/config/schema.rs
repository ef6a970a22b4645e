//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::capture::relevance::RelevancePolicy;
use crate::http::cors::DEFAULT_ALLOWED_METHODS;
use crate::tenant::model::{Api, Environment, Project, User};

/// Root configuration for the capture proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, body limit).
    pub listener: ListenerConfig,

    /// Upstream forwarding behaviour.
    pub upstream: UpstreamConfig,

    /// Tenant lookup cache sizing and staleness window.
    pub tenant_cache: TenantCacheConfig,

    /// CORS policy for tenant traffic. Reloadable.
    pub cors: CorsConfig,

    /// Capture relevance policy. Reloadable.
    pub relevance: RelevancePolicy,

    /// Capture queue and store.
    pub capture: CaptureConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,

    /// Seed records for the in-memory tenant store.
    pub tenants: TenantSeedConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Largest request body buffered into a session.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Total time allowed for one upstream exchange, in seconds.
    pub request_timeout_secs: u64,

    /// Remove control headers from the outbound request before forwarding.
    pub strip_control_headers: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            strip_control_headers: true,
        }
    }
}

/// Tenant cache configuration.
///
/// Cached records may be stale for up to `ttl_secs`, e.g. an environment
/// stopped upstream keeps resolving until its entry expires or is
/// invalidated. `ttl_secs = 0` disables caching.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TenantCacheConfig {
    /// Maximum entries per cache.
    pub capacity: usize,

    pub ttl_secs: u64,
}

impl Default for TenantCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_methods: Vec<String>,
    pub allowed_origin: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_methods: DEFAULT_ALLOWED_METHODS.split(',').map(str::to_string).collect(),
            allowed_origin: "*".to_string(),
        }
    }
}

/// Capture pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Disable to proxy without recording anything.
    pub enabled: bool,

    /// Jobs waiting for the worker; further captures are dropped.
    pub queue_capacity: usize,

    /// Concurrent persist/broadcast tasks.
    pub max_in_flight: usize,

    /// Append records as JSON lines here. In-memory store when unset.
    pub store_path: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 1024,
            max_in_flight: 16,
            store_path: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Records loaded into the in-memory tenant store at startup.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TenantSeedConfig {
    pub environments: Vec<Environment>,
    pub projects: Vec<Project>,
    pub apis: Vec<Api>,
    pub users: Vec<User>,
}
