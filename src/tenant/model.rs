//! Tenant records as seen by the interception core.
//!
//! These are read-only snapshots. They are created and updated by whatever
//! owns the tenant database; the proxy only looks them up and caches them.

use serde::{Deserialize, Serialize};

/// A tenant's named backend binding.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Environment {
    /// Unique identifier.
    pub id: String,

    /// Path slug, unique among running environments (e.g. "acme").
    pub slug: String,

    /// Upstream host (and optional port) traffic is forwarded to.
    pub upstream_host: String,

    /// Forward over `https` instead of `http`.
    #[serde(default)]
    pub use_tls: bool,

    /// Owning project.
    #[serde(default)]
    pub project_id: Option<String>,

    /// API this environment is bound to, if any.
    #[serde(default)]
    pub api_id: Option<String>,

    /// Stopped environments never resolve.
    #[serde(default = "default_running")]
    pub running: bool,
}

fn default_running() -> bool {
    true
}

impl Environment {
    /// URL scheme used when forwarding to this environment.
    pub fn scheme(&self) -> &'static str {
        if self.use_tls {
            "https"
        } else {
            "http"
        }
    }
}

/// Ownership and grouping record a capture is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Project {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Api {
    pub id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub name: String,
}

/// Caller identity, looked up from the authorization control header.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub username: String,
    /// Token presented in the authorization control header.
    #[serde(default, skip_serializing)]
    pub token: String,
}
