//! Configuration validation.
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::ProxyConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("duplicate environment slug '{0}'")]
    DuplicateSlug(String),

    #[error("environment '{0}' has an empty slug or upstream host")]
    IncompleteEnvironment(String),

    #[error("cors.allowed_methods must not be empty")]
    NoCorsMethods,

    #[error("admin.api_key must be set when the admin API is enabled")]
    MissingAdminKey,
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        check_addr(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }
    if config.admin.enabled {
        check_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::MissingAdminKey);
        }
    }

    if config.listener.max_body_bytes == 0 {
        errors.push(ValidationError::Zero { field: "listener.max_body_bytes" });
    }
    if config.upstream.request_timeout_secs == 0 {
        errors.push(ValidationError::Zero { field: "upstream.request_timeout_secs" });
    }
    if config.capture.queue_capacity == 0 {
        errors.push(ValidationError::Zero { field: "capture.queue_capacity" });
    }
    if config.capture.max_in_flight == 0 {
        errors.push(ValidationError::Zero { field: "capture.max_in_flight" });
    }
    if config.cors.allowed_methods.is_empty() {
        errors.push(ValidationError::NoCorsMethods);
    }

    // Slugs only need to be unique among running environments.
    let mut slugs = HashSet::new();
    for env in &config.tenants.environments {
        if env.slug.trim().is_empty() || env.upstream_host.trim().is_empty() {
            errors.push(ValidationError::IncompleteEnvironment(env.id.clone()));
            continue;
        }
        if env.running && !slugs.insert(env.slug.as_str()) {
            errors.push(ValidationError::DuplicateSlug(env.slug.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
