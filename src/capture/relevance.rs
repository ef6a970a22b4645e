//! Capture relevance decision.
//!
//! # Rule
//! ```text
//! no context | skip | ignore directive          → false
//! force directive                               → policy.force_capture_requires_tenant ? tenant : true
//! no tenant                                     → false
//! tenant, and any of:
//!     response absent
//!     method != GET
//!     X-Requested-With present
//!     status not in {304, 2xx}
//!     Accept + Content-Type mentions json|xml and not html  → true
//! ```
//! where `tenant` = project resolved, and additionally an API resolved when
//! `policy.require_api` is set.

use axum::http::{header, Method, Response};
use serde::{Deserialize, Serialize};

use crate::http::headers::{is_flag_set, DASHBOARD_HEADER, IGNORE_HEADER};
use crate::session::RequestContext;

/// Which historical coupling between force-capture and tenancy applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RelevancePolicy {
    /// Force-capture traffic still needs a resolved tenant.
    pub force_capture_requires_tenant: bool,

    /// A resolved tenant without a resolved API does not count.
    pub require_api: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RelevanceFilter {
    policy: RelevancePolicy,
}

impl RelevanceFilter {
    pub fn new(policy: RelevancePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RelevancePolicy {
        self.policy
    }

    /// Decide whether this exchange is worth recording.
    ///
    /// Reads tenant identity memoized on the context; the caller resolves
    /// project and API beforehand.
    pub fn is_capturable<B>(&self, ctx: Option<&RequestContext>, response: Option<&Response<B>>) -> bool {
        let Some(ctx) = ctx else {
            return false;
        };
        if ctx.is_skipped() || is_flag_set(ctx.headers(), IGNORE_HEADER) {
            return false;
        }

        let has_tenant = ctx.resolved_project().is_some()
            && (!self.policy.require_api || ctx.resolved_api().is_some());

        if is_flag_set(ctx.headers(), DASHBOARD_HEADER) {
            return !self.policy.force_capture_requires_tenant || has_tenant;
        }
        if !has_tenant {
            return false;
        }

        let Some(response) = response else {
            // Upstream failure; always worth recording.
            return true;
        };

        let request_headers = ctx.headers();
        let is_get = *ctx.method() == Method::GET;
        let is_ajax = request_headers.contains_key("x-requested-with");

        let status = response.status();
        let benign_status = status.as_u16() == 304 || status.is_success();

        let accept = request_headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let types = format!("{accept}{content_type}").to_ascii_lowercase();
        let is_data = (types.contains("json") || types.contains("xml")) && !types.contains("html");

        !is_get || is_ajax || !benign_status || is_data
    }
}
