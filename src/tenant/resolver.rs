//! Tenant resolution for inbound requests.
//!
//! # Resolution order
//! ```text
//! environment: path slug (running) → Host (running) → none
//! project:     project override header → environment.project_id → none
//! api:         api override header     → environment.api_id     → none
//! user:        authorization header    → none
//! ```
//!
//! Each lookup goes cache → store. Results are memoized on the
//! [`RequestContext`], so a request never resolves the same record twice.
//! Nothing here is an error to the caller: store failures are logged and
//! resolve to `None`, which the pipeline treats as pass-through.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::TenantCacheConfig;
use crate::http::headers::{API_HEADER, AUTHORIZATION_HEADER, PROJECT_HEADER};
use crate::session::RequestContext;
use crate::tenant::cache::TenantCache;
use crate::tenant::model::{Api, Environment, Project, User};
use crate::tenant::store::{StoreError, TenantStore};

/// First path segment of a request path, without the leading `/`.
///
/// `"/"` and `""` yield `""`; `"/foo/bar"` and `"foo"` yield `"foo"`.
pub fn slug_from_path(path: &str) -> &str {
    let path = path.strip_prefix('/').unwrap_or(path);
    path.split('/').next().unwrap_or_default()
}

/// Resolves Environment / Project / API / User records with cache → store fallback.
pub struct TenantResolver {
    store: Arc<dyn TenantStore>,
    env_by_slug: TenantCache<Environment>,
    env_by_host: TenantCache<Environment>,
    projects: TenantCache<Project>,
    apis: TenantCache<Api>,
    users: TenantCache<User>,
}

impl TenantResolver {
    pub fn new(store: Arc<dyn TenantStore>, config: &TenantCacheConfig) -> Self {
        let ttl = Duration::from_secs(config.ttl_secs);
        let cap = config.capacity;
        Self {
            store,
            env_by_slug: TenantCache::new("environment_slug", cap, ttl),
            env_by_host: TenantCache::new("environment_host", cap, ttl),
            projects: TenantCache::new("project", cap, ttl),
            apis: TenantCache::new("api", cap, ttl),
            users: TenantCache::new("user", cap, ttl),
        }
    }

    /// Environment for this request, resolved once per context.
    pub async fn environment<'a>(&self, ctx: &'a RequestContext) -> Option<&'a Environment> {
        ctx.environment
            .get_or_init(|| self.lookup_environment(ctx.uri().path(), ctx.host()))
            .await
            .as_ref()
    }

    /// Project for this request, resolved once per context.
    pub async fn project<'a>(&self, ctx: &'a RequestContext) -> Option<&'a Project> {
        ctx.project
            .get_or_init(|| async {
                let id = match ctx.header(PROJECT_HEADER).filter(|v| !v.is_empty()) {
                    Some(id) => Some(id.to_string()),
                    None => self
                        .environment(ctx)
                        .await
                        .and_then(|env| env.project_id.clone()),
                };
                match id {
                    Some(id) => self.lookup_project(&id).await,
                    None => None,
                }
            })
            .await
            .as_ref()
    }

    /// API for this request, resolved once per context.
    pub async fn api<'a>(&self, ctx: &'a RequestContext) -> Option<&'a Api> {
        ctx.api
            .get_or_init(|| async {
                let id = match ctx.header(API_HEADER).filter(|v| !v.is_empty()) {
                    Some(id) => Some(id.to_string()),
                    None => self.environment(ctx).await.and_then(|env| env.api_id.clone()),
                };
                match id {
                    Some(id) => self.lookup_api(&id).await,
                    None => None,
                }
            })
            .await
            .as_ref()
    }

    /// Caller identity for this request, resolved once per context.
    pub async fn user<'a>(&self, ctx: &'a RequestContext) -> Option<&'a User> {
        ctx.user
            .get_or_init(|| async {
                match ctx.header(AUTHORIZATION_HEADER).filter(|v| !v.is_empty()) {
                    Some(token) => self.lookup_user(token).await,
                    None => None,
                }
            })
            .await
            .as_ref()
    }

    /// Path slug first, then host. Empty slug and empty host are skipped.
    pub async fn lookup_environment(&self, path: &str, host: &str) -> Option<Environment> {
        let store = &self.store;

        let slug = slug_from_path(path);
        if !slug.is_empty() {
            let found = cached(&self.env_by_slug, slug, move |key| async move {
                store.environment_by_slug(&key).await
            })
            .await;
            if found.is_some() {
                return found;
            }
        }

        if host.is_empty() {
            return None;
        }
        cached(&self.env_by_host, host, move |key| async move {
            store.environment_by_host(&key).await
        })
        .await
    }

    pub async fn lookup_project(&self, id: &str) -> Option<Project> {
        let store = &self.store;
        cached(&self.projects, id, move |key| async move { store.project(&key).await }).await
    }

    pub async fn lookup_api(&self, id: &str) -> Option<Api> {
        let store = &self.store;
        cached(&self.apis, id, move |key| async move { store.api(&key).await }).await
    }

    pub async fn lookup_user(&self, token: &str) -> Option<User> {
        let store = &self.store;
        cached(&self.users, token, move |key| async move { store.user_by_token(&key).await }).await
    }

    /// Forget cached lookups for one environment after it changed upstream.
    pub fn invalidate_environment(&self, env: &Environment) {
        self.env_by_slug.invalidate(&env.slug);
        self.env_by_host.invalidate(&env.upstream_host);
    }

    /// Forget every cached lookup.
    pub fn invalidate_all(&self) {
        self.env_by_slug.clear();
        self.env_by_host.clear();
        self.projects.clear();
        self.apis.clear();
        self.users.clear();
        tracing::info!("Tenant caches invalidated");
    }

    /// (cache name, entry count) for every cache.
    pub fn cache_sizes(&self) -> Vec<(&'static str, usize)> {
        vec![
            (self.env_by_slug.name(), self.env_by_slug.len()),
            (self.env_by_host.name(), self.env_by_host.len()),
            (self.projects.name(), self.projects.len()),
            (self.apis.name(), self.apis.len()),
            (self.users.name(), self.users.len()),
        ]
    }
}

/// Cache hit, else store lookup (populating the cache on a found record).
async fn cached<T, F, Fut>(cache: &TenantCache<T>, key: &str, fetch: F) -> Option<T>
where
    T: Clone,
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<Option<T>, StoreError>>,
{
    if let Some(hit) = cache.get(key) {
        return Some(hit);
    }
    // User lookups are keyed by bearer token.
    let shown = if cache.name() == "user" { "<redacted>" } else { key };

    match fetch(key.to_string()).await {
        Ok(Some(record)) => {
            cache.insert(key, record.clone());
            Some(record)
        }
        Ok(None) => {
            tracing::debug!(cache = cache.name(), key = %shown, "Tenant lookup miss");
            None
        }
        Err(e) => {
            tracing::warn!(cache = cache.name(), key = %shown, error = %e, "Tenant store lookup failed");
            None
        }
    }
}
