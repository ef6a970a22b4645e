//! Authoritative tenant lookups.
//!
//! The proxy never writes tenant records. [`TenantStore`] is the narrow seam
//! to whatever database owns them; [`InMemoryTenantStore`] backs tests and
//! the config-seeded standalone mode.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::TenantSeedConfig;
use crate::tenant::model::{Api, Environment, Project, User};

/// Errors returned by a tenant store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("tenant store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with data we could not use.
    #[error("invalid tenant record: {0}")]
    Invalid(String),
}

/// Point lookups against the tenant database.
///
/// Every lookup returns `Ok(None)` when nothing matches; an `Err` means the
/// store itself failed.
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Running environment with the given slug.
    async fn environment_by_slug(&self, slug: &str) -> Result<Option<Environment>, StoreError>;

    /// Running environment whose upstream host equals `host`.
    async fn environment_by_host(&self, host: &str) -> Result<Option<Environment>, StoreError>;

    async fn project(&self, id: &str) -> Result<Option<Project>, StoreError>;

    async fn api(&self, id: &str) -> Result<Option<Api>, StoreError>;

    /// User owning the presented authorization token.
    async fn user_by_token(&self, token: &str) -> Result<Option<User>, StoreError>;
}

/// Tenant store held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTenantStore {
    environments: Arc<DashMap<String, Environment>>,
    projects: Arc<DashMap<String, Project>>,
    apis: Arc<DashMap<String, Api>>,
    users: Arc<DashMap<String, User>>,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from the `[tenants]` config section.
    pub fn from_seed(seed: &TenantSeedConfig) -> Self {
        let store = Self::new();
        for env in &seed.environments {
            store.upsert_environment(env.clone());
        }
        for project in &seed.projects {
            store.upsert_project(project.clone());
        }
        for api in &seed.apis {
            store.upsert_api(api.clone());
        }
        for user in &seed.users {
            store.upsert_user(user.clone());
        }
        tracing::info!(
            environments = store.environments.len(),
            projects = store.projects.len(),
            apis = store.apis.len(),
            users = store.users.len(),
            "Seeded tenant store"
        );
        store
    }

    pub fn upsert_environment(&self, env: Environment) {
        self.environments.insert(env.id.clone(), env);
    }

    pub fn upsert_project(&self, project: Project) {
        self.projects.insert(project.id.clone(), project);
    }

    pub fn upsert_api(&self, api: Api) {
        self.apis.insert(api.id.clone(), api);
    }

    pub fn upsert_user(&self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    /// Flip an environment's running flag. Returns false if unknown.
    pub fn set_running(&self, env_id: &str, running: bool) -> bool {
        match self.environments.get_mut(env_id) {
            Some(mut env) => {
                env.running = running;
                true
            }
            None => false,
        }
    }

    fn find_running(&self, pred: impl Fn(&Environment) -> bool) -> Option<Environment> {
        self.environments
            .iter()
            .find(|r| r.value().running && pred(r.value()))
            .map(|r| r.value().clone())
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn environment_by_slug(&self, slug: &str) -> Result<Option<Environment>, StoreError> {
        Ok(self.find_running(|env| env.slug == slug))
    }

    async fn environment_by_host(&self, host: &str) -> Result<Option<Environment>, StoreError> {
        Ok(self.find_running(|env| env.upstream_host.eq_ignore_ascii_case(host)))
    }

    async fn project(&self, id: &str) -> Result<Option<Project>, StoreError> {
        Ok(self.projects.get(id).map(|r| r.value().clone()))
    }

    async fn api(&self, id: &str) -> Result<Option<Api>, StoreError> {
        Ok(self.apis.get(id).map(|r| r.value().clone()))
    }

    async fn user_by_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        if token.is_empty() {
            return Ok(None);
        }
        Ok(self
            .users
            .iter()
            .find(|r| r.value().token == token)
            .map(|r| r.value().clone()))
    }
}
