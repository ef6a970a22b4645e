//! Tenant identity subsystem.
//!
//! # Data Flow
//! ```text
//! RequestContext
//!     → resolver.rs (memoized per request via OnceCell)
//!         → cache.rs (per-kind TTL cache; misses are not cached)
//!         → store.rs (TenantStore trait; in-memory seed implementation)
//!     → model.rs types memoized on the context
//! ```
//!
//! # Design Decisions
//! - Store failures are logged and treated as "not found"
//! - Environment lookup tries the path slug first, then the host
//! - Only running environments are ever resolved

pub mod cache;
pub mod model;
pub mod resolver;
pub mod store;

pub use cache::TenantCache;
pub use model::{Api, Environment, Project, User};
pub use resolver::{slug_from_path, TenantResolver};
pub use store::{InMemoryTenantStore, StoreError, TenantStore};
