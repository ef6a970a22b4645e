//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → sent to the server, which swaps the reloadable policies
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Only CORS, relevance and header-stripping settings reload live;
//!   listener, cache and capture sizing need a restart

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, CaptureConfig, CorsConfig, ListenerConfig, ObservabilityConfig, ProxyConfig,
    TenantCacheConfig, TenantSeedConfig, UpstreamConfig,
};
pub use watcher::ConfigWatcher;
