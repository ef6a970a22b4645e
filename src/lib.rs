//! Multi-tenant capture proxy library.
//!
//! Intercepts HTTP traffic, attributes it to a tenant environment, rewrites
//! it to the tenant's upstream, and records relevant exchanges off the
//! response path.

pub mod admin;
pub mod capture;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod session;
pub mod tenant;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use pipeline::{Forward, Interceptor};
