//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, session id, hook dispatch)
//!     → cors.rs (preflight answer, Allow-* injection)
//!     → rewrite.rs (strip slug, retarget scheme/host)
//!     → headers.rs (control-header scrub, XFF, capture marker)
//!     → upstream via reqwest
//!     → Send to client
//! ```

pub mod cors;
pub mod headers;
pub mod rewrite;
pub mod server;

pub use server::HttpServer;
