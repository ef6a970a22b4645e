//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → stop accepting → drain connections
//!             → capture worker drains its queue → exit
//! ```
//!
//! # Design Decisions
//! - Config reload comes from the file watcher, not SIGHUP
//! - Capture draining has a deadline so shutdown cannot hang

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
