//! Traffic capture subsystem.
//!
//! # Data Flow
//! ```text
//! post_response (pipeline):
//!     relevance.rs decides whether the exchange is worth keeping
//!     → publisher.rs snapshots it into an owned CaptureJob
//!     → bounded queue (non-blocking, drops when full)
//!
//! CaptureWorker (detached task):
//!     resolve user by token
//!     → sink.rs CaptureStore::create
//!     → sink.rs EventBroadcaster::broadcast("request.create")
//! ```
//!
//! # Design Decisions
//! - The response path never waits on persistence or broadcast
//! - Broadcast only follows a successful persist; failures are not retried
//! - Jobs own their data so the session can be torn down immediately

pub mod publisher;
pub mod record;
pub mod relevance;
pub mod sink;

pub use publisher::{CaptureJob, CapturePublisher, CaptureWorker};
pub use record::{CaptureEvent, CaptureRecord, REQUEST_CREATE_EVENT};
pub use relevance::{RelevanceFilter, RelevancePolicy};
pub use sink::{
    CaptureError, CaptureStore, EventBroadcaster, EventHub, JsonLinesCaptureStore, LiveEvent,
    MemoryCaptureStore,
};
