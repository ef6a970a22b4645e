//! Per-request session state.
//!
//! A session lives from `pre_request` until `cleanup`. The interception
//! engine only hands the pipeline a [`SessionId`]; everything else is
//! looked up in the [`SessionStore`].

pub mod context;
pub mod store;

pub use context::{Attempt, BaseAttempt, RequestContext, SessionId};
pub use store::{SessionError, SessionGuard, SessionStore};
