//! # Reactions Module
//!
//! Everything about a single emoji reaction: the aggregate it lands in, the
//! symbols allowed, the errors a submitter can see, and the service that ties
//! storage to broadcast.

/// Client-side last-write-wins view of snapshots.
pub mod board;
/// Errors returned to the submitting client.
pub mod error;
/// `ReactionSet`, `ReactionCount` and `BroadcastEvent`.
pub mod model;
/// The write path: validate, persist, publish.
pub mod producer;
/// Allowed reaction symbols.
pub mod whitelist;

pub use board::ReactionBoard;
pub use error::ReactionError;
pub use model::{BroadcastEvent, QuestionId, ReactionCount, ReactionSet, Revision};
pub use producer::ReactionService;
pub use whitelist::{Whitelist, DEFAULT_REACTIONS};
