//! # lib_qbox
//!
//! Realtime core of the question box backend. Visitors react to questions with
//! emoji; every committed reaction is fanned out as a full snapshot of that
//! question's counts to each connected live-update client.
//!
//! ## Modules:
//!
//! - **`reactions`**: the reaction domain. `ReactionSet` aggregates, the symbol
//!   `Whitelist`, the `ReactionService` producer that validates, persists and
//!   publishes, and the client-side `ReactionBoard` view.
//!
//! - **`store`**: the `ReactionStore` seam to durable storage, with an
//!   in-memory implementation and a PostgreSQL one behind the `postgres` feature.
//!
//! - **`realtime`**: the `BroadcastHub` that owns every live subscriber buffer,
//!   the per-client `SubscriberConnection` state machine, and the
//!   `text/event-stream` frame codec.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Reaction aggregates, validation and the producer service.
pub mod reactions;
/// Live subscriber fan-out and streaming connections.
pub mod realtime;
/// Durable reaction storage.
pub mod store;

// --- Public API Re-exports ---
pub use reactions::{
    BroadcastEvent, QuestionId, ReactionBoard, ReactionCount, ReactionError, ReactionService,
    ReactionSet, Revision, Whitelist,
};
pub use realtime::{
    BroadcastHub, CloseReason, Frame, FrameDecoder, FrameKind, PublishReport, StreamSettings,
    SubscriberConnection, SubscriberHandle,
};
pub use store::{MemoryReactionStore, ReactionStore, StoreError};

#[cfg(feature = "postgres")]
pub use store::postgres::PgReactionStore;
