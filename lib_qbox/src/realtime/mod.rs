//! # Realtime Module
//!
//! Live fan-out of reaction snapshots to streaming clients.
//!
//! - **`hub`**: the `BroadcastHub`, owner of every subscriber buffer.
//! - **`connection`**: the per-client `SubscriberConnection` state machine.
//! - **`frame`**: `text/event-stream` encoding and decoding.

pub mod connection;
pub mod frame;
pub mod hub;

pub use connection::{CloseReason, ConnectionState, StreamError, StreamSettings, SubscriberConnection};
pub use frame::{Frame, FrameDecoder, FrameKind};
pub use hub::{BroadcastHub, PublishReport, SubscriberHandle, SubscriberId, DEFAULT_BUFFER_CAPACITY};
