//! # Subscriber Connection
//!
//! Drives one long-lived stream: `Connecting -> Streaming -> Closed`.
//!
//! The transport is the sending half of a bounded channel whose receiver is
//! the HTTP response body. When the client goes away the body is dropped, the
//! receiver with it, and `Sender::closed` resolves. That is the disconnect
//! signal.
//!
//! While streaming, each turn of the loop waits on the first ready of, in
//! priority order:
//!
//! 1.  client gone            -> close
//! 2.  removed by the hub     -> close (eviction or shutdown)
//! 3.  heartbeat tick         -> `heartbeat` frame
//! 4.  buffered event         -> `emoji` frame with the next sequence id
//! 5.  idle deadline          -> `retry` frame
//!
//! A write waits for room in the transport, but never past removal by the
//! hub, so a client that stops reading is still evicted. Any failed write
//! closes the connection. Whatever the reason, the subscriber is unregistered
//! before `run` returns.
//!
//! The current `ConnectionState` is published on a `watch` channel.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::realtime::frame::Frame;
use crate::realtime::hub::{BroadcastHub, SubscriberHandle};

/// Timers governing a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// Interval between `heartbeat` frames.
    pub heartbeat_interval: Duration,
    /// Quiet period after which a `retry` frame is written.
    pub idle_timeout: Duration,
    /// Reconnect delay advertised in `retry` frames.
    pub retry_after: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(30),
            retry_after: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Streaming,
    Closed,
}

/// Why a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client disconnected.
    ClientGone,
    /// The hub dropped this subscriber (buffer full or unregistered elsewhere).
    Evicted,
    /// A frame could not be handed to the transport.
    WriteFailed,
    /// An event could not be encoded.
    Serialization,
    /// The hub was closed for process shutdown.
    Shutdown,
}

/// Connection-local failures. They end this stream only.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to encode event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("transport closed")]
    TransportWrite,

    #[error("removed by hub")]
    Removed,
}

/// Per-client streaming task.
pub struct SubscriberConnection {
    hub: Arc<BroadcastHub>,
    handle: SubscriberHandle,
    transport: mpsc::Sender<Frame>,
    settings: StreamSettings,
    state: watch::Sender<ConnectionState>,
    sequence: u64,
}

impl SubscriberConnection {
    pub fn new(
        hub: Arc<BroadcastHub>,
        handle: SubscriberHandle,
        transport: mpsc::Sender<Frame>,
        settings: StreamSettings,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            hub,
            handle,
            transport,
            settings,
            state,
            sequence: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Follows the state from outside once `run` owns the connection. The
    /// last value seen is `Closed`.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn removal_reason(&self) -> CloseReason {
        if self.hub.is_closed() {
            CloseReason::Shutdown
        } else {
            CloseReason::Evicted
        }
    }

    /// Runs the stream to completion and reports why it ended.
    pub async fn run(mut self) -> CloseReason {
        let id = self.handle.id();
        let removal = self.handle.removal();

        // Best effort: a failed write here is picked up by the loop below.
        if let Err(err) = send_frame(&self.transport, &removal, Frame::connected()).await {
            debug!(subscriber = id, error = %err, "connected frame not delivered");
        }
        self.state.send_replace(ConnectionState::Streaming);
        debug!(subscriber = id, state = ?self.state(), "stream open");

        let start = Instant::now();
        let mut heartbeat = interval_at(
            start + self.settings.heartbeat_interval,
            self.settings.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let idle = sleep(self.settings.idle_timeout);
        tokio::pin!(idle);

        let reason = loop {
            let outcome = tokio::select! {
                biased;
                _ = self.transport.closed() => break CloseReason::ClientGone,
                _ = removal.cancelled() => break self.removal_reason(),
                _ = heartbeat.tick() => send_frame(&self.transport, &removal, Frame::heartbeat()).await,
                event = self.handle.recv() => match event {
                    Some(event) => {
                        self.sequence += 1;
                        match Frame::emoji(self.sequence, &event) {
                            Ok(frame) => send_frame(&self.transport, &removal, frame).await,
                            Err(err) => Err(StreamError::from(err)),
                        }
                    }
                    None => break CloseReason::Evicted,
                },
                _ = &mut idle => {
                    send_frame(&self.transport, &removal, Frame::retry(self.settings.retry_after)).await
                }
            };

            match outcome {
                Ok(()) => idle
                    .as_mut()
                    .reset(Instant::now() + self.settings.idle_timeout),
                Err(StreamError::Serialization(err)) => {
                    warn!(subscriber = id, error = %err, "failed to encode emoji event");
                    break CloseReason::Serialization;
                }
                Err(StreamError::TransportWrite) => break CloseReason::WriteFailed,
                Err(StreamError::Removed) => break self.removal_reason(),
            }
        };

        self.hub.unregister(id);
        self.state.send_replace(ConnectionState::Closed);
        info!(subscriber = id, reason = ?reason, state = ?self.state(), frames = self.sequence, "stream closed");
        reason
    }
}

/// Waits for room in the transport unless the hub removes the subscriber first.
async fn send_frame(
    transport: &mpsc::Sender<Frame>,
    removal: &CancellationToken,
    frame: Frame,
) -> Result<(), StreamError> {
    tokio::select! {
        biased;
        _ = removal.cancelled() => Err(StreamError::Removed),
        sent = transport.send(frame) => sent.map_err(|_| StreamError::TransportWrite),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactions::model::{BroadcastEvent, ReactionCount};
    use crate::realtime::frame::FrameKind;

    fn settings(heartbeat: u64, idle: u64) -> StreamSettings {
        StreamSettings {
            heartbeat_interval: Duration::from_secs(heartbeat),
            idle_timeout: Duration::from_secs(idle),
            retry_after: Duration::from_secs(10),
        }
    }

    fn snapshot(question_id: u64, count: u64) -> BroadcastEvent {
        BroadcastEvent {
            question_id,
            reactions: vec![ReactionCount {
                value: "👍".to_string(),
                count,
            }],
        }
    }

    fn open(
        hub: &Arc<BroadcastHub>,
        settings: StreamSettings,
    ) -> (tokio::task::JoinHandle<CloseReason>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(16);
        let connection = SubscriberConnection::new(Arc::clone(hub), hub.register(), tx, settings);
        assert_eq!(connection.state(), ConnectionState::Connecting);
        (tokio::spawn(connection.run()), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn streams_connected_emoji_and_heartbeat_frames() {
        let hub = Arc::new(BroadcastHub::new(8));
        let (task, mut rx) = open(&hub, settings(15, 30));

        assert_eq!(rx.recv().await.unwrap(), Frame::connected());

        hub.publish(snapshot(42, 1), 1);
        hub.publish(snapshot(42, 2), 2);
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.kind, FrameKind::Emoji);
        assert_eq!(first.id.as_deref(), Some("1"));
        assert_eq!(first.event().unwrap().unwrap(), snapshot(42, 1));
        assert_eq!(second.id.as_deref(), Some("2"));

        let started = Instant::now();
        assert_eq!(rx.recv().await.unwrap(), Frame::heartbeat());
        assert!(started.elapsed() >= Duration::from_secs(14));

        drop(rx);
        assert_eq!(task.await.unwrap(), CloseReason::ClientGone);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_stream_gets_retry_hint() {
        let hub = Arc::new(BroadcastHub::new(8));
        let (task, mut rx) = open(&hub, settings(60, 10));

        assert_eq!(rx.recv().await.unwrap().kind, FrameKind::Connected);
        let retry = rx.recv().await.unwrap();
        assert_eq!(retry, Frame::retry(Duration::from_secs(10)));
        assert_eq!(rx.recv().await.unwrap().kind, FrameKind::Retry);

        drop(rx);
        assert_eq!(task.await.unwrap(), CloseReason::ClientGone);
    }

    #[tokio::test(start_paused = true)]
    async fn hub_removal_wins_over_pending_events() {
        let hub = Arc::new(BroadcastHub::new(8));
        let (task, mut rx) = open(&hub, settings(15, 30));
        assert_eq!(rx.recv().await.unwrap().kind, FrameKind::Connected);

        hub.publish(snapshot(1, 1), 1);
        assert_eq!(hub.subscriber_count(), 1);
        hub.close();

        assert_eq!(task.await.unwrap(), CloseReason::Shutdown);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_closes_stream_without_more_frames() {
        let hub = Arc::new(BroadcastHub::new(1));
        let (tx, mut rx) = mpsc::channel(16);
        let handle = hub.register();
        let subscriber = handle.id();
        let connection = SubscriberConnection::new(Arc::clone(&hub), handle, tx, settings(15, 30));
        let task = tokio::spawn(connection.run());
        assert_eq!(rx.recv().await.unwrap().kind, FrameKind::Connected);

        // buffer of one: the second publish evicts before the task wakes up
        hub.publish(snapshot(1, 1), 1);
        let report = hub.publish(snapshot(1, 2), 2);
        assert_eq!(report.evicted, 1);

        assert_eq!(task.await.unwrap(), CloseReason::Evicted);
        assert!(rx.recv().await.is_none());
        assert!(!hub.unregister(subscriber));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_is_checked_before_delivery() {
        let hub = Arc::new(BroadcastHub::new(8));
        let (task, mut rx) = open(&hub, settings(15, 30));
        assert_eq!(rx.recv().await.unwrap().kind, FrameKind::Connected);

        hub.publish(snapshot(9, 1), 1);
        drop(rx);

        assert_eq!(task.await.unwrap(), CloseReason::ClientGone);
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.publish(snapshot(9, 2), 2).delivered, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn state_is_observable_through_the_lifecycle() {
        let hub = Arc::new(BroadcastHub::new(8));
        let (tx, mut rx) = mpsc::channel(16);
        let connection = SubscriberConnection::new(Arc::clone(&hub), hub.register(), tx, settings(15, 30));
        let mut state = connection.watch_state();
        assert_eq!(*state.borrow(), ConnectionState::Connecting);
        let task = tokio::spawn(connection.run());

        state.wait_for(|s| *s == ConnectionState::Streaming).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().kind, FrameKind::Connected);

        drop(rx);
        assert_eq!(task.await.unwrap(), CloseReason::ClientGone);
        assert_eq!(*state.borrow(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn client_that_stops_reading_is_still_evicted() {
        let hub = Arc::new(BroadcastHub::new(4));
        // room for the connected frame only, and nobody reads it
        let (tx, _rx) = mpsc::channel(1);
        let connection = SubscriberConnection::new(Arc::clone(&hub), hub.register(), tx, settings(15, 30));
        let task = tokio::spawn(connection.run());
        sleep(Duration::from_millis(1)).await;

        // the task takes this one and blocks writing it
        hub.publish(snapshot(3, 1), 1);
        sleep(Duration::from_millis(1)).await;

        let evicted: usize = (2..=20).map(|count| hub.publish(snapshot(3, count), count).evicted).sum();
        assert_eq!(evicted, 1);

        let reason = tokio::time::timeout(Duration::from_secs(3600), task)
            .await
            .expect("connection stuck on a full transport")
            .unwrap();
        assert_eq!(reason, CloseReason::Evicted);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_a_blocked_write() {
        let hub = Arc::new(BroadcastHub::new(4));
        let (tx, _rx) = mpsc::channel(1);
        let connection = SubscriberConnection::new(Arc::clone(&hub), hub.register(), tx, settings(15, 30));
        let task = tokio::spawn(connection.run());
        sleep(Duration::from_millis(1)).await;

        hub.publish(snapshot(3, 1), 1);
        sleep(Duration::from_millis(1)).await;
        hub.close();

        assert_eq!(task.await.unwrap(), CloseReason::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn client_gone_during_a_pending_write_is_a_write_failure() {
        let hub = Arc::new(BroadcastHub::new(8));
        let (tx, rx) = mpsc::channel(1);
        let connection = SubscriberConnection::new(Arc::clone(&hub), hub.register(), tx, settings(15, 30));
        let task = tokio::spawn(connection.run());
        sleep(Duration::from_millis(1)).await;

        hub.publish(snapshot(5, 1), 1);
        sleep(Duration::from_millis(1)).await;
        drop(rx);

        assert_eq!(task.await.unwrap(), CloseReason::WriteFailed);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connected_frame_closes_as_client_gone() {
        let hub = Arc::new(BroadcastHub::new(8));
        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let connection = SubscriberConnection::new(Arc::clone(&hub), hub.register(), tx, settings(15, 30));
        let mut state = connection.watch_state();

        assert_eq!(connection.run().await, CloseReason::ClientGone);
        assert_eq!(*state.borrow_and_update(), ConnectionState::Closed);
        assert_eq!(hub.subscriber_count(), 0);
    }
}
