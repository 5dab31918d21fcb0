//! # Broadcast Hub
//!
//! The `BroadcastHub` is the single point of truth for who is listening. It
//! takes each committed reaction snapshot and copies an `Arc` of it into the
//! private buffer of every live subscriber.
//!
//! ## Core Design Principles:
//!
//! 1.  **Zero-Copy Fan-out**: an event is wrapped in an `Arc` once; every
//!     subscriber buffer receives a pointer to the same allocation.
//!
//! 2.  **Serialized Membership**: register, unregister, publish and close all
//!     run inside one `Mutex`. The lock is held for a scan of non-blocking
//!     `try_send` calls, never across an `.await`.
//!
//! 3.  **Evict, Don't Block**: buffers are bounded. A subscriber whose buffer is
//!     full is removed and its removal token fired; the publisher and every
//!     other subscriber carry on. Events are full snapshots, so a client that
//!     reconnects is consistent again with the next event it sees.
//!
//! 4.  **Per-Question Ordering**: every committed snapshot carries the
//!     revision the store stamped on it. The hub remembers the highest
//!     revision published per question and skips anything at or below it, so
//!     a publisher that lost a race after commit cannot roll clients back.
//!     Only the most recently published questions are remembered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::reactions::model::{BroadcastEvent, QuestionId, Revision};

/// Default capacity of each subscriber buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// Questions whose latest published revision is remembered. Past this the
/// older half is forgotten.
pub const TRACKED_QUESTIONS: usize = 4096;

/// Identifier assigned to a subscriber at registration.
pub type SubscriberId = u64;

/// Hub-side record of one subscriber: the sending half of its buffer and the
/// token fired when the hub drops it.
struct Subscriber {
    sender: mpsc::Sender<Arc<BroadcastEvent>>,
    removal: CancellationToken,
}

#[derive(Default)]
struct Registry {
    subscribers: HashMap<SubscriberId, Subscriber>,
    latest_revisions: HashMap<QuestionId, Revision>,
    closed: bool,
}

impl Registry {
    /// Records `revision` as the newest published for `question_id`. Returns
    /// `false` when something at least as new was already published.
    fn advance(&mut self, question_id: QuestionId, revision: Revision) -> bool {
        if revision == 0 {
            return true;
        }
        if self.latest_revisions.get(&question_id).is_some_and(|&seen| seen >= revision) {
            return false;
        }
        self.latest_revisions.insert(question_id, revision);
        if self.latest_revisions.len() > TRACKED_QUESTIONS {
            self.forget_oldest();
        }
        true
    }

    /// Keeps the newest half of the tracked questions by revision.
    fn forget_oldest(&mut self) {
        let mut revisions: Vec<Revision> = self.latest_revisions.values().copied().collect();
        let keep = TRACKED_QUESTIONS / 2;
        let cut = revisions.len() - keep;
        let (_, &mut cutoff, _) = revisions.select_nth_unstable(cut);
        self.latest_revisions.retain(|_, revision| *revision >= cutoff);
        debug!(tracked = self.latest_revisions.len(), "forgot oldest question revisions");
    }
}

/// Outcome of a single `publish` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers whose buffer accepted the event.
    pub delivered: usize,
    /// Subscribers removed because their buffer was full.
    pub evicted: usize,
    /// `true` when the event was older than what was already published for
    /// its question and was not delivered at all.
    pub superseded: bool,
}

/// Receiving side of a registration, owned by the subscriber's connection task.
pub struct SubscriberHandle {
    id: SubscriberId,
    receiver: mpsc::Receiver<Arc<BroadcastEvent>>,
    removal: CancellationToken,
}

impl SubscriberHandle {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next buffered event in publish order. `None` once the hub has dropped
    /// this subscriber and the buffer is drained.
    pub async fn recv(&mut self) -> Option<Arc<BroadcastEvent>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Arc<BroadcastEvent>, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Token fired when the hub removes this subscriber (unregister, eviction
    /// or shutdown).
    pub fn removal(&self) -> CancellationToken {
        self.removal.clone()
    }

    pub fn is_removed(&self) -> bool {
        self.removal.is_cancelled()
    }
}

/// Fan-out hub for reaction snapshots.
pub struct BroadcastHub {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    capacity: usize,
}

impl BroadcastHub {
    /// Creates a hub whose subscriber buffers hold `capacity` events each.
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// # Register
    ///
    /// Creates a bounded buffer for a new subscriber and adds it to the live
    /// set. Every later `publish` tries to deliver into it.
    ///
    /// Never fails. After `close` the returned handle is already removed, so
    /// its connection ends straight away.
    pub fn register(&self) -> SubscriberHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.capacity);
        let removal = CancellationToken::new();

        let mut registry = self.registry();
        if registry.closed {
            removal.cancel();
            debug!(subscriber = id, "hub closed, handing out a removed subscriber");
        } else {
            registry.subscribers.insert(
                id,
                Subscriber {
                    sender,
                    removal: removal.clone(),
                },
            );
            info!(subscriber = id, total = registry.subscribers.len(), "subscriber registered");
        }

        SubscriberHandle {
            id,
            receiver,
            removal,
        }
    }

    /// # Unregister
    ///
    /// Removes a subscriber and closes its buffer. Idempotent: returns `false`
    /// when the subscriber was already gone.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let mut registry = self.registry();
        match registry.subscribers.remove(&id) {
            Some(subscriber) => {
                subscriber.removal.cancel();
                info!(subscriber = id, total = registry.subscribers.len(), "subscriber unregistered");
                true
            }
            None => false,
        }
    }

    /// # Publish
    ///
    /// Copies the event into every live buffer without waiting.
    ///
    /// `revision` is the store's commit stamp for the snapshot. Revision 0
    /// means unordered and is always delivered.
    ///
    /// ## Logic:
    /// 1.  Skip the event if its question already has a snapshot with an equal
    ///     or higher revision on the wire.
    /// 2.  `try_send` an `Arc` clone into each buffer.
    /// 3.  A full buffer evicts its subscriber; a closed one is pruned.
    pub fn publish(&self, event: BroadcastEvent, revision: Revision) -> PublishReport {
        let mut report = PublishReport::default();
        let question_id = event.question_id;

        let mut registry = self.registry();
        if registry.closed {
            return report;
        }

        if !registry.advance(question_id, revision) {
            debug!(question_id, revision, "stale snapshot skipped");
            report.superseded = true;
            return report;
        }

        let event = Arc::new(event);
        registry.subscribers.retain(|id, subscriber| {
            match subscriber.sender.try_send(Arc::clone(&event)) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = *id, "subscriber buffer full, evicting slow consumer");
                    subscriber.removal.cancel();
                    report.evicted += 1;
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = *id, "subscriber buffer closed, pruning");
                    subscriber.removal.cancel();
                    false
                }
            }
        });

        report
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry().subscribers.len()
    }

    /// Drops every subscriber and refuses further delivery. Called once at
    /// process shutdown.
    pub fn close(&self) {
        let mut registry = self.registry();
        if registry.closed {
            return;
        }
        registry.closed = true;
        let count = registry.subscribers.len();
        for (_, subscriber) in registry.subscribers.drain() {
            subscriber.removal.cancel();
        }
        info!(subscribers = count, "broadcast hub closed");
    }

    pub fn is_closed(&self) -> bool {
        self.registry().closed
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}
