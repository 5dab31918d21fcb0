//! # Reaction Producer
//!
//! `ReactionService` is the write path for one reaction: validate the symbol,
//! apply the increment through the store's transaction, then publish the
//! committed snapshot to the hub.
//!
//! Broadcast only ever reflects committed state. A rejected or failed write
//! publishes nothing, and a hub that cannot reach some subscriber never turns
//! a successful write into an error.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::reactions::error::ReactionError;
use crate::reactions::model::{BroadcastEvent, QuestionId, ReactionSet};
use crate::reactions::whitelist::Whitelist;
use crate::realtime::hub::BroadcastHub;
use crate::store::ReactionStore;

pub struct ReactionService<S> {
    store: S,
    hub: Arc<BroadcastHub>,
    whitelist: Whitelist,
}

impl<S: ReactionStore> ReactionService<S> {
    pub fn new(store: S, hub: Arc<BroadcastHub>, whitelist: Whitelist) -> Self {
        Self {
            store,
            hub,
            whitelist,
        }
    }

    /// Records one `symbol` reaction on `question_id` and returns the
    /// committed set.
    pub async fn react(&self, question_id: QuestionId, symbol: &str) -> Result<ReactionSet, ReactionError> {
        if !self.whitelist.contains(symbol) {
            debug!(question_id, symbol, "rejected reaction outside whitelist");
            return Err(ReactionError::InvalidReaction(symbol.to_string()));
        }

        let owned = symbol.to_string();
        let set = self
            .store
            .update(question_id, move |set| {
                set.increment(&owned);
            })
            .await
            .map_err(|err| {
                let err = ReactionError::from(err);
                if let ReactionError::Persistence(source) = &err {
                    warn!(question_id, symbol, error = %source, "reaction not persisted");
                }
                err
            })?;

        let report = self.hub.publish(BroadcastEvent::from(&set), set.revision());
        info!(
            question_id,
            symbol,
            count = set.count_of(symbol),
            revision = set.revision(),
            delivered = report.delivered,
            evicted = report.evicted,
            superseded = report.superseded,
            "reaction recorded"
        );
        Ok(set)
    }

    /// Current reactions of a question, straight from the store.
    pub async fn snapshot(&self, question_id: QuestionId) -> Result<ReactionSet, ReactionError> {
        Ok(self.store.load(question_id).await?)
    }

    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
