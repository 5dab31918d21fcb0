use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::reactions::model::{QuestionId, ReactionSet, Revision};
use crate::store::{ReactionStore, StoreError};

/// Mutex-guarded map of question id to reaction set.
///
/// A question has to be inserted before it can take reactions, the same way a
/// row must exist in the relational store.
///
/// Revisions come from one store-wide counter, so a question that is removed
/// and created again keeps getting higher revisions than before.
#[derive(Debug, Default)]
pub struct MemoryReactionStore {
    questions: Mutex<HashMap<QuestionId, ReactionSet>>,
    revision: AtomicU64,
}

impl MemoryReactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with empty sets for the given questions.
    pub fn with_questions<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = QuestionId>,
    {
        let store = Self::new();
        {
            let mut questions = store.lock();
            for id in ids {
                questions.insert(id, ReactionSet::new(id));
            }
        }
        store
    }

    /// Creates a question with no reactions. Existing questions are untouched.
    pub fn insert_question(&self, question_id: QuestionId) {
        self.lock()
            .entry(question_id)
            .or_insert_with(|| ReactionSet::new(question_id));
    }

    /// Deletes a question together with its reactions.
    pub fn remove_question(&self, question_id: QuestionId) -> bool {
        self.lock().remove(&question_id).is_some()
    }

    pub fn question_count(&self) -> usize {
        self.lock().len()
    }

    /// Only called with the map locked, so revisions follow commit order.
    fn next_revision(&self) -> Revision {
        self.revision.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<QuestionId, ReactionSet>> {
        self.questions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ReactionStore for MemoryReactionStore {
    async fn update<F>(&self, question_id: QuestionId, apply: F) -> Result<ReactionSet, StoreError>
    where
        F: FnOnce(&mut ReactionSet) + Send,
    {
        let mut questions = self.lock();
        let current = questions
            .get_mut(&question_id)
            .ok_or(StoreError::NotFound(question_id))?;

        // The stored set only changes once `apply` has returned.
        let mut next = current.clone();
        apply(&mut next);
        let next = next.with_revision(self.next_revision());
        *current = next.clone();
        Ok(next)
    }

    async fn load(&self, question_id: QuestionId) -> Result<ReactionSet, StoreError> {
        self.lock()
            .get(&question_id)
            .cloned()
            .ok_or(StoreError::NotFound(question_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_commits_and_returns_new_set() {
        let store = MemoryReactionStore::with_questions([42]);
        let set = store
            .update(42, |set| {
                set.increment("👍");
            })
            .await
            .unwrap();
        assert_eq!(set.count_of("👍"), 1);
        assert_eq!(set.revision(), 1);
        assert_eq!(store.load(42).await.unwrap(), set);
    }

    #[tokio::test]
    async fn recreated_question_keeps_advancing_revisions() {
        let store = MemoryReactionStore::with_questions([9]);
        for _ in 0..3 {
            store
                .update(9, |set| {
                    set.increment("👍");
                })
                .await
                .unwrap();
        }
        assert!(store.remove_question(9));
        store.insert_question(9);

        let fresh = store.load(9).await.unwrap();
        assert!(fresh.is_empty());
        assert_eq!(fresh.revision(), 0);

        let set = store
            .update(9, |set| {
                set.increment("💖");
            })
            .await
            .unwrap();
        assert_eq!(set.total(), 1);
        assert_eq!(set.revision(), 4);
    }

    #[tokio::test]
    async fn unknown_question_is_not_found() {
        let store = MemoryReactionStore::new();
        let err = store.update(9, |_| {}).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(9)));
        assert!(matches!(store.load(9).await, Err(StoreError::NotFound(9))));
    }

    #[tokio::test]
    async fn removed_question_loses_its_reactions() {
        let store = MemoryReactionStore::new();
        store.insert_question(3);
        store
            .update(3, |set| {
                set.increment("🌹");
            })
            .await
            .unwrap();
        assert!(store.remove_question(3));
        assert!(!store.remove_question(3));
        assert_eq!(store.question_count(), 0);
    }
}
