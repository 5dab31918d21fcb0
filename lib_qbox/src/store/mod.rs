//! # Reaction Storage
//!
//! The relational store owns questions; this crate only needs a transactional
//! read-modify-write of one question's reaction document. `ReactionStore` is
//! that seam.

use std::future::Future;

use thiserror::Error;

use crate::reactions::model::{QuestionId, ReactionSet};

/// In-process store used for development and tests.
pub mod memory;
/// PostgreSQL store backed by a deadpool connection pool.
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryReactionStore;

/// Storage failures. Anything other than `NotFound` aborts the transaction.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("question {0} not found")]
    NotFound(QuestionId),

    #[error("stored reaction document is malformed: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Durable per-question reaction sets.
pub trait ReactionStore: Send + Sync + 'static {
    /// Loads the question's set, hands it to `apply`, and commits the result
    /// in a single transaction. Returns the committed set, stamped with a
    /// revision higher than any earlier commit of the same question.
    ///
    /// Nothing is written unless the whole sequence succeeds.
    fn update<F>(
        &self,
        question_id: QuestionId,
        apply: F,
    ) -> impl Future<Output = Result<ReactionSet, StoreError>> + Send
    where
        F: FnOnce(&mut ReactionSet) + Send;

    /// Reads the current set without modifying it.
    fn load(
        &self,
        question_id: QuestionId,
    ) -> impl Future<Output = Result<ReactionSet, StoreError>> + Send;
}
