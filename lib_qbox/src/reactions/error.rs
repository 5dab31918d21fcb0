use thiserror::Error;

use crate::reactions::model::QuestionId;
use crate::store::StoreError;

/// Failures returned synchronously to the client that submitted a reaction.
#[derive(Debug, Error)]
pub enum ReactionError {
    #[error("invalid reaction symbol: {0:?}")]
    InvalidReaction(String),

    #[error("question {0} does not exist")]
    NotFound(QuestionId),

    #[error("failed to persist reactions: {0}")]
    Persistence(#[source] StoreError),
}

impl ReactionError {
    /// Domain code reported in the response envelope.
    pub fn code(&self) -> u16 {
        match self {
            ReactionError::InvalidReaction(_) => 400,
            ReactionError::NotFound(_) => 404,
            ReactionError::Persistence(_) => 500,
        }
    }
}

impl From<StoreError> for ReactionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ReactionError::NotFound(id),
            other => ReactionError::Persistence(other),
        }
    }
}
