use std::collections::BTreeMap;

use crate::reactions::model::{BroadcastEvent, QuestionId, ReactionCount};

/// Client-side view of the reaction wall.
///
/// Each `emoji` frame carries a full snapshot, so applying an event simply
/// replaces what is held for that question. Seeing the same event twice
/// leaves the board unchanged.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReactionBoard {
    questions: BTreeMap<QuestionId, Vec<ReactionCount>>,
}

impl ReactionBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a snapshot, last write wins. Returns `true` if the view changed.
    pub fn apply(&mut self, event: &BroadcastEvent) -> bool {
        match self.questions.get(&event.question_id) {
            Some(current) if *current == event.reactions => false,
            _ => {
                self.questions
                    .insert(event.question_id, event.reactions.clone());
                true
            }
        }
    }

    pub fn reactions(&self, question_id: QuestionId) -> Option<&[ReactionCount]> {
        self.questions.get(&question_id).map(Vec::as_slice)
    }

    pub fn count_of(&self, question_id: QuestionId, symbol: &str) -> u64 {
        self.reactions(question_id)
            .and_then(|list| list.iter().find(|r| r.value == symbol))
            .map_or(0, |r| r.count)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&QuestionId, &Vec<ReactionCount>)> {
        self.questions.iter()
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}
