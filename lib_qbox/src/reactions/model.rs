//! # Reaction Aggregates
//!
//! A question's reactions are stored as one ordered list of `(symbol, count)`
//! pairs. Symbols keep the order in which they were first used, so the list a
//! client renders is stable as counts grow.

use serde::{Deserialize, Serialize};

/// Identifier of a question (the "card" on the public wall).
pub type QuestionId = u64;

/// Commit stamp assigned by the store. Later commits of the same question
/// always carry a higher revision; `0` means the set was never committed.
pub type Revision = u64;

/// One symbol and how many times it has been used on a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionCount {
    /// The reaction symbol, always a whitelisted emoji.
    pub value: String,
    /// Number of reactions recorded with this symbol. Never zero, never decreases.
    pub count: u64,
}

/// The durable aggregate of reactions for one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionSet {
    question_id: QuestionId,
    entries: Vec<ReactionCount>,
    revision: Revision,
}

impl ReactionSet {
    /// An empty set, as held by a question nobody has reacted to yet.
    pub fn new(question_id: QuestionId) -> Self {
        Self {
            question_id,
            entries: Vec::new(),
            revision: 0,
        }
    }

    /// Stamps the set with the revision its store committed it under.
    pub fn with_revision(mut self, revision: Revision) -> Self {
        self.revision = revision;
        self
    }

    /// Builds a set from raw entries, merging repeated symbols and dropping
    /// zero counts so the one-entry-per-symbol invariant holds.
    pub fn from_entries(question_id: QuestionId, entries: Vec<ReactionCount>) -> Self {
        let mut set = Self::new(question_id);
        for entry in entries {
            if entry.count == 0 {
                continue;
            }
            match set.entries.iter_mut().find(|e| e.value == entry.value) {
                Some(existing) => existing.count = existing.count.saturating_add(entry.count),
                None => set.entries.push(entry),
            }
        }
        set
    }

    pub fn question_id(&self) -> QuestionId {
        self.question_id
    }

    pub fn entries(&self) -> &[ReactionCount] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Current count for `symbol`, zero when it was never used.
    pub fn count_of(&self, symbol: &str) -> u64 {
        self.entries
            .iter()
            .find(|e| e.value == symbol)
            .map_or(0, |e| e.count)
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|e| e.count).sum()
    }

    /// Records one reaction and returns the new count for `symbol`.
    ///
    /// Existing symbols are incremented in place; a new symbol is appended
    /// with a count of one.
    pub fn increment(&mut self, symbol: &str) -> u64 {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.value == symbol) {
            entry.count = entry.count.saturating_add(1);
            return entry.count;
        }
        self.entries.push(ReactionCount {
            value: symbol.to_string(),
            count: 1,
        });
        1
    }

    /// Decodes the persisted document (a JSON array of `{value, count}`).
    /// An empty or blank document is an empty set.
    pub fn decode_document(question_id: QuestionId, raw: &str) -> Result<Self, serde_json::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::new(question_id));
        }
        let entries: Vec<ReactionCount> = serde_json::from_str(raw)?;
        Ok(Self::from_entries(question_id, entries))
    }

    /// Encodes the set into its persisted document form.
    pub fn encode_document(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.entries)
    }
}

/// Full-state notification of a question's reactions, as carried by `emoji`
/// frames. Serialized as `{"card_id": .., "emojis": [..]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastEvent {
    #[serde(rename = "card_id")]
    pub question_id: QuestionId,
    #[serde(rename = "emojis")]
    pub reactions: Vec<ReactionCount>,
}

impl BroadcastEvent {
    /// Sum of all counts in the snapshot.
    pub fn total(&self) -> u64 {
        self.reactions.iter().map(|r| r.count).sum()
    }
}

impl From<&ReactionSet> for BroadcastEvent {
    fn from(set: &ReactionSet) -> Self {
        Self {
            question_id: set.question_id,
            reactions: set.entries.clone(),
        }
    }
}

impl From<ReactionSet> for BroadcastEvent {
    fn from(set: ReactionSet) -> Self {
        Self {
            question_id: set.question_id,
            reactions: set.entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_appends_then_counts_in_place() {
        let mut set = ReactionSet::new(42);
        assert_eq!(set.increment("👍"), 1);
        assert_eq!(set.increment("👎"), 1);
        assert_eq!(set.increment("👍"), 2);

        let symbols: Vec<&str> = set.entries().iter().map(|e| e.value.as_str()).collect();
        assert_eq!(symbols, vec!["👍", "👎"]);
        assert_eq!(set.count_of("👍"), 2);
        assert_eq!(set.count_of("🌹"), 0);
        assert_eq!(set.total(), 3);
    }

    #[test]
    fn decode_blank_document_is_empty() {
        let set = ReactionSet::decode_document(7, "  ").unwrap();
        assert!(set.is_empty());
        assert_eq!(set.question_id(), 7);
    }

    #[test]
    fn decode_merges_duplicate_symbols_and_drops_zero_counts() {
        let raw = r#"[{"value":"👍","count":2},{"value":"💖","count":0},{"value":"👍","count":3}]"#;
        let set = ReactionSet::decode_document(1, raw).unwrap();
        assert_eq!(set.entries().len(), 1);
        assert_eq!(set.count_of("👍"), 5);
    }

    #[test]
    fn decode_rejects_malformed_document() {
        assert!(ReactionSet::decode_document(1, "{not json").is_err());
    }

    #[test]
    fn broadcast_event_uses_wire_field_names() {
        let mut set = ReactionSet::new(42).with_revision(9);
        set.increment("👍");
        assert_eq!(set.revision(), 9);
        let json = serde_json::to_string(&BroadcastEvent::from(&set)).unwrap();
        assert_eq!(json, r#"{"card_id":42,"emojis":[{"value":"👍","count":1}]}"#);
    }
}
