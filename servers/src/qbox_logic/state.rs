use crate::qbox_logic::config::Config;
use anyhow::{Context, Result};
use lib_qbox::{
    BroadcastHub, MemoryReactionStore, PgReactionStore, QuestionId, ReactionService, ReactionSet,
    ReactionStore, StoreError, StreamSettings, Whitelist,
};
use std::sync::Arc;

/// The store selected at startup.
pub enum BackendStore {
    Memory(MemoryReactionStore),
    Postgres(PgReactionStore),
}

impl BackendStore {
    pub fn kind(&self) -> &'static str {
        match self {
            BackendStore::Memory(_) => "memory",
            BackendStore::Postgres(_) => "postgres",
        }
    }

    /// Round-trips to the database, if there is one.
    pub async fn check(&self) -> Result<(), StoreError> {
        match self {
            BackendStore::Memory(_) => Ok(()),
            BackendStore::Postgres(store) => store.ping().await,
        }
    }
}

impl ReactionStore for BackendStore {
    async fn update<F>(&self, question_id: QuestionId, apply: F) -> Result<ReactionSet, StoreError>
    where
        F: FnOnce(&mut ReactionSet) + Send,
    {
        match self {
            BackendStore::Memory(store) => store.update(question_id, apply).await,
            BackendStore::Postgres(store) => store.update(question_id, apply).await,
        }
    }

    async fn load(&self, question_id: QuestionId) -> Result<ReactionSet, StoreError> {
        match self {
            BackendStore::Memory(store) => store.load(question_id).await,
            BackendStore::Postgres(store) => store.load(question_id).await,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<BroadcastHub>,
    pub reactions: Arc<ReactionService<BackendStore>>,
    pub stream: StreamSettings,
}

impl AppState {
    pub fn new(store: BackendStore, whitelist: Whitelist, buffer: usize, stream: StreamSettings) -> Self {
        let hub = Arc::new(BroadcastHub::new(buffer));
        let reactions = Arc::new(ReactionService::new(store, Arc::clone(&hub), whitelist));
        Self {
            hub,
            reactions,
            stream,
        }
    }

    /// Wires the hub, store and whitelist described by `config`.
    ///
    /// Without a database URL, questions `1..=seedQuestions` are created in
    /// memory.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = match config.database_url.as_deref() {
            Some(url) => {
                let store = PgReactionStore::connect(url, config.db_pool_size())
                    .context("failed to create PostgreSQL pool")?;
                store.ensure_schema().await.context("failed to prepare questions table")?;
                tracing::info!(pool = config.db_pool_size(), "Using PostgreSQL reaction store");
                BackendStore::Postgres(store)
            }
            None => {
                let seeded = config.seed_questions();
                tracing::info!(questions = seeded, "Using in-memory reaction store");
                BackendStore::Memory(MemoryReactionStore::with_questions(1..=seeded))
            }
        };

        let whitelist = match &config.reactions {
            Some(symbols) => Whitelist::new(symbols),
            None => Whitelist::default(),
        };
        if whitelist.is_empty() {
            anyhow::bail!("reaction whitelist is empty");
        }

        Ok(Self::new(
            store,
            whitelist,
            config.subscriber_buffer(),
            config.stream_settings(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_is_seeded_from_config() {
        let config = Config {
            seed_questions: Some(3),
            reactions: Some(vec!["👍".to_string(), " 🥳 ".to_string()]),
            subscriber_buffer: Some(2),
            ..Default::default()
        };
        let state = AppState::from_config(&config).await.unwrap();

        assert_eq!(state.reactions.store().kind(), "memory");
        assert_eq!(state.hub.capacity(), 2);
        assert!(state.reactions.whitelist().contains("🥳"));
        assert!(!state.reactions.whitelist().contains("👎"));

        assert_eq!(state.reactions.react(3, "👍").await.unwrap().count_of("👍"), 1);
        assert!(state.reactions.react(4, "👍").await.is_err());
    }

    #[tokio::test]
    async fn empty_whitelist_is_rejected() {
        let config = Config {
            reactions: Some(vec![" ".to_string()]),
            ..Default::default()
        };
        assert!(AppState::from_config(&config).await.is_err());
    }
}
