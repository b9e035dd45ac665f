//! SQLite-backed conversation store with a hot cache in front.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tracing::{debug, instrument};

use crate::cache::{CacheConfig, CacheStats, HotCache};
use crate::conversation::{Conversation, WorkflowState};
use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::store::{ConversationStore, ConversationSummary};

/// Conversations stored as JSON documents, one row each.
#[derive(Clone)]
pub struct SqliteConversationStore {
    db: Database,
    cache: HotCache<String, Conversation>,
}

impl SqliteConversationStore {
    /// Wrap a migrated database.
    pub fn new(db: Database, cache: CacheConfig) -> Self {
        Self {
            db,
            cache: HotCache::new("conversations", cache),
        }
    }

    /// Open the file at `path`, migrating it if needed.
    pub async fn open(
        path: impl AsRef<std::path::Path> + Send + 'static,
        cache: CacheConfig,
    ) -> StoreResult<Self> {
        let db = Database::open_and_migrate(path).await?;
        Ok(Self::new(db, cache))
    }

    /// Migrated in-memory store.
    pub async fn in_memory() -> StoreResult<Self> {
        let db = Database::open_in_memory()?;
        db.run_migrations().await?;
        Ok(Self::new(db, CacheConfig::default()))
    }

    pub fn cache_stats(&self) -> &CacheStats {
        self.cache.stats()
    }

    async fn load_row(&self, id: String) -> StoreResult<Option<Conversation>> {
        let data: Option<String> = self
            .db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT data FROM conversations WHERE id = ?1",
                        rusqlite::params![id],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        data.map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .transpose()
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    #[instrument(skip(self))]
    async fn load(&self, id: &str) -> StoreResult<Option<Conversation>> {
        let key = id.to_string();
        if let Some(hit) = self.cache.get(&key).await {
            return Ok(Some(hit));
        }
        let loaded = self.load_row(key.clone()).await?;
        if let Some(conv) = &loaded {
            self.cache.insert(key, conv.clone()).await;
        }
        debug!(found = loaded.is_some(), "conversation loaded from database");
        Ok(loaded)
    }

    #[instrument(skip(self, conversation), fields(conversation_id = %conversation.id))]
    async fn save(&self, conversation: &Conversation) -> StoreResult<()> {
        let data = serde_json::to_string(conversation)?;
        let id = conversation.id.clone();
        let state = conversation.state.as_str();
        let created = conversation.created_at.timestamp_millis();
        let updated = conversation.updated_at.timestamp_millis();

        // Drop the cached copy first so a failed write never leaves it stale.
        self.cache.invalidate(&id).await;
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO conversations (id, state, data, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5) \
                     ON CONFLICT(id) DO UPDATE SET \
                        state = excluded.state, \
                        data = excluded.data, \
                        updated_at = excluded.updated_at",
                    rusqlite::params![id, state, data, created, updated],
                )?;
                Ok(())
            })
            .await?;
        self.cache
            .insert(conversation.id.clone(), conversation.clone())
            .await;
        debug!(state = %conversation.state, "conversation saved");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self) -> StoreResult<Vec<ConversationSummary>> {
        let rows: Vec<(String, String, i64)> = self
            .db
            .execute(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, state, updated_at FROM conversations \
                     ORDER BY updated_at DESC, id ASC",
                )?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(id, state, updated)| -> StoreResult<ConversationSummary> {
                let state: WorkflowState =
                    serde_json::from_value(serde_json::Value::String(state))?;
                Ok(ConversationSummary {
                    id,
                    state,
                    updated_at: DateTime::<Utc>::from_timestamp_millis(updated)
                        .unwrap_or_default(),
                })
            })
            .collect()
    }
}
