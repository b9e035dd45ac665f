//! The persistence seam used by the orchestrator.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::conversation::{Conversation, WorkflowState};
use crate::error::StoreResult;

/// Short listing entry for a stored conversation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub state: WorkflowState,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<&Conversation> for ConversationSummary {
    fn from(conv: &Conversation) -> Self {
        Self {
            id: conv.id.clone(),
            state: conv.state,
            updated_at: conv.updated_at,
        }
    }
}

/// Loads and saves whole conversations.
///
/// Callers serialize access per conversation; implementations do not retry.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load(&self, id: &str) -> StoreResult<Option<Conversation>>;

    async fn save(&self, conversation: &Conversation) -> StoreResult<()>;

    /// Stored conversations, most recently updated first.
    async fn list(&self) -> StoreResult<Vec<ConversationSummary>>;
}

/// Process-local store; contents are lost on exit.
#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl InMemoryConversationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load(&self, id: &str) -> StoreResult<Option<Conversation>> {
        Ok(self.conversations.read().await.get(id).cloned())
    }

    async fn save(&self, conversation: &Conversation) -> StoreResult<()> {
        self.conversations
            .write()
            .await
            .insert(conversation.id.clone(), conversation.clone());
        tracing::trace!(conversation_id = %conversation.id, "conversation saved in memory");
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<ConversationSummary>> {
        let mut all: Vec<ConversationSummary> = self
            .conversations
            .read()
            .await
            .values()
            .map(ConversationSummary::from)
            .collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_missing_is_none() {
        let store = InMemoryConversationStore::new();
        assert!(store.load("nope").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn save_replaces_previous_version() {
        let store = InMemoryConversationStore::new();
        let mut conv = Conversation::new("c1");
        store.save(&conv).await.unwrap();
        conv.advance_to(WorkflowState::BusinessContextGathering);
        store.save(&conv).await.unwrap();

        let loaded = store.load("c1").await.unwrap().unwrap();
        assert_eq!(loaded.state, WorkflowState::BusinessContextGathering);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.list().await.unwrap()[0].id, "c1");
    }
}
