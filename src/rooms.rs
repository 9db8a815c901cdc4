use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AppResult;

/// Boundary to the external conversation/membership store.
///
/// The gateway treats membership checks as mandatory: `join:conversation` is
/// authorized against this directory, never stubbed. Production deployments
/// implement it over the relational store; the in-memory implementation backs
/// tests and single-instance development.
#[async_trait]
pub trait ConversationDirectory: Send + Sync {
    async fn is_member(&self, user_id: Uuid, conversation_id: &str) -> AppResult<bool>;

    /// Resolves the conversation a message belongs to, for routing reaction
    /// and read-receipt events.
    async fn conversation_for_message(&self, message_id: &str) -> AppResult<Option<String>>;

    async fn display_name(&self, user_id: Uuid) -> Option<String>;
}

#[derive(Default)]
pub struct InMemoryConversationDirectory {
    members: RwLock<HashMap<String, HashSet<Uuid>>>,
    messages: RwLock<HashMap<String, String>>,
    names: RwLock<HashMap<Uuid, String>>,
}

impl InMemoryConversationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_member(&self, conversation_id: &str, user_id: Uuid) {
        self.members
            .write()
            .await
            .entry(conversation_id.to_string())
            .or_default()
            .insert(user_id);
    }

    pub async fn set_display_name(&self, user_id: Uuid, name: &str) {
        self.names.write().await.insert(user_id, name.to_string());
    }

    pub async fn index_message(&self, message_id: &str, conversation_id: &str) {
        self.messages
            .write()
            .await
            .insert(message_id.to_string(), conversation_id.to_string());
    }
}

#[async_trait]
impl ConversationDirectory for InMemoryConversationDirectory {
    async fn is_member(&self, user_id: Uuid, conversation_id: &str) -> AppResult<bool> {
        Ok(self
            .members
            .read()
            .await
            .get(conversation_id)
            .map(|set| set.contains(&user_id))
            .unwrap_or(false))
    }

    async fn conversation_for_message(&self, message_id: &str) -> AppResult<Option<String>> {
        Ok(self.messages.read().await.get(message_id).cloned())
    }

    async fn display_name(&self, user_id: Uuid) -> Option<String> {
        self.names.read().await.get(&user_id).cloned()
    }
}
