//! Conversation persistence port
//!
//! The orchestrator saves the active conversation at every recoverable
//! transition (stream, round or synthesis settling), never per delta.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roundtable_domain::Conversation;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unsupported store version {found} (this build reads up to {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
}

/// One line of a conversation listing
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
    pub turn_count: usize,
}

impl From<&Conversation> for ConversationSummary {
    fn from(conversation: &Conversation) -> Self {
        Self {
            id: conversation.id.clone(),
            title: conversation.title.clone(),
            updated_at: conversation.updated_at,
            turn_count: conversation.turns.len(),
        }
    }
}

/// Loads and saves versioned conversation aggregates
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Conversation>, StoreError>;

    /// Insert or replace by id
    async fn save(&self, conversation: &Conversation) -> Result<(), StoreError>;

    /// Most recently updated first
    async fn list(&self) -> Result<Vec<ConversationSummary>, StoreError>;
}

/// Process-local store for tests and one-off runs.
#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: Mutex<HashMap<String, Conversation>>,
    saves: Mutex<usize>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save` calls
    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|n| *n).unwrap_or(0)
    }
}

fn poisoned() -> StoreError {
    StoreError::Io(std::io::Error::other("store lock poisoned"))
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        let conversations = self.conversations.lock().map_err(|_| poisoned())?;
        Ok(conversations.get(id).cloned())
    }

    async fn save(&self, conversation: &Conversation) -> Result<(), StoreError> {
        self.conversations
            .lock()
            .map_err(|_| poisoned())?
            .insert(conversation.id.clone(), conversation.clone());
        *self.saves.lock().map_err(|_| poisoned())? += 1;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>, StoreError> {
        let conversations = self.conversations.lock().map_err(|_| poisoned())?;
        let mut summaries: Vec<ConversationSummary> =
            conversations.values().map(ConversationSummary::from).collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}
