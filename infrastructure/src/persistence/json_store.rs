//! Single-file JSON conversation store.
//!
//! The whole store is one document, `{"version": N, "conversations": [...]}`.
//! It is read once (migrating legacy shapes), cached, and rewritten on every
//! save through a temp file and a rename so a crash never leaves a torn file.

use super::migration::{CURRENT_VERSION, migrate};
use async_trait::async_trait;
use roundtable_application::ports::conversation_store::{
    ConversationStore, ConversationSummary, StoreError,
};
use roundtable_domain::Conversation;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    #[serde(default)]
    conversations: Vec<Conversation>,
}

pub struct JsonConversationStore {
    path: PathBuf,
    /// `None` until first access. Holding the lock serializes writers.
    state: Mutex<Option<StoreDocument>>,
}

impl JsonConversationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<StoreDocument, StoreError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No conversation store at {}", self.path.display());
                return Ok(StoreDocument {
                    version: CURRENT_VERSION,
                    conversations: Vec::new(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let mut value: serde_json::Value = serde_json::from_slice(&raw)
            .map_err(|e| StoreError::Serialization(format!("{}: {}", self.path.display(), e)))?;
        let migrated = migrate(&mut value)?;
        let document: StoreDocument = serde_json::from_value(value)
            .map_err(|e| StoreError::Serialization(format!("{}: {}", self.path.display(), e)))?;
        info!(
            "Loaded {} conversations from {}{}",
            document.conversations.len(),
            self.path.display(),
            if migrated > 0 { " (migrated)" } else { "" }
        );
        Ok(document)
    }

    async fn write_document(&self, document: &StoreDocument) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = serde_json::to_vec_pretty(document)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "conversations.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Run `f` over the cached document, loading it first if needed.
    async fn with_document<T>(
        &self,
        f: impl FnOnce(&mut StoreDocument) -> T,
    ) -> Result<T, StoreError> {
        let mut state = self.state.lock().await;
        if state.is_none() {
            *state = Some(self.read_document().await?);
        }
        match state.as_mut() {
            Some(document) => Ok(f(document)),
            None => Err(StoreError::Serialization("store not loaded".to_string())),
        }
    }
}

#[async_trait]
impl ConversationStore for JsonConversationStore {
    async fn load(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        self.with_document(|document| {
            document
                .conversations
                .iter()
                .find(|c| c.id == id)
                .cloned()
        })
        .await
    }

    async fn save(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.is_none() {
            *state = Some(self.read_document().await?);
        }
        let Some(document) = state.as_mut() else {
            return Err(StoreError::Serialization("store not loaded".to_string()));
        };

        match document
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation.id)
        {
            Some(existing) => *existing = conversation.clone(),
            None => document.conversations.push(conversation.clone()),
        }
        document.version = CURRENT_VERSION;

        // Lock stays held across the write so saves land in order.
        self.write_document(document).await
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>, StoreError> {
        self.with_document(|document| {
            let mut summaries: Vec<ConversationSummary> = document
                .conversations
                .iter()
                .map(ConversationSummary::from)
                .collect();
            summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            summaries
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    fn conversation(title: &str, age_minutes: i64) -> Conversation {
        let mut conversation = Conversation::new();
        conversation.title = title.to_string();
        conversation.updated_at = Utc::now() - Duration::minutes(age_minutes);
        conversation
    }

    #[tokio::test]
    async fn test_save_and_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("conversations.json");
        let original = conversation("Ownership", 0);

        let store = JsonConversationStore::new(&path);
        store.save(&original).await.unwrap();
        assert!(path.exists());
        assert!(!store.tmp_path().exists());

        let reopened = JsonConversationStore::new(&path);
        assert_eq!(reopened.load(&original.id).await.unwrap(), Some(original));
        assert!(reopened.load("missing").await.unwrap().is_none());

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], CURRENT_VERSION);
    }

    #[tokio::test]
    async fn test_save_replaces_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonConversationStore::new(dir.path().join("c.json"));
        let mut conversation = conversation("First", 0);
        store.save(&conversation).await.unwrap();
        conversation.title = "Renamed".into();
        store.save(&conversation).await.unwrap();

        let listing = store.list().await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].title, "Renamed");
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonConversationStore::new(dir.path().join("c.json"));
        store.save(&conversation("old", 60)).await.unwrap();
        store.save(&conversation("new", 1)).await.unwrap();
        store.save(&conversation("middle", 30)).await.unwrap();

        let titles: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.title)
            .collect();
        assert_eq!(titles, vec!["new", "middle", "old"]);
    }

    #[tokio::test]
    async fn test_concurrent_saves_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        let store = Arc::new(JsonConversationStore::new(&path));

        let mut handles = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.save(&conversation(&format!("c{i}"), i)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let reopened = JsonConversationStore::new(&path);
        assert_eq!(reopened.list().await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_legacy_file_is_migrated_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        std::fs::write(
            &path,
            r#"[{"id":"c1","title":"Old","createdAt":"2024-05-01T10:00:00Z",
                "turns":[{"userPrompt":"Why?","streams":[{"model":"a","content":"Because.","status":"complete"}]}]}]"#,
        )
        .unwrap();

        let store = JsonConversationStore::new(&path);
        let conversation = store.load("c1").await.unwrap().unwrap();
        assert_eq!(conversation.updated_at, conversation.created_at);
        assert_eq!(conversation.turns[0].rounds.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error_and_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonConversationStore::new(&path);
        assert!(matches!(
            store.list().await,
            Err(StoreError::Serialization(_))
        ));
        assert!(store.save(&Conversation::new()).await.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }
}
