//! Recall memory for `long_term_memory` agents
//!
//! Memories are partitioned by namespace and ranked by cosine similarity to a
//! query embedding. Records live in a [`RecallStore`] whose backend follows
//! the checkpointer's connection string ([`create_recall_store`]):
//!
//! | scheme | backend |
//! |---|---|
//! | `memory://` | [`MemoryRecallStore`] |
//! | `file://<dir>` | [`FileRecallStore`] under `<dir>/<db_name>/<collection_name>_recall` |
//! | `sqlite://<path>` | `SqliteRecallStore`, table `<collection_name>_recall` |
//! | `redis://<host>` | `RedisRecallStore`, lists under `<db_name>:<collection_name>_recall` |

pub mod file;
#[cfg(feature = "checkpointer-redis")]
pub mod redis;
#[cfg(feature = "checkpointer-sqlite")]
pub mod sqlite;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::checkpoint::CheckpointerConfig;
use crate::error::StorageError;
use crate::state::{Message, Role};

pub use file::FileRecallStore;
#[cfg(feature = "checkpointer-redis")]
pub use self::redis::RedisRecallStore;
#[cfg(feature = "checkpointer-sqlite")]
pub use sqlite::SqliteRecallStore;

/// Character budget for the conversation text used as a recall query.
pub const RECALL_QUERY_BUDGET: usize = 8192;

/// Suffix appended to the checkpoint collection name for recall records.
const RECALL_SUFFIX: &str = "_recall";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: Uuid,
    pub text: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// Append-only record storage, partitioned by namespace.
#[async_trait]
pub trait RecallStore: Send + Sync {
    async fn append(&self, namespace: &str, record: &MemoryRecord) -> Result<(), StorageError>;

    /// Every record of `namespace`, oldest first.
    async fn records(&self, namespace: &str) -> Result<Vec<MemoryRecord>, StorageError>;

    /// Short backend label used in logs.
    fn backend(&self) -> &'static str;
}

/// Process-local store. Records are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryRecallStore {
    namespaces: RwLock<HashMap<String, Vec<MemoryRecord>>>,
}

impl MemoryRecallStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecallStore for MemoryRecallStore {
    async fn append(&self, namespace: &str, record: &MemoryRecord) -> Result<(), StorageError> {
        self.namespaces
            .write()
            .await
            .entry(namespace.to_string())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn records(&self, namespace: &str) -> Result<Vec<MemoryRecord>, StorageError> {
        Ok(self
            .namespaces
            .read()
            .await
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Vector search over a [`RecallStore`].
pub struct RecallMemory {
    store: Arc<dyn RecallStore>,
}

impl std::fmt::Debug for RecallMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecallMemory")
            .field("store", &self.store.backend())
            .finish()
    }
}

impl Default for RecallMemory {
    fn default() -> Self {
        Self::with_store(Arc::new(MemoryRecallStore::new()))
    }
}

impl RecallMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: Arc<dyn RecallStore>) -> Self {
        Self { store }
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub async fn insert(
        &self,
        namespace: &str,
        text: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Result<Uuid, StorageError> {
        let record = MemoryRecord {
            id: Uuid::new_v4(),
            text: text.into(),
            embedding,
            created_at: Utc::now(),
        };
        self.store.append(namespace, &record).await?;
        tracing::debug!(
            namespace = %namespace,
            memory_id = %record.id,
            backend = self.store.backend(),
            "Recall memory stored"
        );
        Ok(record.id)
    }

    /// Texts of the `limit` memories most similar to `query`, best first.
    pub async fn search(
        &self,
        namespace: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<String>, StorageError> {
        let records = self.store.records(namespace).await?;
        let mut scored: Vec<(f32, MemoryRecord)> = records
            .into_iter()
            .map(|r| (cosine_similarity(query, &r.embedding), r))
            .collect();
        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.1.created_at.cmp(&b.1.created_at))
        });
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, r)| r.text)
            .collect())
    }

    pub async fn len(&self, namespace: &str) -> Result<usize, StorageError> {
        Ok(self.store.records(namespace).await?.len())
    }
}

/// Builds the recall store that sits next to the checkpoints described by
/// `config`. Like [`crate::checkpoint::create_checkpointer`], nothing is
/// opened here.
pub fn create_recall_store(
    config: &CheckpointerConfig,
) -> Result<Arc<dyn RecallStore>, StorageError> {
    let conn = config.connection_str.trim();
    let unsupported = || StorageError::UnsupportedBackend {
        connection_str: conn.to_string(),
    };
    let (scheme, rest) = conn.split_once("://").ok_or_else(unsupported)?;
    let collection = format!("{}{RECALL_SUFFIX}", config.collection_name);

    let store: Arc<dyn RecallStore> = match scheme.to_ascii_lowercase().as_str() {
        "memory" => Arc::new(MemoryRecallStore::new()),
        "file" => Arc::new(FileRecallStore::new(
            PathBuf::from(rest).join(&config.db_name).join(collection),
        )),
        #[cfg(feature = "checkpointer-sqlite")]
        "sqlite" => Arc::new(SqliteRecallStore::new(rest, &collection)?),
        #[cfg(feature = "checkpointer-redis")]
        "redis" | "rediss" => Arc::new(RedisRecallStore::new(
            conn,
            format!("{}:{collection}", config.db_name),
        )?),
        _ => return Err(unsupported()),
    };

    tracing::info!(
        name = %config.name,
        backend = store.backend(),
        "Recall store configured"
    );
    Ok(store)
}

/// Zero when either vector is empty, all zeros, or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// The most recent part of the conversation that fits in
/// [`RECALL_QUERY_BUDGET`] characters, oldest line first.
pub fn recall_query(messages: &[Message]) -> String {
    let mut lines = Vec::new();
    let mut used = 0;
    for message in messages.iter().rev() {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        let line = format!("{role}: {}", message.content);
        let len = line.chars().count();
        if used + len > RECALL_QUERY_BUDGET {
            if lines.is_empty() {
                // Keep the tail of an oversized latest message.
                let skip = len - RECALL_QUERY_BUDGET;
                lines.push(line.chars().skip(skip).collect());
            }
            break;
        }
        used += len + 1;
        lines.push(line);
    }
    lines.reverse();
    lines.join("\n")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Behavior every recall backend must share.
    pub(crate) async fn exercise_store(memory: &RecallMemory) {
        memory.insert("alice", "likes tea", vec![1.0, 0.0]).await.unwrap();
        memory.insert("alice", "lives in Lyon", vec![0.0, 1.0]).await.unwrap();
        memory.insert("bob", "likes coffee", vec![1.0, 0.0]).await.unwrap();

        let hits = memory.search("alice", &[0.9, 0.1], 1).await.unwrap();
        assert_eq!(hits, vec!["likes tea"]);
        let all = memory.search("alice", &[0.1, 0.9], 5).await.unwrap();
        assert_eq!(all, vec!["lives in Lyon", "likes tea"]);
        assert!(memory.search("carol", &[1.0, 0.0], 3).await.unwrap().is_empty());
        assert_eq!(memory.len("alice").await.unwrap(), 2);
        assert_eq!(memory.len("bob").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity_within_namespace() {
        let memory = RecallMemory::new();
        assert_eq!(memory.backend(), "memory");
        exercise_store(&memory).await;
    }

    #[tokio::test]
    async fn test_equal_scores_keep_insertion_order() {
        let memory = RecallMemory::new();
        memory.insert("n", "first", vec![1.0]).await.unwrap();
        memory.insert("n", "second", vec![1.0]).await.unwrap();
        assert_eq!(
            memory.search("n", &[1.0], 2).await.unwrap(),
            vec!["first", "second"]
        );
    }

    #[test]
    fn test_recall_store_follows_checkpointer_scheme() {
        let store = create_recall_store(&CheckpointerConfig::new("memory://")).unwrap();
        assert_eq!(store.backend(), "memory");

        let dir = tempfile::tempdir().unwrap();
        let conn = format!("file://{}", dir.path().display());
        let store = create_recall_store(&CheckpointerConfig::new(conn)).unwrap();
        assert_eq!(store.backend(), "file");

        let err = create_recall_store(&CheckpointerConfig::new("mongodb://db")).err().unwrap();
        assert!(matches!(err, StorageError::UnsupportedBackend { .. }));
    }

    #[test]
    fn test_cosine_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_recall_query_keeps_the_most_recent_messages() {
        let long = "x".repeat(RECALL_QUERY_BUDGET);
        let messages = vec![Message::user(long), Message::assistant("ok"), Message::user("hi")];
        let query = recall_query(&messages);
        assert_eq!(query, "assistant: ok\nuser: hi");
    }

    #[test]
    fn test_recall_query_truncates_an_oversized_latest_message() {
        let messages = vec![Message::user("y".repeat(RECALL_QUERY_BUDGET * 2))];
        assert_eq!(recall_query(&messages).chars().count(), RECALL_QUERY_BUDGET);
    }
}
