//! Checkpoint Store
//!
//! Durable mapping from `thread_id` to the latest [`Checkpoint`] of that thread.
//! Every backend implements the same optimistic-sequence contract:
//!
//! - `put` replaces the whole checkpoint atomically per thread
//! - a `put` whose sequence is not strictly greater than the stored one fails
//!   with [`StorageError::StaleCheckpoint`]
//!
//! Backends are chosen by connection string through [`create_checkpointer`]:
//!
//! | scheme | backend |
//! |---|---|
//! | `memory://` | [`MemoryCheckpointer`] |
//! | `file://<dir>` | [`FileCheckpointer`] |
//! | `sqlite://<path>` | `SqliteCheckpointer` (feature `checkpointer-sqlite`) |
//! | `redis://<host>` | `RedisCheckpointer` (feature `checkpointer-redis`) |

pub mod codec;
pub mod file;
pub mod memory;
#[cfg(feature = "checkpointer-redis")]
pub mod redis;
#[cfg(feature = "checkpointer-sqlite")]
pub mod sqlite;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::state::ThreadState;

pub use file::FileCheckpointer;
pub use memory::MemoryCheckpointer;
#[cfg(feature = "checkpointer-redis")]
pub use self::redis::RedisCheckpointer;
#[cfg(feature = "checkpointer-sqlite")]
pub use sqlite::SqliteCheckpointer;

/// Sequence-numbered snapshot of a thread at a turn boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub state: ThreadState,
}

impl Checkpoint {
    pub fn new(sequence: u64, state: ThreadState) -> Self {
        Self {
            sequence,
            created_at: Utc::now(),
            state,
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.state.thread_id
    }
}

/// Storage contract shared by every backend.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>, StorageError>;

    /// Stores `checkpoint` as the latest for `thread_id`.
    async fn put(&self, thread_id: &str, checkpoint: &Checkpoint) -> Result<(), StorageError>;

    /// Removes the thread's checkpoint. Returns whether one existed.
    async fn delete(&self, thread_id: &str) -> Result<bool, StorageError>;

    async fn list_thread_ids(&self) -> Result<BTreeSet<String>, StorageError>;

    /// Short backend label used in logs.
    fn backend(&self) -> &'static str;
}

/// `checkpointer:` section of the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointerConfig {
    #[serde(default = "default_name")]
    pub name: String,
    pub connection_str: String,
    #[serde(default = "default_db_name")]
    pub db_name: String,
    #[serde(default = "default_collection_name")]
    pub collection_name: String,
}

fn default_name() -> String {
    "default_checkpointer".to_string()
}

fn default_db_name() -> String {
    "langgraph".to_string()
}

fn default_collection_name() -> String {
    "checkpoints".to_string()
}

impl CheckpointerConfig {
    pub fn new(connection_str: impl Into<String>) -> Self {
        Self {
            name: default_name(),
            connection_str: connection_str.into(),
            db_name: default_db_name(),
            collection_name: default_collection_name(),
        }
    }
}

/// Builds the backend selected by `config.connection_str`.
///
/// No connection is opened here; remote backends connect on first use.
pub fn create_checkpointer(
    config: &CheckpointerConfig,
) -> Result<Arc<dyn Checkpointer>, StorageError> {
    let conn = config.connection_str.trim();
    let unsupported = || StorageError::UnsupportedBackend {
        connection_str: conn.to_string(),
    };
    let (scheme, rest) = conn.split_once("://").ok_or_else(unsupported)?;

    let store: Arc<dyn Checkpointer> = match scheme.to_ascii_lowercase().as_str() {
        "memory" => Arc::new(MemoryCheckpointer::new()),
        "file" => {
            let dir = PathBuf::from(rest)
                .join(&config.db_name)
                .join(&config.collection_name);
            Arc::new(FileCheckpointer::new(dir))
        }
        #[cfg(feature = "checkpointer-sqlite")]
        "sqlite" => Arc::new(SqliteCheckpointer::new(rest, &config.collection_name)?),
        #[cfg(feature = "checkpointer-redis")]
        "redis" | "rediss" => Arc::new(RedisCheckpointer::new(
            conn,
            format!("{}:{}", config.db_name, config.collection_name),
        )?),
        _ => return Err(unsupported()),
    };

    tracing::info!(
        name = %config.name,
        backend = store.backend(),
        "Checkpointer configured"
    );
    Ok(store)
}

/// Shared `put` precondition: the checkpoint belongs to `thread_id` and its
/// sequence is strictly newer than what is stored.
pub(crate) fn check_put(
    thread_id: &str,
    checkpoint: &Checkpoint,
    stored: Option<u64>,
) -> Result<(), StorageError> {
    if checkpoint.thread_id() != thread_id {
        return Err(StorageError::ThreadMismatch {
            expected: thread_id.to_string(),
            actual: checkpoint.thread_id().to_string(),
        });
    }
    match stored {
        Some(stored) if checkpoint.sequence <= stored => Err(StorageError::StaleCheckpoint {
            thread_id: thread_id.to_string(),
            stored,
            attempted: checkpoint.sequence,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn checkpoint(thread_id: &str, sequence: u64) -> Checkpoint {
        let mut state = ThreadState::new(thread_id, "generate");
        state.messages.push(crate::state::Message::user(format!("turn {sequence}")));
        Checkpoint::new(sequence, state)
    }

    /// Contract every backend must satisfy.
    pub(crate) async fn exercise_contract(store: &dyn Checkpointer) {
        assert!(store.get("t1").await.unwrap().is_none());

        store.put("t1", &checkpoint("t1", 1)).await.unwrap();
        store.put("t1", &checkpoint("t1", 2)).await.unwrap();
        store.put("t2", &checkpoint("t2", 1)).await.unwrap();
        assert_eq!(store.get("t1").await.unwrap().unwrap().sequence, 2);

        let err = store.put("t1", &checkpoint("t1", 2)).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::StaleCheckpoint { stored: 2, attempted: 2, .. }
        ));
        let err = store.put("t1", &checkpoint("t1", 1)).await.unwrap_err();
        assert!(matches!(err, StorageError::StaleCheckpoint { .. }));

        let err = store.put("t1", &checkpoint("other", 9)).await.unwrap_err();
        assert!(matches!(err, StorageError::ThreadMismatch { .. }));

        let ids = store.list_thread_ids().await.unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["t1", "t2"]);

        assert!(store.delete("t1").await.unwrap());
        assert!(!store.delete("t1").await.unwrap());
        assert!(store.get("t1").await.unwrap().is_none());

        // A deleted thread starts over from sequence 1.
        store.put("t1", &checkpoint("t1", 1)).await.unwrap();
    }

    #[test]
    fn test_config_defaults_name_langgraph_checkpoints() {
        let config: CheckpointerConfig =
            serde_yaml::from_str("connection_str: memory://\n").unwrap();
        assert_eq!(config.name, "default_checkpointer");
        assert_eq!(config.db_name, "langgraph");
        assert_eq!(config.collection_name, "checkpoints");
    }

    #[test]
    fn test_unsupported_schemes_are_rejected() {
        for conn in ["mongodb://localhost:27017", "no-scheme", "postgres://db"] {
            let err = create_checkpointer(&CheckpointerConfig::new(conn)).err().unwrap();
            assert!(matches!(err, StorageError::UnsupportedBackend { .. }), "{conn}");
        }
    }

    #[test]
    fn test_selects_backend_by_scheme() {
        let store = create_checkpointer(&CheckpointerConfig::new("memory://")).unwrap();
        assert_eq!(store.backend(), "memory");

        let dir = tempfile::tempdir().unwrap();
        let conn = format!("file://{}", dir.path().display());
        let store = create_checkpointer(&CheckpointerConfig::new(conn)).unwrap();
        assert_eq!(store.backend(), "file");
    }
}
