//! Redis recall store
//!
//! Each namespace is a list `<prefix>:<namespace>` of JSON records, appended
//! with `RPUSH`.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::sync::OnceCell;

use crate::checkpoint::redis::unreachable;
use crate::error::StorageError;

use super::{MemoryRecord, RecallStore};

pub struct RedisRecallStore {
    client: Client,
    prefix: String,
    conn: OnceCell<ConnectionManager>,
}

impl std::fmt::Debug for RedisRecallStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRecallStore")
            .field("prefix", &self.prefix)
            .field("connected", &self.conn.initialized())
            .finish()
    }
}

impl RedisRecallStore {
    /// Parses the URL only; the connection is opened on first use.
    pub fn new(url: &str, prefix: impl Into<String>) -> Result<Self, StorageError> {
        let client = Client::open(url).map_err(unreachable)?;
        Ok(Self {
            client,
            prefix: prefix.into(),
            conn: OnceCell::new(),
        })
    }

    async fn conn(&self) -> Result<ConnectionManager, StorageError> {
        let manager = self
            .conn
            .get_or_try_init(|| async {
                let manager = self
                    .client
                    .get_connection_manager()
                    .await
                    .map_err(unreachable)?;
                tracing::info!(prefix = %self.prefix, "Redis recall store connected");
                Ok::<_, StorageError>(manager)
            })
            .await?;
        Ok(manager.clone())
    }

    fn namespace_key(&self, namespace: &str) -> String {
        format!("{}:{namespace}", self.prefix)
    }
}

#[async_trait]
impl RecallStore for RedisRecallStore {
    async fn append(&self, namespace: &str, record: &MemoryRecord) -> Result<(), StorageError> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.conn().await?;
        let _: i64 = conn
            .rpush(self.namespace_key(namespace), payload)
            .await
            .map_err(unreachable)?;
        Ok(())
    }

    async fn records(&self, namespace: &str) -> Result<Vec<MemoryRecord>, StorageError> {
        let mut conn = self.conn().await?;
        let rows: Vec<String> = conn
            .lrange(self.namespace_key(namespace), 0, -1)
            .await
            .map_err(unreachable)?;
        rows.iter()
            .map(|row| serde_json::from_str(row).map_err(StorageError::from))
            .collect()
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construction_does_not_connect() {
        let store = RedisRecallStore::new("redis://127.0.0.1:1", "langgraph:checkpoints_recall").unwrap();
        assert_eq!(
            store.namespace_key("concierge"),
            "langgraph:checkpoints_recall:concierge"
        );
    }
}
