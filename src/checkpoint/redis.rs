//! Redis checkpoint store
//!
//! Each thread is a hash `<prefix>:thread:<id>` holding `sequence` and
//! `payload`; the set `<prefix>:threads` indexes known ids. The sequence check
//! and the write run in one Lua script, so they are atomic on the server.

use std::collections::BTreeSet;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tokio::sync::OnceCell;

use crate::error::StorageError;

use super::{check_put, codec, Checkpoint, Checkpointer};

const PUT_SCRIPT: &str = r#"
local stored = redis.call('HGET', KEYS[1], 'sequence')
if stored and tonumber(stored) >= tonumber(ARGV[1]) then
    return tonumber(stored)
end
redis.call('HSET', KEYS[1], 'sequence', ARGV[1], 'payload', ARGV[2])
redis.call('SADD', KEYS[2], ARGV[3])
return -1
"#;

pub struct RedisCheckpointer {
    client: Client,
    prefix: String,
    conn: OnceCell<ConnectionManager>,
    put_script: Script,
}

impl std::fmt::Debug for RedisCheckpointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCheckpointer")
            .field("prefix", &self.prefix)
            .field("connected", &self.conn.initialized())
            .finish()
    }
}

impl RedisCheckpointer {
    /// Parses the URL only; the connection is opened on first use.
    pub fn new(url: &str, prefix: impl Into<String>) -> Result<Self, StorageError> {
        let client = Client::open(url).map_err(unreachable)?;
        Ok(Self {
            client,
            prefix: prefix.into(),
            conn: OnceCell::new(),
            put_script: Script::new(PUT_SCRIPT),
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
                tracing::info!(prefix = %self.prefix, "Redis checkpointer connected");
                Ok::<_, StorageError>(manager)
            })
            .await?;
        Ok(manager.clone())
    }

    fn thread_key(&self, thread_id: &str) -> String {
        format!("{}:thread:{thread_id}", self.prefix)
    }

    fn index_key(&self) -> String {
        format!("{}:threads", self.prefix)
    }
}

pub(crate) fn unreachable(err: redis::RedisError) -> StorageError {
    StorageError::Unreachable {
        backend: "redis".to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl Checkpointer for RedisCheckpointer {
    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>, StorageError> {
        let mut conn = self.conn().await?;
        let payload: Option<Vec<u8>> = conn
            .hget(self.thread_key(thread_id), "payload")
            .await
            .map_err(unreachable)?;
        payload.map(|bytes| codec::decode(&bytes)).transpose()
    }

    async fn put(&self, thread_id: &str, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        check_put(thread_id, checkpoint, None)?;
        let payload = codec::encode(checkpoint)?;
        let mut conn = self.conn().await?;

        let stored: i64 = self
            .put_script
            .key(self.thread_key(thread_id))
            .key(self.index_key())
            .arg(checkpoint.sequence)
            .arg(payload)
            .arg(thread_id)
            .invoke_async(&mut conn)
            .await
            .map_err(unreachable)?;

        let stale = u64::try_from(stored).ok();
        check_put(thread_id, checkpoint, stale)
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, StorageError> {
        let mut conn = self.conn().await?;
        let (removed, _): (i64, i64) = redis::pipe()
            .atomic()
            .del(self.thread_key(thread_id))
            .srem(self.index_key(), thread_id)
            .query_async(&mut conn)
            .await
            .map_err(unreachable)?;
        Ok(removed > 0)
    }

    async fn list_thread_ids(&self) -> Result<BTreeSet<String>, StorageError> {
        let mut conn = self.conn().await?;
        conn.smembers(self.index_key()).await.map_err(unreachable)
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
        // Nothing listens on this port; construction must still succeed.
        let store = RedisCheckpointer::new("redis://127.0.0.1:1", "langgraph:checkpoints").unwrap();
        assert_eq!(store.thread_key("t1"), "langgraph:checkpoints:thread:t1");
        assert_eq!(store.index_key(), "langgraph:checkpoints:threads");
    }
}
