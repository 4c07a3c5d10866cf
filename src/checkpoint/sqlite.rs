//! SQLite checkpoint store
//!
//! One row per thread in the configured table. Sequence comparison and write
//! happen inside a single immediate transaction.

use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use tokio::sync::OnceCell;
use tokio_rusqlite::Connection;

use crate::error::StorageError;

use super::{check_put, codec, Checkpoint, Checkpointer};

pub struct SqliteCheckpointer {
    path: PathBuf,
    table: String,
    conn: OnceCell<Connection>,
}

impl std::fmt::Debug for SqliteCheckpointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCheckpointer")
            .field("path", &self.path)
            .field("table", &self.table)
            .field("connected", &self.conn.initialized())
            .finish()
    }
}

impl SqliteCheckpointer {
    /// `table` must be a plain identifier; it is interpolated into SQL.
    pub fn new(path: impl Into<PathBuf>, table: &str) -> Result<Self, StorageError> {
        check_table_name(table)?;
        Ok(Self {
            path: path.into(),
            table: table.to_string(),
            conn: OnceCell::new(),
        })
    }

    async fn conn(&self) -> Result<&Connection, StorageError> {
        self.conn
            .get_or_try_init(|| async {
                let conn = Connection::open(&self.path).await.map_err(unreachable)?;
                let ddl = format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        thread_id TEXT PRIMARY KEY,
                        sequence INTEGER NOT NULL,
                        payload BLOB NOT NULL,
                        updated_at TEXT NOT NULL
                    )",
                    self.table
                );
                conn.call(move |conn| Ok(conn.execute_batch(&ddl)?))
                    .await
                    .map_err(unreachable)?;
                tracing::info!(path = %self.path.display(), table = %self.table, "SQLite checkpointer connected");
                Ok(conn)
            })
            .await
    }
}

pub(crate) fn check_table_name(table: &str) -> Result<(), StorageError> {
    let valid = !table.is_empty()
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !table.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidConfiguration {
            backend: "sqlite".to_string(),
            reason: format!("collection name '{table}' is not a valid table name"),
        })
    }
}

pub(crate) fn unreachable(err: tokio_rusqlite::Error) -> StorageError {
    StorageError::Unreachable {
        backend: "sqlite".to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl Checkpointer for SqliteCheckpointer {
    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>, StorageError> {
        let sql = format!("SELECT payload FROM {} WHERE thread_id = ?1", self.table);
        let id = thread_id.to_string();
        let payload: Option<Vec<u8>> = self
            .conn()
            .await?
            .call(move |conn| {
                Ok(conn
                    .query_row(&sql, params![id], |row| row.get(0))
                    .optional()?)
            })
            .await
            .map_err(unreachable)?;
        payload.map(|bytes| codec::decode(&bytes)).transpose()
    }

    async fn put(&self, thread_id: &str, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        check_put(thread_id, checkpoint, None)?;
        let payload = codec::encode(checkpoint)?;
        let select = format!("SELECT sequence FROM {} WHERE thread_id = ?1", self.table);
        let upsert = format!(
            "INSERT INTO {} (thread_id, sequence, payload, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(thread_id) DO UPDATE SET
                sequence = excluded.sequence,
                payload = excluded.payload,
                updated_at = excluded.updated_at",
            self.table
        );
        let id = thread_id.to_string();
        let sequence = checkpoint.sequence as i64;
        let updated_at = checkpoint.created_at.to_rfc3339();

        // Returns the stored sequence when the write was refused.
        let stale: Option<u64> = self
            .conn()
            .await?
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let stored: Option<i64> = tx
                    .query_row(&select, params![id], |row| row.get(0))
                    .optional()?;
                if let Some(stored) = stored.filter(|s| *s >= sequence) {
                    return Ok(Some(stored as u64));
                }
                tx.execute(&upsert, params![id, sequence, payload, updated_at])?;
                tx.commit()?;
                Ok(None)
            })
            .await
            .map_err(unreachable)?;

        check_put(thread_id, checkpoint, stale)
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, StorageError> {
        let sql = format!("DELETE FROM {} WHERE thread_id = ?1", self.table);
        let id = thread_id.to_string();
        let removed = self
            .conn()
            .await?
            .call(move |conn| Ok(conn.execute(&sql, params![id])?))
            .await
            .map_err(unreachable)?;
        Ok(removed > 0)
    }

    async fn list_thread_ids(&self) -> Result<BTreeSet<String>, StorageError> {
        let sql = format!("SELECT thread_id FROM {}", self.table);
        self.conn()
            .await?
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let ids = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<BTreeSet<_>, _>>()?;
                Ok(ids)
            })
            .await
            .map_err(unreachable)
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::tests::exercise_contract;

    #[tokio::test]
    async fn test_satisfies_the_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCheckpointer::new(dir.path().join("ckpt.db"), "checkpoints").unwrap();
        exercise_contract(&store).await;
    }

    #[test]
    fn test_construction_does_not_open_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lazy.db");
        let _store = SqliteCheckpointer::new(&path, "checkpoints").unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_rejects_table_names_that_are_not_identifiers() {
        for table in ["bad; DROP TABLE x", "1abc", ""] {
            let err = SqliteCheckpointer::new("x.db", table).unwrap_err();
            assert!(
                matches!(&err, StorageError::InvalidConfiguration { backend, .. } if backend == "sqlite"),
                "{table}: {err}"
            );
            assert!(err.to_string().starts_with("invalid sqlite store configuration"));
        }
    }
}
