//! SQLite recall store
//!
//! One row per memory in `<collection>_recall`, in the same database file as
//! the checkpoints. Each row carries the record as JSON.

use std::path::PathBuf;

use async_trait::async_trait;
use rusqlite::params;
use tokio::sync::OnceCell;
use tokio_rusqlite::Connection;

use crate::checkpoint::sqlite::{check_table_name, unreachable};
use crate::error::StorageError;

use super::{MemoryRecord, RecallStore};

pub struct SqliteRecallStore {
    path: PathBuf,
    table: String,
    conn: OnceCell<Connection>,
}

impl std::fmt::Debug for SqliteRecallStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRecallStore")
            .field("path", &self.path)
            .field("table", &self.table)
            .field("connected", &self.conn.initialized())
            .finish()
    }
}

impl SqliteRecallStore {
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
                    "CREATE TABLE IF NOT EXISTS {table} (
                        id TEXT PRIMARY KEY,
                        namespace TEXT NOT NULL,
                        created_at TEXT NOT NULL,
                        record TEXT NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS {table}_namespace ON {table} (namespace)",
                    table = self.table
                );
                conn.call(move |conn| Ok(conn.execute_batch(&ddl)?))
                    .await
                    .map_err(unreachable)?;
                tracing::info!(path = %self.path.display(), table = %self.table, "SQLite recall store connected");
                Ok(conn)
            })
            .await
    }
}

#[async_trait]
impl RecallStore for SqliteRecallStore {
    async fn append(&self, namespace: &str, record: &MemoryRecord) -> Result<(), StorageError> {
        let sql = format!(
            "INSERT INTO {} (id, namespace, created_at, record) VALUES (?1, ?2, ?3, ?4)",
            self.table
        );
        let row = (
            record.id.to_string(),
            namespace.to_string(),
            record.created_at.to_rfc3339(),
            serde_json::to_string(record)?,
        );
        self.conn()
            .await?
            .call(move |conn| Ok(conn.execute(&sql, params![row.0, row.1, row.2, row.3])?))
            .await
            .map_err(unreachable)?;
        Ok(())
    }

    async fn records(&self, namespace: &str) -> Result<Vec<MemoryRecord>, StorageError> {
        let sql = format!(
            "SELECT record FROM {} WHERE namespace = ?1 ORDER BY rowid",
            self.table
        );
        let namespace = namespace.to_string();
        let rows: Vec<String> = self
            .conn()
            .await?
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![namespace], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(unreachable)?;
        rows.iter()
            .map(|row| serde_json::from_str(row).map_err(StorageError::from))
            .collect()
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::tests::exercise_store;
    use crate::memory::RecallMemory;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_satisfies_the_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteRecallStore::new(dir.path().join("agent.db"), "checkpoints_recall").unwrap();
        exercise_store(&RecallMemory::with_store(Arc::new(store))).await;
    }

    #[test]
    fn test_rejects_table_names_that_are_not_identifiers() {
        let err = SqliteRecallStore::new("x.db", "recall-memories").unwrap_err();
        assert!(matches!(err, StorageError::InvalidConfiguration { .. }));
    }
}
