//! Filesystem recall store
//!
//! One JSON-lines file per namespace, named like checkpoint files. Records
//! are appended and synced; a torn trailing line left by a crash is skipped
//! on read.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::checkpoint::file::file_stem;
use crate::error::StorageError;

use super::{MemoryRecord, RecallStore};

const EXTENSION: &str = "jsonl";

#[derive(Debug)]
pub struct FileRecallStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileRecallStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, namespace: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{EXTENSION}", file_stem(namespace)))
    }
}

#[async_trait]
impl RecallStore for FileRecallStore {
    async fn append(&self, namespace: &str, record: &MemoryRecord) -> Result<(), StorageError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(namespace))
            .await?;
        file.write_all(&line).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn records(&self, namespace: &str) -> Result<Vec<MemoryRecord>, StorageError> {
        let path = self.path_for(namespace);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    line = index + 1,
                    error = %e,
                    "Skipping unreadable recall record"
                ),
            }
        }
        Ok(records)
    }

    fn backend(&self) -> &'static str {
        "file"
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
        let store = Arc::new(FileRecallStore::new(dir.path().join("recall")));
        exercise_store(&RecallMemory::with_store(store)).await;
    }

    #[tokio::test]
    async fn test_records_survive_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let first = RecallMemory::with_store(Arc::new(FileRecallStore::new(dir.path())));
        first.insert("concierge", "likes green tea", vec![1.0, 0.0]).await.unwrap();
        drop(first);

        let reopened = RecallMemory::with_store(Arc::new(FileRecallStore::new(dir.path())));
        assert_eq!(
            reopened.search("concierge", &[1.0, 0.0], 3).await.unwrap(),
            vec!["likes green tea"]
        );
    }

    #[tokio::test]
    async fn test_torn_trailing_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRecallStore::new(dir.path());
        let memory = RecallMemory::with_store(Arc::new(FileRecallStore::new(dir.path())));
        memory.insert("n", "kept", vec![1.0]).await.unwrap();

        let path = store.path_for("n");
        let mut text = std::fs::read_to_string(&path).unwrap();
        text.push_str("{\"id\": \"trunc");
        std::fs::write(&path, text).unwrap();

        let records = store.records("n").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, "kept");
    }
}
