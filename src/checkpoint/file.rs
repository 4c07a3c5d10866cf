//! Filesystem checkpoint store
//!
//! One file per thread under the store directory. Short thread ids are
//! hex-encoded into the file name; ids too long for a file name are stored
//! under a SHA-256 digest and read back from the checkpoint itself. Writes go
//! to `.<name>.tmp` in the same directory, are synced, then renamed over the
//! target, so a reader never sees a partial checkpoint.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::StorageError;

use super::{check_put, codec, Checkpoint, Checkpointer};

const EXTENSION: &str = "ckpt";

/// Longest hex stem used as-is. Leaves room for the temp-file decoration
/// within the usual 255-byte name limit.
const MAX_HEX_STEM: usize = 200;

const DIGEST_PREFIX: &str = "sha256-";

#[derive(Debug)]
pub struct FileCheckpointer {
    dir: PathBuf,
    /// Serializes read-compare-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileCheckpointer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{EXTENSION}", file_stem(thread_id)))
    }

    async fn read(&self, path: &Path) -> Result<Option<Checkpoint>, StorageError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => codec::decode(&bytes).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads the thread's checkpoint, rejecting a digest collision.
    async fn read_thread(&self, thread_id: &str) -> Result<Option<Checkpoint>, StorageError> {
        let checkpoint = self.read(&self.path_for(thread_id)).await?;
        match checkpoint {
            Some(c) if c.thread_id() != thread_id => Err(StorageError::ThreadMismatch {
                expected: thread_id.to_string(),
                actual: c.thread_id().to_string(),
            }),
            other => Ok(other),
        }
    }

    /// Thread id behind a checkpoint file name, if the file is one of ours.
    async fn thread_id_of(&self, path: &Path) -> Result<Option<String>, StorageError> {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            return Ok(None);
        };
        if stem.starts_with(DIGEST_PREFIX) {
            return Ok(self.read(path).await?.map(|c| c.state.thread_id));
        }
        Ok(decode_stem(stem))
    }
}

#[async_trait]
impl Checkpointer for FileCheckpointer {
    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>, StorageError> {
        self.read_thread(thread_id).await
    }

    async fn put(&self, thread_id: &str, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(thread_id);

        let stored = self.read_thread(thread_id).await?.map(|c| c.sequence);
        check_put(thread_id, checkpoint, stored)?;

        let bytes = codec::encode(checkpoint)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let temp = path.with_file_name(format!(
            ".{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("checkpoint")
        ));

        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        tracing::debug!(
            thread_id = %thread_id,
            sequence = checkpoint.sequence,
            bytes = bytes.len(),
            "Checkpoint written"
        );
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.path_for(thread_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_thread_ids(&self) -> Result<BTreeSet<String>, StorageError> {
        let mut ids = BTreeSet::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            match self.thread_id_of(&path).await? {
                Some(id) => {
                    ids.insert(id);
                }
                None => {
                    tracing::warn!(path = %path.display(), "Skipping unrecognized checkpoint file")
                }
            }
        }
        Ok(ids)
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}

/// File-name-safe stem for an arbitrary key: hex when short enough,
/// otherwise `sha256-<digest>`.
pub(crate) fn file_stem(key: &str) -> String {
    let encoded = hex::encode(key);
    if encoded.len() <= MAX_HEX_STEM {
        encoded
    } else {
        format!("{DIGEST_PREFIX}{:x}", Sha256::digest(key.as_bytes()))
    }
}

fn decode_stem(stem: &str) -> Option<String> {
    let bytes = hex::decode(stem).ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::tests::{checkpoint, exercise_contract};

    #[tokio::test]
    async fn test_satisfies_the_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        exercise_contract(&FileCheckpointer::new(dir.path().join("store"))).await;
    }

    #[tokio::test]
    async fn test_thread_ids_with_path_characters_are_safe() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointer::new(dir.path());
        let id = "../user/42 ✓";

        store.put(id, &checkpoint(id, 1)).await.unwrap();

        assert_eq!(store.get(id).await.unwrap().unwrap().thread_id(), id);
        assert!(store.list_thread_ids().await.unwrap().contains(id));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_long_thread_ids_fit_in_a_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointer::new(dir.path());
        let id = format!("tenant-7/session/{}", "x".repeat(130));
        assert!(id.len() > 147);

        store.put(&id, &checkpoint(&id, 1)).await.unwrap();
        store.put(&id, &checkpoint(&id, 2)).await.unwrap();

        assert_eq!(store.get(&id).await.unwrap().unwrap().sequence, 2);
        let ids = store.list_thread_ids().await.unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![id.clone()]);
        assert!(store.delete(&id).await.unwrap());
        assert!(store.list_thread_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_survives_reopening() {
        let dir = tempfile::tempdir().unwrap();
        FileCheckpointer::new(dir.path())
            .put("t1", &checkpoint("t1", 3))
            .await
            .unwrap();

        let reopened = FileCheckpointer::new(dir.path());
        assert_eq!(reopened.get("t1").await.unwrap().unwrap().sequence, 3);
    }

    #[test]
    fn test_name_encoding_rejects_foreign_files() {
        assert_eq!(decode_stem(&file_stem("abc")), Some("abc".to_string()));
        assert_eq!(decode_stem("zz"), None);
        assert_eq!(decode_stem("abc"), None);

        let long = file_stem(&"y".repeat(500));
        assert!(long.starts_with(DIGEST_PREFIX));
        assert_eq!(long.len(), DIGEST_PREFIX.len() + 64);
        assert_eq!(decode_stem(&long), None);
    }
}
