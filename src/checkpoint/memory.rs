//! In-process checkpoint store. Contents are lost when the process exits.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StorageError;

use super::{check_put, Checkpoint, Checkpointer};

#[derive(Debug, Default)]
pub struct MemoryCheckpointer {
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for MemoryCheckpointer {
    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>, StorageError> {
        Ok(self.checkpoints.read().await.get(thread_id).cloned())
    }

    async fn put(&self, thread_id: &str, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        let mut checkpoints = self.checkpoints.write().await;
        check_put(
            thread_id,
            checkpoint,
            checkpoints.get(thread_id).map(|c| c.sequence),
        )?;
        checkpoints.insert(thread_id.to_string(), checkpoint.clone());
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, StorageError> {
        Ok(self.checkpoints.write().await.remove(thread_id).is_some())
    }

    async fn list_thread_ids(&self) -> Result<BTreeSet<String>, StorageError> {
        Ok(self.checkpoints.read().await.keys().cloned().collect())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::tests::{checkpoint, exercise_contract};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_satisfies_the_store_contract() {
        exercise_contract(&MemoryCheckpointer::new()).await;
    }

    #[tokio::test]
    async fn test_concurrent_puts_of_the_same_sequence_admit_exactly_one() {
        let store = Arc::new(MemoryCheckpointer::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.put("t", &checkpoint("t", 1)).await })
            })
            .collect();

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
    }
}
