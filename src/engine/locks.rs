//! Per-thread mutual exclusion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::config::BusyPolicy;
use crate::error::EngineError;

/// Held for the duration of a turn (or reset) on one thread.
#[derive(Debug)]
pub struct ThreadGuard {
    _guard: OwnedMutexGuard<()>,
}

/// One async mutex per thread id. Slots nobody holds or waits on are pruned.
#[derive(Debug, Default)]
pub struct ThreadLocks {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ThreadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(
        &self,
        thread_id: &str,
        policy: BusyPolicy,
        wait: Duration,
    ) -> Result<ThreadGuard, EngineError> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(thread_id.to_string()).or_default())
        };
        let busy = || EngineError::ThreadBusy {
            thread_id: thread_id.to_string(),
        };

        let guard = match policy {
            BusyPolicy::Reject => slot.try_lock_owned().map_err(|_| busy())?,
            BusyPolicy::Wait => tokio::time::timeout(wait, slot.lock_owned())
                .await
                .map_err(|_| busy())?,
        };
        Ok(ThreadGuard { _guard: guard })
    }

    /// Drops slots that are neither held nor awaited.
    pub fn prune(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.retain(|_, slot| Arc::strong_count(slot) > 1);
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reject_policy_fails_while_held() {
        let locks = ThreadLocks::new();
        let _held = locks
            .acquire("t", BusyPolicy::Reject, Duration::ZERO)
            .await
            .unwrap();

        let err = locks
            .acquire("t", BusyPolicy::Reject, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ThreadBusy { thread_id } if thread_id == "t"));

        // Other threads are unaffected.
        assert!(locks.acquire("u", BusyPolicy::Reject, Duration::ZERO).await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_policy_is_bounded() {
        let locks = ThreadLocks::new();
        let _held = locks
            .acquire("t", BusyPolicy::Wait, Duration::from_secs(1))
            .await
            .unwrap();

        let err = locks
            .acquire("t", BusyPolicy::Wait, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ThreadBusy { .. }));
    }

    #[tokio::test]
    async fn test_released_slots_are_pruned() {
        let locks = ThreadLocks::new();
        let held = locks
            .acquire("t", BusyPolicy::Wait, Duration::from_secs(1))
            .await
            .unwrap();
        locks.prune();
        assert_eq!(locks.len(), 1);

        drop(held);
        locks.prune();
        assert!(locks.is_empty());
    }
}
