use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const PRUNE_THRESHOLD: usize = 1_024;

#[derive(Debug, Clone, Default)]
pub struct UserLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut guard = self.inner.lock();
            if guard.len() >= PRUNE_THRESHOLD {
                // Entries only referenced by the map are idle.
                guard.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            guard.entry(user_id.to_string()).or_default().clone()
        };

        lock.lock_owned().await
    }

    pub fn tracked_users(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_user_waits_for_previous_holder() {
        let locks = UserLocks::new();
        let first = locks.acquire("U1").await;

        let waiting = tokio::time::timeout(Duration::from_millis(50), locks.acquire("U1")).await;
        assert!(waiting.is_err());

        drop(first);
        let second = tokio::time::timeout(Duration::from_millis(50), locks.acquire("U1")).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn different_users_do_not_contend() {
        let locks = UserLocks::new();
        let _first = locks.acquire("U1").await;
        let other = tokio::time::timeout(Duration::from_millis(50), locks.acquire("U2")).await;
        assert!(other.is_ok());
        assert_eq!(locks.tracked_users(), 2);
    }
}
