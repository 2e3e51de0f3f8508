//! Per-user serialization of ledger mutations.
//!
//! [`UserLocks`] keeps one async mutex per user in a `HashMap` guarded by a
//! [`tokio::sync::RwLock`]. Two backdates for the same user would otherwise
//! both read the same "events after" snapshot and corrupt each other's
//! cascade.
//!
//! Entries are pruned whenever a new user is added: a mutex that only the
//! map still references has no holder and no waiter, so dropping it is
//! safe and the map stays as small as the set of users with mutations in
//! flight.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::UserId;

/// Registry of per-user mutation locks.
///
/// # Concurrency
///
/// - Mutations for the same user are serialized.
/// - Mutations for different users never contend beyond the brief map
///   lookup.
/// - Reads do not take these locks.
#[derive(Debug, Default)]
pub struct UserLocks {
    locks: RwLock<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl UserLocks {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for and returns the mutation lock of `user_id`.
    ///
    /// The guard is owned so it can be held across awaits for the whole
    /// read-analyze-commit sequence.
    pub async fn lock(&self, user_id: UserId) -> OwnedMutexGuard<()> {
        let existing = self.locks.read().await.get(&user_id).map(Arc::clone);
        let lock = match existing {
            Some(lock) => lock,
            None => {
                let mut map = self.locks.write().await;
                map.retain(|_, lock| Arc::strong_count(lock) > 1);
                Arc::clone(map.entry(user_id).or_default())
            }
        };
        lock.lock_owned().await
    }

    /// Number of users currently tracked.
    pub async fn len(&self) -> usize {
        self.locks.read().await.len()
    }

    /// Returns `true` if no user is tracked.
    pub async fn is_empty(&self) -> bool {
        self.locks.read().await.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_user_is_serialized() {
        let locks = Arc::new(UserLocks::new());
        let user = UserId::new();

        let guard = locks.lock(user).await;
        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _g = locks.lock(user).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        let joined = tokio::time::timeout(Duration::from_secs(1), contender).await;
        assert!(matches!(joined, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn different_users_do_not_contend() {
        let locks = UserLocks::new();
        let _a = locks.lock(UserId::new()).await;
        let b = tokio::time::timeout(Duration::from_millis(200), locks.lock(UserId::new())).await;
        assert!(b.is_ok());
        assert_eq!(locks.len().await, 2);
    }

    #[tokio::test]
    async fn starts_empty() {
        let locks = UserLocks::new();
        assert!(locks.is_empty().await);
    }

    #[tokio::test]
    async fn idle_users_are_pruned() {
        let locks = UserLocks::new();
        for _ in 0..100 {
            let _g = locks.lock(UserId::new()).await;
        }
        assert_eq!(locks.len().await, 1);
    }

    #[tokio::test]
    async fn held_lock_survives_pruning() {
        let locks = Arc::new(UserLocks::new());
        let busy = UserId::new();
        let guard = locks.lock(busy).await;

        for _ in 0..10 {
            let _g = locks.lock(UserId::new()).await;
        }
        assert_eq!(locks.len().await, 2);

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _g = locks.lock(busy).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        let joined = tokio::time::timeout(Duration::from_secs(1), contender).await;
        assert!(matches!(joined, Ok(Ok(()))));
    }
}
