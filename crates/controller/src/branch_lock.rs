//! Per-branch critical sections.
//!
//! A keyed lock map indexed by branch hash: at most one push handler and
//! at most one start/reload runs per branch at a time, while distinct
//! branches proceed fully in parallel. Waiters queue rather than skip, so
//! a push that arrives mid-deployment observes the latest remote tip once
//! it gets its turn.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Keyed async lock map. Cheap to clone; all clones share the table.
#[derive(Clone, Default)]
pub struct BranchLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl BranchLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the critical section for a branch hash, waiting if another
    /// task holds it. The guard releases on drop.
    pub async fn acquire(&self, branch_hash: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks
                .entry(branch_hash.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        debug!("Waiting for branch lock {}", branch_hash);
        let guard = lock.lock_owned().await;
        debug!("Acquired branch lock {}", branch_hash);
        guard
    }

    /// Number of branch hashes ever locked (for diagnostics).
    pub fn lock_count(&self) -> usize {
        self.locks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_branch_serializes() {
        let locks = BranchLocks::new();
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let locks = locks.clone();
            let concurrent = concurrent.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("same-hash").await;
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(locks.lock_count(), 1);
    }

    #[tokio::test]
    async fn test_distinct_branches_run_in_parallel() {
        let locks = BranchLocks::new();
        let guard_a = locks.acquire("hash-a").await;

        // A second branch must not be blocked by the first
        let acquired_b = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire("hash-b"),
        )
        .await;
        assert!(acquired_b.is_ok());

        drop(guard_a);
        assert_eq!(locks.lock_count(), 2);
    }
}
