//! Per-path exclusive locks.
//!
//! Connections run concurrently, but at most one operation touches a given
//! managed file (and its sidecar and staged delta source) at a time.
//! Operations on different files proceed in parallel.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Table of per-path async mutexes.
///
/// Entries are created on demand and pruned once no operation holds or
/// waits on them, so the table only grows with concurrent load.
#[derive(Debug, Default)]
pub struct PathLocks {
    table: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

/// Held while an operation owns a path.
#[derive(Debug)]
pub struct PathGuard {
    _guard: OwnedMutexGuard<()>,
}

impl PathLocks {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `path`.
    pub async fn lock(&self, path: &Path) -> PathGuard {
        let entry = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            // An entry whose only reference is the table is idle.
            table.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(table.entry(path.to_path_buf()).or_default())
        };

        PathGuard {
            _guard: entry.lock_owned().await,
        }
    }

    /// Number of paths currently tracked.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_path_is_exclusive() {
        let locks = Arc::new(PathLocks::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock(Path::new("/data/a.txt")).await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_paths_do_not_block() {
        let locks = PathLocks::new();
        let _a = locks.lock(Path::new("/data/a")).await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.lock(Path::new("/data/b"))).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn idle_entries_are_pruned() {
        let locks = PathLocks::new();
        for name in ["a", "b", "c"] {
            let _guard = locks.lock(Path::new(name)).await;
        }
        // Each lock call prunes the previous, now idle, entries.
        assert_eq!(locks.tracked(), 1);

        let _held = locks.lock(Path::new("d")).await;
        let _other = locks.lock(Path::new("e")).await;
        assert_eq!(locks.tracked(), 2);
    }
}
