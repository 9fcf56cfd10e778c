//! Per-instance mutual exclusion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Entry = Arc<AsyncMutex<()>>;

/// Lock table keyed by resource group name.
///
/// Entries are created on first use and removed once nobody holds or waits
/// on them, so the table only ever contains keys with a mutation in flight.
#[derive(Default)]
pub struct KeyedLocks {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl KeyedLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: &str) -> KeyedGuard {
        let entry = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(entries.entry(key.to_string()).or_default())
        };

        KeyedGuard {
            guard: Some(entry.lock_owned().await),
            key: key.to_string(),
            entries: Arc::clone(&self.entries),
        }
    }

    /// Number of keys currently held or awaited.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to one key; released on drop.
pub struct KeyedGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        // Clones are only taken under the table lock, so a count of one means
        // the table holds the last reference.
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries
            .get(&self.key)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            entries.remove(&self.key);
        }
    }
}
