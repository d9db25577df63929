//! Per-file lock registry.
//!
//! Create, restore and delete for the same logical save file must never
//! interleave, while unrelated files proceed in parallel. Locks are created
//! on demand, one per key, and reclaimed once idle so a long-running
//! process does not keep a mutex for every file it ever touched.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex as RegistryMutex;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Keys with no activity for this long are dropped from the registry.
const IDLE_EVICTION: Duration = Duration::from_secs(3600);

struct LockSlot {
    lock: Arc<Mutex<()>>,
    last_used: Instant,
}

#[derive(Default)]
pub(crate) struct KeyedLocks {
    slots: RegistryMutex<HashMap<String, LockSlot>>,
}

impl KeyedLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive use of `key`. The returned guard releases on
    /// drop, which covers every exit path of the critical section.
    pub(crate) async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(key.to_owned()).or_insert_with(|| LockSlot {
                lock: Arc::new(Mutex::new(())),
                last_used: Instant::now(),
            });
            slot.last_used = Instant::now();
            Arc::clone(&slot.lock)
        };
        lock.lock_owned().await
    }

    /// Drops registry entries that are unheld and idle. Holders and waiters
    /// keep a clone of the slot's `Arc`, and clones are only ever taken
    /// under the registry mutex, so a strong count of one proves the slot
    /// is unheld and cannot be acquired concurrently with its removal.
    pub(crate) fn sweep_idle(&self) {
        self.sweep_idle_older_than(IDLE_EVICTION);
    }

    fn sweep_idle_older_than(&self, idle: Duration) {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| {
            Arc::strong_count(&slot.lock) > 1 || slot.last_used.elapsed() < idle
        });
        let evicted = before - slots.len();
        if evicted > 0 {
            debug!(evicted, remaining = slots.len(), "reclaimed idle file locks");
        }
    }

    #[cfg(test)]
    fn registered(&self) -> usize {
        self.slots.lock().len()
    }
}
