use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use civicmap_common::AddressKey;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Mutual exclusion keyed by normalized address.
///
/// Placements for the same address run one at a time; different addresses never
/// wait on each other. Slots are dropped once nobody holds or waits on them.
#[derive(Default)]
pub struct AddressLocks {
    slots: Mutex<HashMap<AddressKey, Weak<AsyncMutex<()>>>>,
}

impl AddressLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &AddressKey) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.retain(|_, slot| slot.strong_count() > 0);
        if let Some(slot) = slots.get(key).and_then(Weak::upgrade) {
            return slot;
        }
        let slot = Arc::new(AsyncMutex::new(()));
        slots.insert(key.clone(), Arc::downgrade(&slot));
        slot
    }

    pub async fn acquire(&self, key: &AddressKey) -> OwnedMutexGuard<()> {
        let slot = self.slot(key);
        match slot.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                debug!(address = %key, "Waiting for in-flight placement at the same address");
                slot.lock_owned().await
            }
        }
    }

    /// Lock several addresses at once. Keys are taken in sorted order so two
    /// callers locking overlapping sets cannot deadlock.
    pub async fn acquire_all(&self, keys: &[AddressKey]) -> Vec<OwnedMutexGuard<()>> {
        let mut keys: Vec<&AddressKey> = keys.iter().collect();
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.acquire(key).await);
        }
        guards
    }

    /// Number of addresses currently locked or awaited.
    pub fn active(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.values().filter(|slot| slot.strong_count() > 0).count()
    }
}
