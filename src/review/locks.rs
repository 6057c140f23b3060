//! Per (user, item) mutual exclusion for read-modify-write commands.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

type AggregateKey = (Uuid, Uuid);
type Registry = Arc<Mutex<HashMap<AggregateKey, Arc<AsyncMutex<()>>>>>;

#[derive(Debug, Default)]
pub struct AggregateLocks {
    registry: Registry,
}

impl AggregateLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other command holds the (user, item) aggregate.
    /// Different keys never contend.
    pub async fn acquire(&self, user_id: Uuid, item_id: Uuid) -> AggregateGuard {
        let key = (user_id, item_id);
        let mutex = {
            let mut registry = self.registry.lock();
            Arc::clone(
                registry
                    .entry(key)
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        let guard = mutex.lock_owned().await;
        AggregateGuard {
            key,
            registry: Arc::clone(&self.registry),
            _guard: guard,
        }
    }

    /// Number of aggregates currently locked or waited on.
    pub fn tracked(&self) -> usize {
        self.registry.lock().len()
    }
}

pub struct AggregateGuard {
    key: AggregateKey,
    registry: Registry,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for AggregateGuard {
    fn drop(&mut self) {
        let mut registry = self.registry.lock();
        // One reference in the registry plus the one this guard still owns.
        let idle = registry
            .get(&self.key)
            .is_some_and(|mutex| Arc::strong_count(mutex) <= 2);
        if idle {
            registry.remove(&self.key);
        }
    }
}
