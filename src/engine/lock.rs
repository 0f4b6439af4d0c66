use std::time::Instant;

use tracing::debug;

use crate::model::ResourceKey;

use super::{ConcurrencyError, EngineError, Transaction};

/// Ascending, deduplicated lock order. Every call site that locks more than
/// one row goes through this, which is what rules out circular waits.
pub fn order_for_locking(keys: impl IntoIterator<Item = ResourceKey>) -> Vec<ResourceKey> {
    let mut ordered: Vec<ResourceKey> = keys.into_iter().collect();
    ordered.sort();
    ordered.dedup();
    ordered
}

impl Transaction<'_> {
    /// Take exclusive locks on `keys`, one at a time in lock order. Locks are
    /// held until the transaction commits or is dropped.
    ///
    /// A key that sorts below one this transaction already holds cannot be
    /// waited for without risking a cycle, so it is only tried; if it is taken
    /// the attempt fails with `ConcurrencyError::Deadlock`.
    pub async fn lock_exclusive(&mut self, keys: &[ResourceKey]) -> Result<(), EngineError> {
        for key in order_for_locking(keys.iter().copied()) {
            if self.guards.contains_key(&key) {
                continue;
            }
            let row = self
                .engine
                .get_row(&key)
                .ok_or(EngineError::NotFound(key.id()))?;

            let out_of_order = self
                .guards
                .keys()
                .next_back()
                .is_some_and(|highest| *highest > key);

            let guard = if out_of_order {
                row.try_write_owned()
                    .map_err(|_| ConcurrencyError::Deadlock { key })?
            } else {
                let started = Instant::now();
                let guard = tokio::time::timeout(self.engine.lock_wait, row.write_owned())
                    .await
                    .map_err(|_| ConcurrencyError::LockTimeout { key })?;
                metrics::histogram!(crate::observability::LOCK_WAIT_SECONDS)
                    .record(started.elapsed().as_secs_f64());
                guard
            };
            debug!(txn = %self.id, %key, "locked");
            self.guards.insert(key, guard);
        }
        Ok(())
    }

    /// Keys currently locked by this transaction, in lock order.
    pub fn locked_keys(&self) -> Vec<ResourceKey> {
        self.guards.keys().copied().collect()
    }
}
