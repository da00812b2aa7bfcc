use snafu::OptionExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{self, Result};

/// One mutex per cluster id, so lifecycle operations on a cluster run one at a time while
/// different clusters proceed in parallel.  A cluster's entry only lives while an operation holds
/// or waits for it.
#[derive(Debug, Default)]
pub struct ClusterLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ClusterLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `op` while holding the cluster's lock.
    pub fn with_lock<T, F>(&self, cluster_id: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let lock = self.lock_for(cluster_id)?;
        let result = {
            let _guard = lock
                .lock()
                .ok()
                .context(error::LockPoisonedSnafu { name: "cluster" })?;
            op()
        };
        drop(lock);
        self.release(cluster_id)?;
        result
    }

    /// Number of clusters with a lock entry.
    pub fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn table(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>>> {
        self.locks
            .lock()
            .ok()
            .context(error::LockPoisonedSnafu { name: "cluster table" })
    }

    fn lock_for(&self, cluster_id: &str) -> Result<Arc<Mutex<()>>> {
        Ok(self
            .table()?
            .entry(cluster_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    // Handles are only cloned under the table lock, so a count of one means nobody else holds or
    // waits on this cluster's lock.
    fn release(&self, cluster_id: &str) -> Result<()> {
        let mut table = self.table()?;
        if table
            .get(cluster_id)
            .map_or(false, |lock| Arc::strong_count(lock) == 1)
        {
            table.remove(cluster_id);
        }
        Ok(())
    }
}
