//! Per-volume advisory locks.
//!
//! Mount, Unmount and Remove read live state (mount table, attachments) and
//! then act on it. Two requests for the same volume could otherwise both
//! observe "not mounted" and both mount. Each of those operations holds the
//! volume's lock for its whole duration.
//!
//! Locks are in-memory and scoped to this process. They do not protect
//! against a second driver process on the same host.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockTable = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Table of locks keyed by volume ID.
///
/// Cheaply cloneable; clones share the table.
#[derive(Clone, Debug, Default)]
pub struct VolumeLocks {
    table: Arc<LockTable>,
}

impl VolumeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the lock of `volume_id`.
    ///
    /// The lock is released when the returned guard is dropped, on every exit
    /// path of the holder. A waiter dropped before it gets the lock leaves
    /// the table as if it had never asked.
    pub async fn acquire(&self, volume_id: &str) -> VolumeLockGuard {
        let entry = {
            let mut table = self.table.lock();
            table
                .entry(volume_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let mut waiting = Waiting {
            table: &self.table,
            volume_id,
            armed: true,
        };
        let guard = entry.lock_owned().await;
        waiting.armed = false;
        tracing::trace!(volume_id, "Acquired volume lock");

        VolumeLockGuard {
            guard: Some(guard),
            volume_id: volume_id.to_string(),
            table: Arc::clone(&self.table),
        }
    }

    /// Number of volumes with a holder or waiter.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drop the entry of `volume_id` once nobody holds or waits for it.
fn remove_if_idle(table: &mut HashMap<String, Arc<AsyncMutex<()>>>, volume_id: &str) {
    // Holders and waiters each own a clone; the table owns the last one.
    if table
        .get(volume_id)
        .is_some_and(|entry| Arc::strong_count(entry) == 1)
    {
        table.remove(volume_id);
    }
}

/// Cleans up after an `acquire` that was dropped while waiting.
///
/// Declared before the lock future is awaited, so the future's clone of the
/// entry is gone by the time this runs.
struct Waiting<'a> {
    table: &'a LockTable,
    volume_id: &'a str,
    armed: bool,
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        if self.armed {
            remove_if_idle(&mut self.table.lock(), self.volume_id);
            tracing::trace!(volume_id = self.volume_id, "Gave up waiting for volume lock");
        }
    }
}

/// Holds a volume lock until dropped.
#[derive(Debug)]
pub struct VolumeLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    volume_id: String,
    table: Arc<LockTable>,
}

impl VolumeLockGuard {
    pub fn volume_id(&self) -> &str {
        &self.volume_id
    }
}

impl Drop for VolumeLockGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        // Release first so the strong count only reflects the table and waiters.
        self.guard.take();
        remove_if_idle(&mut table, &self.volume_id);

        tracing::trace!(volume_id = %self.volume_id, "Released volume lock");
    }
}
