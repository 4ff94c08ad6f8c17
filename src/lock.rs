//! Process-wide gate around the recreate protocol.

use std::sync::Arc;

use log::debug;
use tokio::sync::{Mutex, MutexGuard};

/// Binary gate held for the whole of one top-level edit.
///
/// Not reentrant. Rollback and cascade recreates run through entry points
/// that never acquire it.
#[derive(Debug, Clone, Default)]
pub struct EditLock {
    inner: Arc<Mutex<()>>,
}

/// Releases the gate on drop.
pub struct EditGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl Drop for EditGuard<'_> {
    fn drop(&mut self) {
        debug!("Unlocking edit");
    }
}

impl EditLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits without a timeout.
    pub async fn acquire(&self) -> EditGuard<'_> {
        let guard = self.inner.lock().await;
        debug!("Locked edit");
        EditGuard { _guard: guard }
    }

    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}
