//! In-memory snapshot store for tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Snapshot, SnapshotStore, StoreError};

/// Keeps the last saved snapshot in memory and counts saves.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Mutex<Option<Snapshot>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    /// Store that starts out holding `snapshot`.
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of completed saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Last saved snapshot.
    pub async fn stored(&self) -> Option<Snapshot> {
        self.snapshot.lock().await.clone()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load(&self) -> Result<Option<Snapshot>, StoreError> {
        Ok(self.snapshot.lock().await.clone())
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        *self.snapshot.lock().await = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
