//! Snapshot stored as a JSON file.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{Snapshot, SnapshotStore, StoreError};

/// Keeps the snapshot in a single pretty-printed JSON file.
///
/// Saves go to a sibling temporary file that is then renamed over the
/// target, so a crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> Result<Option<Snapshot>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No snapshot file yet");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let snapshot = serde_json::from_slice(&bytes)?;
        debug!(bytes = bytes.len(), "Snapshot loaded");
        Ok(Some(snapshot))
    }

    #[instrument(skip(self, snapshot), fields(path = %self.path.display()))]
    async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, &bytes).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        debug!(bytes = bytes.len(), "Snapshot saved");
        Ok(())
    }
}
