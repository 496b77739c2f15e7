//! Persistence Gateway.
//!
//! Users, message history and the admin secret live in one [`Snapshot`]
//! that is loaded once at startup and written back after every mutation.
//!
//! - [`SnapshotStore`]: where snapshots are kept (`load` / `save`)
//! - [`JsonFileStore`]: pretty-printed JSON file on disk
//! - [`PersistenceGateway`]: in-memory snapshot plus the operations the HTTP
//!   routes need

mod gateway;
mod json_file;
#[cfg(test)]
mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use gateway::PersistenceGateway;
pub use json_file::JsonFileStore;
#[cfg(test)]
pub use memory::MemoryStore;

/// Persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot could not be encoded or decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A user known to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// Display name
    pub name: String,
    /// Email address (also the map key)
    pub email: String,
    /// Avatar URL
    #[serde(default)]
    pub picture: String,
    /// First time the user was saved
    pub first_joined: DateTime<Utc>,
    /// Last save or disconnect
    pub last_seen: DateTime<Utc>,
}

/// Identifier of a stored message.
///
/// New messages get a UUID. Snapshots written by earlier deployments carry
/// numeric ids (a millisecond timestamp plus a random fraction), which are
/// kept as they are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Uuid(Uuid),
    Legacy(serde_json::Number),
}

impl MessageId {
    /// Fresh random id.
    pub fn new() -> Self {
        MessageId::Uuid(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

/// A message in the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Unique id
    pub id: MessageId,
    /// Sender email
    #[serde(default)]
    pub from: String,
    /// Recipient email
    #[serde(default)]
    pub to: String,
    /// Body
    #[serde(default)]
    pub message: String,
    /// When it was saved
    pub timestamp: DateTime<Utc>,
}

impl StoredMessage {
    /// Whether `email` sent or received this message.
    pub fn involves(&self, email: &str) -> bool {
        self.from == email || self.to == email
    }
}

/// Everything the server persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Users keyed by email
    #[serde(default)]
    pub users: BTreeMap<String, UserRecord>,
    /// Message history, oldest first
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
    /// Shared admin secret
    pub admin_password: String,
}

impl Snapshot {
    /// Empty snapshot with the given admin secret.
    pub fn with_admin_password(admin_password: impl Into<String>) -> Self {
        Self {
            users: BTreeMap::new(),
            messages: Vec::new(),
            admin_password: admin_password.into(),
        }
    }
}

/// Durable home of the snapshot.
#[async_trait]
pub trait SnapshotStore: Send + Sync + 'static {
    /// Load the stored snapshot, or `None` if nothing has been saved yet.
    async fn load(&self) -> Result<Option<Snapshot>, StoreError>;

    /// Replace the stored snapshot.
    async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError>;
}
