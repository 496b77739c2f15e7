//! In-memory snapshot with write-through persistence.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use super::{MessageId, Snapshot, SnapshotStore, StoredMessage, StoreError, UserRecord};

/// Owns the live snapshot and writes it back after every mutation.
///
/// The write lock is held across the save so the stored file always matches
/// the order in which mutations were applied.
pub struct PersistenceGateway {
    store: Arc<dyn SnapshotStore>,
    snapshot: RwLock<Snapshot>,
}

impl PersistenceGateway {
    /// Load the snapshot from `store`.
    ///
    /// A missing snapshot starts empty with `default_admin_password`. A
    /// snapshot that exists but cannot be read is an error; the stored data
    /// is left untouched.
    #[instrument(skip_all)]
    pub async fn open(
        store: Arc<dyn SnapshotStore>,
        default_admin_password: &str,
    ) -> Result<Self, StoreError> {
        let snapshot = match store.load().await {
            Ok(Some(snapshot)) => {
                info!(
                    users = snapshot.users.len(),
                    messages = snapshot.messages.len(),
                    "Snapshot loaded"
                );
                snapshot
            }
            Ok(None) => {
                info!("No snapshot found, starting empty");
                Snapshot::with_admin_password(default_admin_password)
            }
            Err(e) => {
                error!(error = %e, "Failed to load snapshot");
                return Err(e);
            }
        };

        Ok(Self {
            store,
            snapshot: RwLock::new(snapshot),
        })
    }

    /// Compare `password` with the admin secret.
    pub async fn verify_admin(&self, password: &str) -> bool {
        let ok = self.snapshot.read().await.admin_password == password;
        if !ok {
            warn!("Admin password rejected");
        }
        ok
    }

    /// All known users, keyed by email.
    pub async fn users(&self) -> BTreeMap<String, UserRecord> {
        self.snapshot.read().await.users.clone()
    }

    /// Full message history, oldest first.
    pub async fn messages(&self) -> Vec<StoredMessage> {
        self.snapshot.read().await.messages.clone()
    }

    /// Messages sent or received by `email`, oldest first.
    pub async fn messages_for(&self, email: &str) -> Vec<StoredMessage> {
        self.snapshot
            .read()
            .await
            .messages
            .iter()
            .filter(|m| m.involves(email))
            .cloned()
            .collect()
    }

    /// Create a user, or refresh `lastSeen` if the email is already known.
    ///
    /// Name and picture of an existing user are left untouched.
    #[instrument(skip(self, name, picture), fields(email = %email))]
    pub async fn upsert_user(
        &self,
        name: &str,
        email: &str,
        picture: &str,
    ) -> Result<UserRecord, StoreError> {
        let now = Utc::now();
        let mut snapshot = self.snapshot.write().await;
        let record = snapshot
            .users
            .entry(email.to_string())
            .and_modify(|user| user.last_seen = now)
            .or_insert_with(|| {
                debug!("New user");
                UserRecord {
                    name: name.to_string(),
                    email: email.to_string(),
                    picture: picture.to_string(),
                    first_joined: now,
                    last_seen: now,
                }
            })
            .clone();
        self.store.save(&snapshot).await?;
        Ok(record)
    }

    /// Set `lastSeen` of a known user to now. Returns `false` for unknown emails.
    #[instrument(skip(self), fields(email = %email))]
    pub async fn touch_last_seen(&self, email: &str) -> Result<bool, StoreError> {
        let mut snapshot = self.snapshot.write().await;
        let Some(user) = snapshot.users.get_mut(email) else {
            return Ok(false);
        };
        user.last_seen = Utc::now();
        self.store.save(&snapshot).await?;
        Ok(true)
    }

    /// Delete a user. Returns `false` if the email was unknown.
    ///
    /// Message history is kept.
    #[instrument(skip(self), fields(email = %email))]
    pub async fn remove_user(&self, email: &str) -> Result<bool, StoreError> {
        let mut snapshot = self.snapshot.write().await;
        if snapshot.users.remove(email).is_none() {
            return Ok(false);
        }
        self.store.save(&snapshot).await?;
        info!("User removed");
        Ok(true)
    }

    /// Append a message to the history with a fresh id and timestamp.
    #[instrument(skip(self, message), fields(from = %from, to = %to))]
    pub async fn append_message(
        &self,
        from: &str,
        to: &str,
        message: &str,
    ) -> Result<StoredMessage, StoreError> {
        let stored = StoredMessage {
            id: MessageId::new(),
            from: from.to_string(),
            to: to.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        };
        let mut snapshot = self.snapshot.write().await;
        snapshot.messages.push(stored.clone());
        self.store.save(&snapshot).await?;
        Ok(stored)
    }

    /// Write the current snapshot out.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let snapshot = self.snapshot.read().await;
        self.store.save(&snapshot).await
    }
}
