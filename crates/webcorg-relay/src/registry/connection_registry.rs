//! Connection Registry implementation.
//!
//! Tracks identified connections by handle for roster replies, broadcast and
//! direct delivery.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument};

use crate::error::RelayError;
use crate::types::{ConnectionId, UserIdentity};

/// Presence entry stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    /// Connection this identity was announced on
    pub id: ConnectionId,
    /// Announced identity
    pub identity: UserIdentity,
    /// When the join was processed
    pub joined_at: DateTime<Utc>,
}

/// Registry of identified connections.
///
/// Every operation takes the single lock for exactly its own duration, so an
/// iteration can never observe a half-applied insert or remove. The lock is
/// never held by callers across a network send: reads return owned copies.
///
/// Entries are keyed by [`ConnectionId`], which increases with accept order.
/// Iteration order is therefore stable and oldest-first, which is what makes
/// first-match delivery deterministic when one email has several sessions.
///
/// ## Usage
///
/// ```ignore
/// let registry = ConnectionRegistry::new();
///
/// // When a join is processed:
/// registry.insert(id, identity)?;
///
/// // When routing a chat:
/// let targets = registry.find_by_email("b@example.com");
///
/// // When a connection closes:
/// registry.remove(id);
/// ```
pub struct ConnectionRegistry {
    entries: Mutex<BTreeMap<ConnectionId, PresenceEntry>>,
}

impl ConnectionRegistry {
    /// Create a new connection registry.
    pub fn new() -> Self {
        info!("Creating connection registry");
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ConnectionId, PresenceEntry>> {
        // A panic while holding the lock cannot leave a half-written map:
        // every critical section is a single BTreeMap call.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register presence for a connection.
    ///
    /// Fails with [`RelayError::DuplicateHandle`] if the handle already has an
    /// entry; the existing entry is left untouched.
    #[instrument(skip_all, fields(conn = %id, email = %identity.email))]
    pub fn insert(&self, id: ConnectionId, identity: UserIdentity) -> Result<(), RelayError> {
        let mut entries = self.lock();
        if entries.contains_key(&id) {
            error!("Presence entry already exists for handle");
            return Err(RelayError::DuplicateHandle(id));
        }
        entries.insert(
            id,
            PresenceEntry {
                id,
                identity,
                joined_at: Utc::now(),
            },
        );
        debug!(count = entries.len(), "Registered presence");
        Ok(())
    }

    /// Remove and return the entry for a connection.
    ///
    /// Returns `None` if the connection never joined.
    #[instrument(skip_all, fields(conn = %id))]
    pub fn remove(&self, id: ConnectionId) -> Option<PresenceEntry> {
        let removed = self.lock().remove(&id);
        if removed.is_some() {
            debug!("Unregistered presence");
        } else {
            debug!("Connection had no presence entry");
        }
        removed
    }

    /// Identity registered for a connection, if any.
    pub fn get(&self, id: ConnectionId) -> Option<UserIdentity> {
        self.lock().get(&id).map(|entry| entry.identity.clone())
    }

    /// Check if a connection has a presence entry.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Number of identified connections.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nobody is present.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// All connections announced under `email`, oldest first.
    pub fn find_by_email(&self, email: &str) -> Vec<(ConnectionId, UserIdentity)> {
        self.lock()
            .values()
            .filter(|entry| entry.identity.email == email)
            .map(|entry| (entry.id, entry.identity.clone()))
            .collect()
    }

    /// All identities except the one on `excluding`, in registry order.
    pub fn snapshot_others(&self, excluding: ConnectionId) -> Vec<UserIdentity> {
        self.lock()
            .values()
            .filter(|entry| entry.id != excluding)
            .map(|entry| entry.identity.clone())
            .collect()
    }

    /// Broadcast target list: every identified connection except `excluding`.
    pub fn connection_ids_except(&self, excluding: Option<ConnectionId>) -> Vec<ConnectionId> {
        self.lock()
            .keys()
            .copied()
            .filter(|id| Some(*id) != excluding)
            .collect()
    }

    /// All present identities, in registry order.
    ///
    /// Useful for health checks and diagnostics.
    pub fn list_identities(&self) -> Vec<UserIdentity> {
        self.lock()
            .values()
            .map(|entry| entry.identity.clone())
            .collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connection_count", &self.len())
            .finish()
    }
}
