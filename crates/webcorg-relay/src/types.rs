//! Common types for the relay core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier for one live transport connection.
///
/// Handles are minted by the [`LifecycleManager`](crate::LifecycleManager)
/// from a monotonically increasing counter and are never reused, so ordering
/// by handle is the same as ordering by accept time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw handle value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identity a client announces when it joins.
///
/// `email` is the routing key. Nothing here is checked against the persisted
/// user store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Display name
    pub name: String,
    /// Email address, used as the routing key
    pub email: String,
    /// Avatar reference (usually a URL)
    #[serde(rename = "picture", alias = "avatarRef", default)]
    pub avatar_ref: String,
}

impl UserIdentity {
    /// Create a new identity.
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        avatar_ref: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            avatar_ref: avatar_ref.into(),
        }
    }
}

/// Connection state in the relay protocol lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connected, identity not yet announced
    Pending,
    /// Identified and present in the registry
    Active,
    /// Terminal; registry entry removed
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Pending => write!(f, "pending"),
            ConnectionState::Active => write!(f, "active"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Why a connection closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    /// The client closed the socket
    Voluntary,
    /// The socket failed
    Error,
    /// The server closed it (admin removal or shutdown)
    Forced,
}

impl std::fmt::Display for CloseCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseCause::Voluntary => write!(f, "voluntary"),
            CloseCause::Error => write!(f, "error"),
            CloseCause::Forced => write!(f, "forced"),
        }
    }
}

/// A direct message passing through the router.
///
/// The core only decides live delivery or drop; durable copies belong to the
/// persistence layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedMessage {
    /// Sender email
    pub from: String,
    /// Recipient email
    pub to: String,
    /// Message body, relayed verbatim
    pub body: String,
    /// When the router accepted the message
    pub timestamp: DateTime<Utc>,
}

impl RoutedMessage {
    /// Create a routed message stamped with the current time.
    pub fn new(from: impl Into<String>, to: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            body: body.into(),
            timestamp: Utc::now(),
        }
    }
}
