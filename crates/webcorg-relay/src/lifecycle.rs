//! Connection lifecycle manager.
//!
//! Owns the per-connection protocol state machine:
//!
//! ```text
//!   on_accept ──▶ Pending ──user_join──▶ Active ──chat_message / request_users──▶ Active
//!                    │                     │
//!                    └──────on_close───────┴──▶ Closed (terminal)
//! ```
//!
//! The socket layer drives it with three calls per connection: `on_accept`
//! once, `on_message` for every inbound text frame, and `on_close` when the
//! socket ends for any reason. Calls for one connection must come from one
//! task; calls for different connections may run concurrently.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::error::RelayError;
use crate::protocol::ClientMessage;
use crate::registry::{ConnectionRegistry, PresenceEntry};
use crate::routing::{DeliveryOutcome, PresenceRouter};
use crate::transport::Transport;
use crate::types::{CloseCause, ConnectionId, ConnectionState, UserIdentity};

/// Capacity of the presence event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Presence change published to subscribers outside the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// A connection completed its join
    Joined {
        /// Connection that joined
        id: ConnectionId,
        /// Identity it announced
        identity: UserIdentity,
    },
    /// A joined connection closed
    Left {
        /// Connection that closed
        id: ConnectionId,
        /// Identity it had announced
        identity: UserIdentity,
        /// Why it closed
        cause: CloseCause,
    },
}

/// Why an inbound frame produced no transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Not valid JSON or missing required fields
    Malformed,
    /// Valid JSON with an unknown `type`
    UnknownType,
    /// Chat or roster request before the connection joined
    NotJoined,
    /// A second join on an already active connection
    AlreadyJoined,
    /// The registry refused the join
    JoinRejected,
    /// The connection is closed or was never accepted
    Closed,
}

/// What `on_message` did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Pending → Active
    Joined,
    /// A chat message was routed
    Routed(DeliveryOutcome),
    /// A roster reply was queued
    RosterSent,
    /// The frame was dropped with no transition
    Discarded(DiscardReason),
}

/// Drives the relay state machine for every connection.
pub struct LifecycleManager<T: Transport> {
    router: PresenceRouter<T>,
    sessions: DashMap<ConnectionId, ConnectionState>,
    next_id: AtomicU64,
    events: broadcast::Sender<PresenceEvent>,
}

impl<T: Transport> LifecycleManager<T> {
    /// Create a manager over an existing registry and transport.
    pub fn new(registry: Arc<ConnectionRegistry>, transport: Arc<T>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            router: PresenceRouter::new(registry, transport),
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            events,
        }
    }

    /// Create a manager with a fresh registry.
    pub fn with_transport(transport: Arc<T>) -> Self {
        Self::new(Arc::new(ConnectionRegistry::new()), transport)
    }

    /// The presence registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.router.registry()
    }

    /// The transport connections are attached to.
    pub fn transport(&self) -> &Arc<T> {
        self.router.transport()
    }

    /// The routing engine.
    pub fn router(&self) -> &PresenceRouter<T> {
        &self.router
    }

    /// Subscribe to join/leave events.
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.events.subscribe()
    }

    /// Current state of a connection. Unknown handles report `Closed`.
    pub fn state(&self, id: ConnectionId) -> ConnectionState {
        self.sessions
            .get(&id)
            .map(|state| *state)
            .unwrap_or(ConnectionState::Closed)
    }

    /// Number of open connections, joined or not.
    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of joined connections.
    pub fn online_count(&self) -> usize {
        self.registry().len()
    }

    /// Mint a handle for a newly accepted connection.
    ///
    /// The connection starts `Pending`; the registry is not touched.
    pub fn on_accept(&self) -> ConnectionId {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sessions.insert(id, ConnectionState::Pending);
        debug!(conn = %id, "Connection accepted");
        id
    }

    /// Handle one inbound text frame.
    ///
    /// Never fails: anything that cannot be applied is discarded and the
    /// connection stays in its current state.
    #[instrument(skip_all, fields(conn = %id))]
    pub fn on_message(&self, id: ConnectionId, raw: &str) -> MessageOutcome {
        let message = match ClientMessage::parse(raw) {
            Ok(message) => message,
            Err(RelayError::UnknownMessageType(kind)) => {
                debug!(kind = %kind, "Discarding message of unknown type");
                return MessageOutcome::Discarded(DiscardReason::UnknownType);
            }
            Err(e) => {
                warn!(error = %e, "Discarding malformed payload");
                return MessageOutcome::Discarded(DiscardReason::Malformed);
            }
        };

        // Holding the entry serialises this transition against `on_close`
        // for the same handle.
        let Some(mut state) = self.sessions.get_mut(&id) else {
            debug!(kind = message.kind(), "Message for closed connection");
            return MessageOutcome::Discarded(DiscardReason::Closed);
        };

        match (*state, message) {
            (ConnectionState::Pending, ClientMessage::Join(identity)) => {
                match self.router.join(id, identity.clone()) {
                    Ok(_) => {
                        *state = ConnectionState::Active;
                        // Published under the entry guard so `Left` cannot overtake it.
                        let _ = self.events.send(PresenceEvent::Joined { id, identity });
                        drop(state);
                        MessageOutcome::Joined
                    }
                    Err(e) => {
                        error!(error = %e, "Join rejected by registry");
                        MessageOutcome::Discarded(DiscardReason::JoinRejected)
                    }
                }
            }
            (ConnectionState::Active, ClientMessage::Chat { from, to, body }) => {
                drop(state);
                MessageOutcome::Routed(self.router.chat(id, from, &to, body))
            }
            (ConnectionState::Active, ClientMessage::RequestRoster) => {
                drop(state);
                if let Err(e) = self.router.send_roster(id) {
                    warn!(error = %e, "Failed to send roster");
                }
                MessageOutcome::RosterSent
            }
            (ConnectionState::Active, ClientMessage::Join(_)) => {
                debug!("Ignoring repeated join");
                MessageOutcome::Discarded(DiscardReason::AlreadyJoined)
            }
            (current, message) => {
                debug!(state = %current, kind = message.kind(), "Message not allowed in state");
                MessageOutcome::Discarded(DiscardReason::NotJoined)
            }
        }
    }

    /// Drive the close transition for a connection.
    ///
    /// Runs at most once per handle: later calls return `None` and do nothing.
    /// If the connection had joined, the removed entry is returned and a leave
    /// announcement goes to everyone still present.
    #[instrument(skip_all, fields(conn = %id, cause = %cause))]
    pub fn on_close(&self, id: ConnectionId, cause: CloseCause) -> Option<PresenceEntry> {
        let Some((_, previous)) = self.sessions.remove(&id) else {
            debug!("Connection already closed");
            return None;
        };

        let entry = self.router.leave(id);
        self.transport().close(id);

        match &entry {
            Some(entry) => {
                info!(email = %entry.identity.email, "Connection closed");
                let _ = self.events.send(PresenceEvent::Left {
                    id,
                    identity: entry.identity.clone(),
                    cause,
                });
            }
            None => debug!(state = %previous, "Connection closed before joining"),
        }

        entry
    }

    /// Close every live session announced under `email`.
    ///
    /// The close transitions run asynchronously when each socket task sees
    /// its transport close. Returns how many sessions were signalled.
    #[instrument(skip(self))]
    pub fn disconnect_email(&self, email: &str) -> usize {
        let closed = self
            .registry()
            .find_by_email(email)
            .into_iter()
            .filter(|(id, _)| self.transport().close(*id))
            .count();
        info!(sessions = closed, "Forced disconnect");
        closed
    }

    /// Close every open connection, joined or pending.
    pub fn shutdown(&self) -> usize {
        let ids: Vec<ConnectionId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        let closed = ids
            .into_iter()
            .filter(|id| self.transport().close(*id))
            .count();
        info!(connections = closed, "Closing all connections for shutdown");
        closed
    }
}

impl<T: Transport> std::fmt::Debug for LifecycleManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("connections", &self.sessions.len())
            .field("online", &self.registry().len())
            .finish()
    }
}
