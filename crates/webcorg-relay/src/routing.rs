//! Presence and routing engine.
//!
//! Implements the transitions that touch the registry: join, chat routing,
//! roster replies, and leave. The per-connection state machine that decides
//! *whether* a transition is allowed lives in [`crate::lifecycle`].
//!
//! ## Delivery rules
//!
//! - Roster replies go only to the requesting connection and never include it.
//! - A join sends the roster to the joiner before announcing the joiner to
//!   everybody else.
//! - Chat is at-most-one delivery: the oldest session registered under the
//!   recipient email gets the message, nobody else does.
//! - Broadcast skips connections whose transport is no longer open and keeps
//!   going when a send fails. It never removes anything from the registry.

use std::sync::Arc;

use chrono::Utc;

use tracing::{debug, info, instrument, warn};

use crate::error::RelayError;
use crate::protocol::ServerMessage;
use crate::registry::{ConnectionRegistry, PresenceEntry};
use crate::transport::{OutboundFrame, Transport};
use crate::types::{ConnectionId, RoutedMessage, UserIdentity};

/// Result of routing a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Queued on the first session registered under the recipient email
    Delivered(ConnectionId),
    /// Nobody with that email is present; the message was dropped
    RecipientOffline,
    /// The recipient was present but its queue rejected the frame
    SendFailed(ConnectionId),
}

impl DeliveryOutcome {
    /// Whether the message reached a live session.
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered(_))
    }
}

/// Counts from one broadcast pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Frames queued
    pub delivered: usize,
    /// Recipients skipped because they were closing or their queue failed
    pub skipped: usize,
}

/// Routes presence and chat traffic between registered connections.
pub struct PresenceRouter<T: Transport> {
    registry: Arc<ConnectionRegistry>,
    transport: Arc<T>,
}

impl<T: Transport> PresenceRouter<T> {
    /// Create a router over a registry and transport.
    pub fn new(registry: Arc<ConnectionRegistry>, transport: Arc<T>) -> Self {
        Self {
            registry,
            transport,
        }
    }

    /// The registry this router reads and writes.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The transport frames are pushed to.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Register `identity` on `id`, reply with the roster, then announce.
    ///
    /// Returns how many peers the join announcement was queued for and how
    /// many were skipped.
    #[instrument(skip_all, fields(conn = %id, email = %identity.email))]
    pub fn join(&self, id: ConnectionId, identity: UserIdentity) -> Result<BroadcastReport, RelayError> {
        self.registry.insert(id, identity.clone())?;
        info!(name = %identity.name, "User joined");

        let roster = ServerMessage::Roster {
            users: self.registry.snapshot_others(id),
        };
        if let Err(e) = self.send(id, &roster) {
            warn!(error = %e, "Failed to send roster to joining connection");
        }

        Ok(self.broadcast(&ServerMessage::JoinAnnounce(identity), Some(id)))
    }

    /// Route a chat message from `sender`.
    ///
    /// When `from` is `None` the sender's registered email is used. Otherwise
    /// the claimed sender is relayed as given.
    #[instrument(skip_all, fields(conn = %sender, to = %to))]
    pub fn chat(
        &self,
        sender: ConnectionId,
        from: Option<String>,
        to: &str,
        body: String,
    ) -> DeliveryOutcome {
        let from = match from {
            Some(from) => from,
            None => self
                .registry
                .get(sender)
                .map(|identity| identity.email)
                .unwrap_or_default(),
        };
        let message = RoutedMessage::new(from, to, body);

        let Some((target, _)) = self.registry.find_by_email(to).into_iter().next() else {
            debug!(from = %message.from, "Recipient offline, message dropped");
            return DeliveryOutcome::RecipientOffline;
        };

        let frame = ServerMessage::Chat {
            from: message.from,
            to: message.to,
            body: message.body,
        };
        match self.send(target, &frame) {
            Ok(()) => {
                debug!(target = %target, "Message delivered");
                DeliveryOutcome::Delivered(target)
            }
            Err(e) => {
                warn!(target = %target, error = %e, "Message delivery failed");
                DeliveryOutcome::SendFailed(target)
            }
        }
    }

    /// Reply to `id` with everyone else currently present.
    pub fn send_roster(&self, id: ConnectionId) -> Result<(), RelayError> {
        let roster = ServerMessage::Roster {
            users: self.registry.snapshot_others(id),
        };
        self.send(id, &roster)
    }

    /// Remove `id` from the registry and announce the departure.
    ///
    /// Returns the removed entry, or `None` (and announces nothing) if the
    /// connection never joined.
    #[instrument(skip_all, fields(conn = %id))]
    pub fn leave(&self, id: ConnectionId) -> Option<PresenceEntry> {
        let entry = self.registry.remove(id)?;
        let online_secs = (Utc::now() - entry.joined_at).num_seconds();
        info!(
            email = %entry.identity.email,
            name = %entry.identity.name,
            online_secs,
            "User left"
        );

        let announce = ServerMessage::LeaveAnnounce {
            email: entry.identity.email.clone(),
            name: entry.identity.name.clone(),
        };
        self.broadcast(&announce, Some(id));
        Some(entry)
    }

    /// Send `message` to every registered connection except `excluding`.
    ///
    /// The recipient list is taken in one registry read; the lock is released
    /// before any frame is queued.
    pub fn broadcast(&self, message: &ServerMessage, excluding: Option<ConnectionId>) -> BroadcastReport {
        let frame = OutboundFrame::new(message.encode());
        let mut report = BroadcastReport::default();

        for target in self.registry.connection_ids_except(excluding) {
            if !self.transport.is_open(target) {
                report.skipped += 1;
                continue;
            }
            match self.transport.send(target, frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!(target = %target, error = %e, "Skipping broadcast recipient");
                    report.skipped += 1;
                }
            }
        }

        debug!(
            kind = message.kind(),
            delivered = report.delivered,
            skipped = report.skipped,
            "Broadcast complete"
        );
        report
    }

    fn send(&self, id: ConnectionId, message: &ServerMessage) -> Result<(), RelayError> {
        self.transport.send(id, OutboundFrame::new(message.encode()))
    }
}
