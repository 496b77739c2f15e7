//! Transport seam between the relay core and the socket layer.
//!
//! The core only ever needs three things from a connection: push a frame,
//! close it, and ask whether it is still open. [`ChannelTransport`] provides
//! them for tokio socket tasks: each connection gets a bounded outbound queue
//! drained by its writer task, and a cancellation token that acts as the
//! close signal for both its reader and writer.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::RelayError;
use crate::types::ConnectionId;

/// Default capacity of a connection's outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

/// An encoded frame queued for one connection.
///
/// The payload is shared so a broadcast encodes once and clones a pointer per
/// recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    /// Encoded JSON text
    pub payload: Arc<str>,
}

impl OutboundFrame {
    /// Create a new outbound frame.
    pub fn new(payload: impl Into<Arc<str>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

/// Operations the core needs from the socket layer.
///
/// All three are non-blocking. A send never waits for the peer; when the
/// peer cannot accept the frame right now the send fails and the caller
/// decides whether to skip or report.
pub trait Transport: Send + Sync + 'static {
    /// Queue a frame for a connection.
    fn send(&self, id: ConnectionId, frame: OutboundFrame) -> Result<(), RelayError>;

    /// Close a connection. Returns `false` if it was not open.
    ///
    /// Closing only signals the socket task; the lifecycle `close` transition
    /// runs when that task observes the signal.
    fn close(&self, id: ConnectionId) -> bool;

    /// Whether a connection can still accept frames.
    fn is_open(&self, id: ConnectionId) -> bool;
}

struct ConnectionSink {
    sender: mpsc::Sender<OutboundFrame>,
    closed: CancellationToken,
}

/// Channel-backed [`Transport`] for tokio socket tasks.
///
/// ## Usage
///
/// ```ignore
/// let transport = Arc::new(ChannelTransport::new(64));
///
/// // In the socket task, right after accept:
/// let (mut outbound, closed) = transport.attach(id);
///
/// // Writer half: forward frames until closed
/// tokio::select! {
///     _ = closed.cancelled() => { /* send close frame */ }
///     Some(frame) = outbound.recv() => { /* write frame.payload */ }
/// }
/// ```
pub struct ChannelTransport {
    sinks: DashMap<ConnectionId, ConnectionSink>,
    capacity: usize,
}

impl ChannelTransport {
    /// Create a transport whose per-connection queues hold `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            sinks: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Attach a freshly accepted connection.
    ///
    /// Returns the receiving end of its outbound queue and the token that is
    /// cancelled when the connection is closed from either side.
    #[instrument(skip_all, fields(conn = %id))]
    pub fn attach(&self, id: ConnectionId) -> (mpsc::Receiver<OutboundFrame>, CancellationToken) {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let closed = CancellationToken::new();
        let previous = self.sinks.insert(
            id,
            ConnectionSink {
                sender,
                closed: closed.clone(),
            },
        );
        if let Some(previous) = previous {
            // Handles are never reused; this would be a lifecycle bug.
            warn!("Replaced an existing transport sink");
            previous.closed.cancel();
        } else {
            debug!("Attached transport sink");
        }
        (receiver, closed)
    }

    /// Number of attached connections.
    pub fn connection_count(&self) -> usize {
        self.sinks.len()
    }
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOUND_CAPACITY)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, id: ConnectionId, frame: OutboundFrame) -> Result<(), RelayError> {
        let sender = match self.sinks.get(&id) {
            Some(sink) if !sink.closed.is_cancelled() => sink.sender.clone(),
            Some(_) => return Err(RelayError::send_failure(id, "connection closing")),
            None => return Err(RelayError::send_failure(id, "not connected")),
        };

        match sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(conn = %id, "Outbound queue full, dropping frame");
                Err(RelayError::send_failure(id, "outbound queue full"))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Removal stays with the lifecycle manager.
                debug!(conn = %id, "Outbound queue closed");
                Err(RelayError::send_failure(id, "outbound queue closed"))
            }
        }
    }

    fn close(&self, id: ConnectionId) -> bool {
        match self.sinks.remove(&id) {
            Some((_, sink)) => {
                sink.closed.cancel();
                debug!(conn = %id, "Closed transport sink");
                true
            }
            None => false,
        }
    }

    fn is_open(&self, id: ConnectionId) -> bool {
        self.sinks
            .get(&id)
            .map(|sink| !sink.closed.is_cancelled() && !sink.sender.is_closed())
            .unwrap_or(false)
    }
}

impl fmt::Debug for ChannelTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelTransport")
            .field("connection_count", &self.sinks.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
