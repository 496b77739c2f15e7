//! Error types for the relay core.

use thiserror::Error;

use crate::types::ConnectionId;

/// Relay core errors.
///
/// None of these are fatal to the process. Payload errors cause the inbound
/// frame to be dropped, transport errors cause a single recipient to be
/// skipped, and `DuplicateHandle` aborts only the join that triggered it.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Inbound payload could not be decoded into a protocol message
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Inbound payload declared a `type` the protocol does not know
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    /// A presence entry already exists for this connection
    #[error("Duplicate handle: {0} already has a presence entry")]
    DuplicateHandle(ConnectionId),

    /// The outbound queue of a connection rejected the frame
    #[error("Transport send failure to {id}: {reason}")]
    TransportSendFailure {
        /// Target connection
        id: ConnectionId,
        /// Why the frame was rejected
        reason: String,
    },
}

impl RelayError {
    /// Create a new malformed payload error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedPayload(msg.into())
    }

    /// Create a new transport send failure.
    pub fn send_failure(id: ConnectionId, reason: impl Into<String>) -> Self {
        Self::TransportSendFailure {
            id,
            reason: reason.into(),
        }
    }
}
