//! # webcorg-relay
//!
//! Presence registry and direct-message routing core for WebCorg.
//!
//! This crate owns everything with real state and concurrency concerns:
//! who is connected, what they announced, and where a chat message goes.
//! HTTP surfaces and durable storage live in `webcorg-server`.
//!
//! ## Architecture
//!
//! ```text
//!  socket task ──on_accept/on_message/on_close──▶ LifecycleManager
//!                                                    │ per-connection state (DashMap)
//!                                                    ▼
//!                                              PresenceRouter ──send/close/is_open──▶ Transport
//!                                                    │
//!                                                    ▼
//!                                           ConnectionRegistry (Mutex<BTreeMap>)
//! ```
//!
//! - **Registry**: the single source of truth for presence entries
//! - **Router**: join/chat/roster/leave transitions and broadcast
//! - **Lifecycle**: connection state machine, idempotent close, forced disconnect
//! - **Transport**: the seam to the socket layer (`ChannelTransport` for tokio tasks)

pub mod lifecycle;
pub mod protocol;
pub mod registry;
pub mod routing;
pub mod transport;

mod error;
mod types;

pub use error::RelayError;
pub use lifecycle::{DiscardReason, LifecycleManager, MessageOutcome, PresenceEvent};
pub use protocol::{ClientMessage, ServerMessage};
pub use registry::{ConnectionRegistry, PresenceEntry};
pub use routing::{BroadcastReport, DeliveryOutcome, PresenceRouter};
pub use transport::{ChannelTransport, OutboundFrame, Transport};
pub use types::*;
