//! Connection Registry for presence and message routing.
//!
//! Holds the authoritative mapping from live connection handle to announced
//! identity. Only joined connections appear here; pending ones are tracked by
//! the lifecycle manager.
//!
//! ## Architecture
//!
//! ```text
//! socket task (conn-1) ──join──▶ ConnectionRegistry ◀──find_by_email── socket task (conn-2)
//!                                        │
//!                                        ▼
//!                          Mutex<BTreeMap<ConnectionId, PresenceEntry>>
//! ```

mod connection_registry;

pub use connection_registry::{ConnectionRegistry, PresenceEntry};
