//! Test utilities for driving the relay like a socket layer would.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use webcorg_relay::{ChannelTransport, ConnectionId, LifecycleManager, OutboundFrame};

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Relay under test.
pub type Relay = Arc<LifecycleManager<ChannelTransport>>;

/// Initialize tracing for tests.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    });
}

/// Create a relay backed by a channel transport.
pub fn relay() -> Relay {
    init_tracing();
    Arc::new(LifecycleManager::with_transport(Arc::new(ChannelTransport::new(256))))
}

/// One simulated client connection.
pub struct TestClient {
    pub id: ConnectionId,
    pub outbound: mpsc::Receiver<OutboundFrame>,
    pub closed: CancellationToken,
    relay: Relay,
}

impl TestClient {
    /// Accept and attach a new connection.
    pub fn connect(relay: &Relay) -> Self {
        let id = relay.on_accept();
        let (outbound, closed) = relay.transport().attach(id);
        Self {
            id,
            outbound,
            closed,
            relay: Arc::clone(relay),
        }
    }

    /// Send a raw text frame.
    pub fn send_raw(&self, raw: &str) {
        self.relay.on_message(self.id, raw);
    }

    /// Announce identity.
    pub fn join(&self, name: &str, email: &str) {
        self.send_raw(
            &serde_json::json!({
                "type": "user_join",
                "name": name,
                "email": email,
                "picture": format!("https://avatars.test/{name}.png"),
            })
            .to_string(),
        );
    }

    /// Send a chat message.
    pub fn chat(&self, from: &str, to: &str, body: &str) {
        self.send_raw(
            &serde_json::json!({
                "type": "chat_message",
                "from": from,
                "to": to,
                "message": body,
            })
            .to_string(),
        );
    }

    /// Wait for the next frame.
    pub async fn recv(&mut self) -> Value {
        let frame = timeout(DEFAULT_TIMEOUT, self.outbound.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("outbound queue closed");
        serde_json::from_str(&frame.payload).expect("frame is JSON")
    }

    /// Every frame queued so far, without waiting.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            frames.push(serde_json::from_str(&frame.payload).expect("frame is JSON"));
        }
        frames
    }
}

/// Emails listed in a `users_list` frame.
pub fn roster_emails(frame: &Value) -> Vec<String> {
    assert_eq!(frame["type"], "users_list", "not a roster: {frame}");
    frame["users"]
        .as_array()
        .expect("users array")
        .iter()
        .map(|u| u["email"].as_str().expect("email").to_string())
        .collect()
}
