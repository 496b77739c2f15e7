//! Wire protocol.
//!
//! Every frame is a single JSON object with a `type` discriminator:
//!
//! | Direction | `type`          | Fields                    |
//! |-----------|-----------------|---------------------------|
//! | C→S       | `user_join`     | `name`, `email`, `picture`|
//! | C→S       | `chat_message`  | `from`?, `to`, `message`  |
//! | C→S       | `request_users` |                           |
//! | S→C       | `users_list`    | `users`                   |
//! | S→C       | `user_join`     | `name`, `email`, `picture`|
//! | S→C       | `user_left`     | `email`, `name`           |
//! | S→C       | `chat_message`  | `from`, `to`, `message`   |

use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::types::UserIdentity;

/// Inbound `type` tags this protocol understands.
const CLIENT_MESSAGE_TYPES: &[&str] = &["user_join", "chat_message", "request_users"];

/// Client to server message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Announce identity (PENDING → ACTIVE)
    #[serde(rename = "user_join")]
    Join(UserIdentity),

    /// Direct message to another user
    #[serde(rename = "chat_message")]
    Chat {
        /// Claimed sender; filled from the registry when absent
        #[serde(default)]
        from: Option<String>,
        /// Recipient email
        to: String,
        /// Body, relayed verbatim
        #[serde(rename = "message", alias = "body")]
        body: String,
    },

    /// Ask for the current roster
    #[serde(rename = "request_users")]
    RequestRoster,
}

impl ClientMessage {
    /// Decode one inbound frame.
    ///
    /// Distinguishes an unknown `type` from a structurally broken payload so
    /// the two can be logged differently. Both are discarded by the caller.
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| RelayError::malformed(e.to_string()))?;

        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| RelayError::malformed("missing string field `type`"))?;

        if !CLIENT_MESSAGE_TYPES.contains(&kind) {
            return Err(RelayError::UnknownMessageType(kind.to_string()));
        }

        serde_json::from_value(value).map_err(|e| RelayError::malformed(e.to_string()))
    }

    /// Protocol tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Join(_) => "user_join",
            ClientMessage::Chat { .. } => "chat_message",
            ClientMessage::RequestRoster => "request_users",
        }
    }
}

/// Server to client message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Users present, excluding the recipient
    #[serde(rename = "users_list")]
    Roster {
        /// Present identities in registry order
        users: Vec<UserIdentity>,
    },

    /// A peer joined
    #[serde(rename = "user_join")]
    JoinAnnounce(UserIdentity),

    /// A peer left
    #[serde(rename = "user_left")]
    LeaveAnnounce {
        /// Email of the peer that left
        email: String,
        /// Display name of the peer that left
        name: String,
    },

    /// Direct message delivery
    #[serde(rename = "chat_message")]
    Chat {
        /// Sender email
        from: String,
        /// Recipient email
        to: String,
        /// Body
        #[serde(rename = "message")]
        body: String,
    },
}

impl ServerMessage {
    /// Encode to a JSON text frame.
    pub fn encode(&self) -> String {
        // Every variant is plain strings and vectors of them.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }

    /// Protocol tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Roster { .. } => "users_list",
            ServerMessage::JoinAnnounce(_) => "user_join",
            ServerMessage::LeaveAnnounce { .. } => "user_left",
            ServerMessage::Chat { .. } => "chat_message",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_join() {
        let msg = ClientMessage::parse(
            r#"{"type":"user_join","name":"Ada","email":"ada@x","picture":"p.png"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Join(UserIdentity::new("Ada", "ada@x", "p.png"))
        );
    }

    #[test]
    fn test_parse_chat_with_and_without_from() {
        let msg = ClientMessage::parse(
            r#"{"type":"chat_message","from":"a@x","to":"b@x","message":"hi"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Chat {
                from: Some("a@x".into()),
                to: "b@x".into(),
                body: "hi".into()
            }
        );

        let msg = ClientMessage::parse(r#"{"type":"chat_message","to":"b@x","body":"yo"}"#)
            .unwrap();
        assert!(matches!(msg, ClientMessage::Chat { from: None, ref body, .. } if body == "yo"));
    }

    #[test]
    fn test_parse_request_roster_ignores_extra_fields() {
        let msg = ClientMessage::parse(r#"{"type":"request_users","page":2}"#).unwrap();
        assert_eq!(msg, ClientMessage::RequestRoster);
    }

    #[test]
    fn test_parse_unknown_type() {
        let err = ClientMessage::parse(r#"{"type":"typing","to":"b@x"}"#).unwrap_err();
        assert!(matches!(err, RelayError::UnknownMessageType(ref t) if t == "typing"));
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            ClientMessage::parse("not json").unwrap_err(),
            RelayError::MalformedPayload(_)
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"name":"no type"}"#).unwrap_err(),
            RelayError::MalformedPayload(_)
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"type":42}"#).unwrap_err(),
            RelayError::MalformedPayload(_)
        ));
        // Known type, missing required field
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"chat_message","message":"hi"}"#).unwrap_err(),
            RelayError::MalformedPayload(_)
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"user_join","name":"Ada"}"#).unwrap_err(),
            RelayError::MalformedPayload(_)
        ));
    }

    #[test]
    fn test_encode_server_messages() {
        let roster = ServerMessage::Roster {
            users: vec![UserIdentity::new("Ada", "ada@x", "p.png")],
        };
        let value: serde_json::Value = serde_json::from_str(&roster.encode()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "users_list",
                "users": [{"name": "Ada", "email": "ada@x", "picture": "p.png"}]
            })
        );

        let left = ServerMessage::LeaveAnnounce {
            email: "b@x".into(),
            name: "Bob".into(),
        };
        let value: serde_json::Value = serde_json::from_str(&left.encode()).unwrap();
        assert_eq!(value, json!({"type": "user_left", "email": "b@x", "name": "Bob"}));

        let chat = ServerMessage::Chat {
            from: "a@x".into(),
            to: "b@x".into(),
            body: "hi".into(),
        };
        let value: serde_json::Value = serde_json::from_str(&chat.encode()).unwrap();
        assert_eq!(
            value,
            json!({"type": "chat_message", "from": "a@x", "to": "b@x", "message": "hi"})
        );
    }

    #[test]
    fn test_join_announce_is_flat() {
        let msg = ServerMessage::JoinAnnounce(UserIdentity::new("Ada", "ada@x", ""));
        let value: serde_json::Value = serde_json::from_str(&msg.encode()).unwrap();
        assert_eq!(value["type"], "user_join");
        assert_eq!(value["email"], "ada@x");
        assert_eq!(msg.kind(), "user_join");
    }
}
