//! # Action Envelope
//!
//! Wire messages exchanged between peers.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Message Actions                                    │
//! │                                                                         │
//! │  NEW     A ───► { action: "new",    message: <full snapshot> } ───► B  │
//! │  EDIT    A ───► { action: "edit",   message: <full snapshot> } ───► B  │
//! │  DELETE  A ───► { action: "delete", message: <full snapshot> } ───► B  │
//! │                                                                         │
//! │  Every envelope carries the complete message as it was right after    │
//! │  the action, so a receiver never needs an earlier envelope to apply   │
//! │  a later one (except that edit/delete need the id to be known).       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format (JSON)
//! ```json
//! {
//!   "action": "edit",
//!   "message": {
//!     "id": "3f0c…",
//!     "senderName": "Alice",
//!     "content": "hello world",
//!     "timestamp": "2025-09-03T10:00:00Z",
//!     "isEdited": true,
//!     "isDeleted": false
//!   }
//! }
//! ```
//!
//! Unknown extra fields are ignored so newer peers can add fields without
//! breaking older ones.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::message::Message;

// =============================================================================
// Message Action
// =============================================================================

/// What happened to the message carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum MessageAction {
    /// A freshly composed message.
    New,
    /// Content of an existing message changed.
    Edit,
    /// An existing message was deleted.
    Delete,
}

impl std::fmt::Display for MessageAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageAction::New => write!(f, "new"),
            MessageAction::Edit => write!(f, "edit"),
            MessageAction::Delete => write!(f, "delete"),
        }
    }
}

// =============================================================================
// Action Envelope
// =============================================================================

/// A message snapshot tagged with the action that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEnvelope {
    pub action: MessageAction,
    pub message: Message,
}

impl ActionEnvelope {
    /// Tags `message` with `action`.
    pub fn wrap(action: MessageAction, message: Message) -> Self {
        ActionEnvelope { action, message }
    }

    /// Id of the message this envelope refers to.
    #[inline]
    pub fn message_id(&self) -> &str {
        self.message.id()
    }

    /// Serializes to JSON string.
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserializes from JSON string.
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let envelope: ActionEnvelope = serde_json::from_str(json)?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Encodes to the byte payload handed to a transport.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a payload received from a transport.
    ///
    /// Any failure (not UTF-8, not JSON, unknown action, missing field, bad
    /// timestamp, empty id) is reported as [`CoreError::InvalidEnvelope`].
    pub fn decode(payload: &[u8]) -> CoreResult<Self> {
        let envelope: ActionEnvelope = serde_json::from_slice(payload)?;
        envelope.validate()?;
        Ok(envelope)
    }

    fn validate(&self) -> CoreResult<()> {
        if self.message.id().trim().is_empty() {
            return Err(CoreError::InvalidEnvelope("message id is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample(action: MessageAction, content: &str, sender: &str) -> ActionEnvelope {
        let at = Utc.with_ymd_and_hms(2025, 9, 3, 10, 0, 0).unwrap();
        let deleted = action == MessageAction::Delete;
        let edited = action == MessageAction::Edit;
        ActionEnvelope::wrap(
            action,
            Message::from_parts("m-1", sender, content, at, edited, deleted),
        )
    }

    #[test]
    fn test_envelope_serialization() {
        let envelope = sample(MessageAction::New, "hello", "Alice");
        let json = envelope.to_json().unwrap();
        assert!(json.contains("\"action\":\"new\""));
        assert!(json.contains("\"senderName\":\"Alice\""));

        let parsed = ActionEnvelope::from_json(&json).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn test_round_trip_edge_values() {
        // Deleted messages carry empty content; names may be any unicode.
        let cases = [
            sample(MessageAction::Delete, "", "Zoë 🚀"),
            sample(MessageAction::Edit, "ünïcödé \"quoted\"\n", "李雷"),
            ActionEnvelope::wrap(MessageAction::New, Message::new("Alice", "")),
        ];
        for envelope in cases {
            let bytes = envelope.encode().unwrap();
            assert_eq!(ActionEnvelope::decode(&bytes).unwrap(), envelope);
        }
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let json = r#"{
            "action": "edit",
            "protocolVersion": 7,
            "message": {
                "id": "m-1", "senderName": "Bob", "content": "hi",
                "timestamp": "2025-09-03T10:00:00Z",
                "isEdited": true, "isDeleted": false,
                "reactions": ["👍"]
            }
        }"#;
        let envelope = ActionEnvelope::from_json(json).unwrap();
        assert_eq!(envelope.action, MessageAction::Edit);
        assert_eq!(envelope.message_id(), "m-1");
        assert!(envelope.message.is_edited());
    }

    #[test]
    fn test_decode_rejects_malformed_payloads() {
        let bad: [&[u8]; 5] = [
            b"not json",
            b"{\"action\":\"new\"}",
            br#"{"action":"shout","message":{"id":"m","senderName":"a","content":"","timestamp":"2025-09-03T10:00:00Z"}}"#,
            br#"{"action":"new","message":{"id":"m","senderName":"a","content":"","timestamp":"yesterday"}}"#,
            br#"{"action":"new","message":{"id":"","senderName":"a","content":"","timestamp":"2025-09-03T10:00:00Z"}}"#,
        ];
        for payload in bad {
            let err = ActionEnvelope::decode(payload).unwrap_err();
            assert!(matches!(err, CoreError::InvalidEnvelope(_)), "{:?}", err);
        }
    }

    #[test]
    fn test_action_display() {
        assert_eq!(MessageAction::New.to_string(), "new");
        assert_eq!(MessageAction::Delete.to_string(), "delete");
    }
}
