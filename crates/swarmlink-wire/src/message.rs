//! Wire message types.
//!
//! All inter-agent traffic uses a single JSON envelope shape. Field names
//! are part of the interop contract and must not change:
//! `message_id, sender_id, receiver_id, type, content, priority, timestamp,
//! metadata, signature, encrypted`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Receiver sentinel addressing every agent.
pub const BROADCAST_RECEIVER: &str = "*";

/// The kind of an agent message.
///
/// Unknown wire values deserialize to [`MessageType::Unrecognized`] and are
/// handled explicitly by the fallback path instead of failing the parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Task,
    Response,
    Status,
    Error,
    Discovery,
    Heartbeat,
    #[serde(other)]
    Unrecognized,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Text => "text",
            Self::Task => "task",
            Self::Response => "response",
            Self::Status => "status",
            Self::Error => "error",
            Self::Discovery => "discovery",
            Self::Heartbeat => "heartbeat",
            Self::Unrecognized => "unrecognized",
        };
        write!(f, "{s}")
    }
}

/// Delivery priority of a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl std::fmt::Display for MessagePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// The wire envelope exchanged between agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Sender-assigned unique id.
    pub message_id: String,
    /// Originating agent.
    pub sender_id: String,
    /// Destination agent, or [`BROADCAST_RECEIVER`].
    pub receiver_id: String,
    /// Message kind.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Payload. When `encrypted` is set this is the base-framed envelope
    /// (nonce ‖ tag ‖ ciphertext) rather than plaintext.
    pub content: String,
    /// Delivery priority.
    pub priority: MessagePriority,
    /// When the sender created the message.
    pub timestamp: DateTime<Utc>,
    /// Free-form key/value metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Optional hex-encoded Ed25519 signature over `content`.
    #[serde(default)]
    pub signature: Option<String>,
    /// Whether `content` carries an encrypted envelope.
    pub encrypted: bool,
}

impl AgentMessage {
    /// True if the message is addressed to every agent.
    pub fn is_broadcast(&self) -> bool {
        self.receiver_id == BROADCAST_RECEIVER
    }

    /// Serialize to the canonical JSON wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from the JSON wire form.
    pub fn from_json(raw: &str) -> Result<Self, crate::error::WireError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Parse from raw JSON bytes.
    pub fn from_slice(raw: &[u8]) -> Result<Self, crate::error::WireError> {
        Ok(serde_json::from_slice(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AgentMessage {
        AgentMessage {
            message_id: "alice-1700000000000-1".to_string(),
            sender_id: "alice".to_string(),
            receiver_id: "bob".to_string(),
            message_type: MessageType::Task,
            content: "analyze dataset".to_string(),
            priority: MessagePriority::High,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
            signature: None,
            encrypted: false,
        }
    }

    #[test]
    fn test_wire_field_names() {
        let json = sample().to_json().unwrap();
        for field in [
            "message_id",
            "sender_id",
            "receiver_id",
            "\"type\"",
            "content",
            "priority",
            "timestamp",
            "metadata",
            "signature",
            "encrypted",
        ] {
            assert!(json.contains(field), "missing wire field {field} in {json}");
        }
        assert!(json.contains("\"task\""));
        assert!(json.contains("\"high\""));
    }

    #[test]
    fn test_roundtrip() {
        let msg = sample();
        let json = msg.to_json().unwrap();
        let parsed = AgentMessage::from_json(&json).unwrap();
        assert_eq!(parsed.message_id, msg.message_id);
        assert_eq!(parsed.message_type, MessageType::Task);
        assert_eq!(parsed.priority, MessagePriority::High);
    }

    #[test]
    fn test_missing_required_field_fails() {
        let result = AgentMessage::from_json(r#"{"message_id": "m-1", "sender_id": "alice"}"#);
        assert!(matches!(result, Err(crate::error::WireError::Malformed(_))));
    }

    #[test]
    fn test_unknown_type_becomes_unrecognized() {
        let mut json: serde_json::Value = serde_json::to_value(sample()).unwrap();
        json["type"] = "telepathy".into();
        let parsed: AgentMessage = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.message_type, MessageType::Unrecognized);
    }

    #[test]
    fn test_unknown_priority_fails() {
        let mut json: serde_json::Value = serde_json::to_value(sample()).unwrap();
        json["priority"] = "urgent".into();
        let parsed: Result<AgentMessage, _> = serde_json::from_value(json);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_broadcast_sentinel() {
        let mut msg = sample();
        assert!(!msg.is_broadcast());
        msg.receiver_id = BROADCAST_RECEIVER.to_string();
        assert!(msg.is_broadcast());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(MessagePriority::Critical > MessagePriority::High);
        assert!(MessagePriority::High > MessagePriority::Normal);
        assert!(MessagePriority::Normal > MessagePriority::Low);
        assert_eq!(MessagePriority::default(), MessagePriority::Normal);
    }
}
