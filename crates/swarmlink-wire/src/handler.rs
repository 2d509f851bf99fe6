//! MessageHandler — per-agent message creation, validation, and dispatch.
//!
//! Keeps in-memory tables of sent and received messages keyed by message id.
//! The received table doubles as the dedup set: a message id seen before is
//! rejected, never reprocessed. Both tables are bounded by age-based
//! eviction via [`MessageHandler::clear_older_than`].

use crate::error::WireError;
use crate::message::{AgentMessage, MessagePriority, MessageType, BROADCAST_RECEIVER};
use chrono::{Duration, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tracing::{debug, error, warn};

/// A registered per-type message processor.
///
/// Processors run synchronously inside [`MessageHandler::process`]; a
/// processor returning `Err` is logged and does not stop the others.
pub type Processor = Box<dyn Fn(&AgentMessage) -> Result<(), String> + Send + Sync>;

/// Per-agent message state and dispatch table.
pub struct MessageHandler {
    agent_id: String,
    /// Monotonic sequence, seeded from wall-clock millis so ids stay unique
    /// across process restarts within the same millisecond window.
    seq: AtomicU64,
    sent: RwLock<HashMap<String, AgentMessage>>,
    received: RwLock<HashMap<String, AgentMessage>>,
    processors: RwLock<HashMap<MessageType, Vec<Processor>>>,
}

impl MessageHandler {
    /// Create a handler for the given agent.
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            seq: AtomicU64::new(Utc::now().timestamp_millis() as u64),
            sent: RwLock::new(HashMap::new()),
            received: RwLock::new(HashMap::new()),
            processors: RwLock::new(HashMap::new()),
        }
    }

    /// The owning agent's id.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Create an outbound message and record it in the sent table.
    pub fn create(
        &self,
        receiver: impl Into<String>,
        content: impl Into<String>,
        message_type: MessageType,
        priority: MessagePriority,
        metadata: HashMap<String, serde_json::Value>,
    ) -> AgentMessage {
        let now = Utc::now();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let msg = AgentMessage {
            message_id: format!("{}-{}-{}", self.agent_id, now.timestamp_millis(), seq),
            sender_id: self.agent_id.clone(),
            receiver_id: receiver.into(),
            message_type,
            content: content.into(),
            priority,
            timestamp: now,
            metadata,
            signature: None,
            encrypted: false,
        };

        let mut sent = self.sent.write().unwrap_or_else(|e| e.into_inner());
        sent.insert(msg.message_id.clone(), msg.clone());
        msg
    }

    /// Register a processor for a message type.
    ///
    /// Processors for the same type run in registration order.
    pub fn register_processor(&self, message_type: MessageType, processor: Processor) {
        let mut processors = self.processors.write().unwrap_or_else(|e| e.into_inner());
        processors.entry(message_type).or_default().push(processor);
    }

    /// Validate an inbound message, returning every problem found.
    ///
    /// An empty result means the message is acceptable: required fields are
    /// present, it is addressed to this agent (or broadcast), its id has not
    /// been seen before, and its type is a known enumeration member.
    pub fn validate(&self, msg: &AgentMessage) -> Vec<String> {
        let mut errors = Vec::new();

        if msg.message_id.is_empty() {
            errors.push("message_id is empty".to_string());
        }
        if msg.sender_id.is_empty() {
            errors.push("sender_id is empty".to_string());
        }
        if msg.receiver_id != self.agent_id && msg.receiver_id != BROADCAST_RECEIVER {
            errors.push(format!(
                "receiver_id '{}' does not match agent '{}'",
                msg.receiver_id, self.agent_id
            ));
        }
        {
            let received = self.received.read().unwrap_or_else(|e| e.into_inner());
            if received.contains_key(&msg.message_id) {
                errors.push(format!("duplicate message_id '{}'", msg.message_id));
            }
        }
        if msg.message_type == MessageType::Unrecognized {
            errors.push("unrecognized message type".to_string());
        }

        errors
    }

    /// Validate, record, and dispatch an inbound message.
    ///
    /// Returns `Ok(None)` when at least one processor handled the message.
    /// Returns `Ok(Some(reply))` when no processor was registered for the
    /// type (or the type was unrecognized): the reply is a synthesized error
    /// message addressed to the sender, which the caller should route back.
    /// Validation failures (duplicates included) return
    /// [`WireError::Validation`]; the message is dropped, not reprocessed.
    pub fn process(&self, msg: &AgentMessage) -> Result<Option<AgentMessage>, WireError> {
        let errors = self.validate(msg);
        let unknown_type = msg.message_type == MessageType::Unrecognized;
        let fatal: Vec<String> = errors
            .iter()
            .filter(|e| *e != "unrecognized message type")
            .cloned()
            .collect();

        if !fatal.is_empty() {
            warn!(
                message_id = %msg.message_id,
                sender = %msg.sender_id,
                errors = ?fatal,
                "Dropping invalid message"
            );
            return Err(WireError::Validation(errors));
        }

        // Record before dispatch so a reprocessing attempt is rejected as a
        // duplicate even if a processor fails.
        {
            let mut received = self.received.write().unwrap_or_else(|e| e.into_inner());
            received.insert(msg.message_id.clone(), msg.clone());
        }

        if unknown_type {
            warn!(
                message_id = %msg.message_id,
                sender = %msg.sender_id,
                "Unrecognized message type; synthesizing error reply"
            );
            return Ok(Some(self.error_reply(msg, "unrecognized message type")));
        }

        let processors = self.processors.read().unwrap_or_else(|e| e.into_inner());
        match processors.get(&msg.message_type) {
            Some(list) if !list.is_empty() => {
                for (index, processor) in list.iter().enumerate() {
                    if let Err(e) = processor(msg) {
                        error!(
                            message_id = %msg.message_id,
                            message_type = %msg.message_type,
                            processor = index,
                            error = %e,
                            "Message processor failed"
                        );
                    }
                }
                debug!(
                    message_id = %msg.message_id,
                    message_type = %msg.message_type,
                    processors = list.len(),
                    "Message processed"
                );
                Ok(None)
            }
            _ => {
                warn!(
                    message_id = %msg.message_id,
                    message_type = %msg.message_type,
                    "No processor registered; synthesizing error reply"
                );
                Ok(Some(self.error_reply(
                    msg,
                    &format!("no processor registered for type '{}'", msg.message_type),
                )))
            }
        }
    }

    /// Evict entries older than `max_age` from both tables.
    ///
    /// Returns `(sent_removed, received_removed)`.
    pub fn clear_older_than(&self, max_age: Duration) -> (usize, usize) {
        let cutoff = Utc::now() - max_age;

        let mut sent = self.sent.write().unwrap_or_else(|e| e.into_inner());
        let before_sent = sent.len();
        sent.retain(|_, m| m.timestamp >= cutoff);
        let sent_removed = before_sent - sent.len();
        drop(sent);

        let mut received = self.received.write().unwrap_or_else(|e| e.into_inner());
        let before_received = received.len();
        received.retain(|_, m| m.timestamp >= cutoff);
        let received_removed = before_received - received.len();

        if sent_removed + received_removed > 0 {
            debug!(sent_removed, received_removed, "Evicted aged messages");
        }
        (sent_removed, received_removed)
    }

    /// Number of messages in the sent table.
    pub fn sent_count(&self) -> usize {
        self.sent.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Number of messages in the received table.
    pub fn received_count(&self) -> usize {
        self.received.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn error_reply(&self, msg: &AgentMessage, reason: &str) -> AgentMessage {
        let mut metadata = HashMap::new();
        metadata.insert("failed_message_id".to_string(), json!(msg.message_id));
        self.create(
            msg.sender_id.clone(),
            reason,
            MessageType::Error,
            MessagePriority::Normal,
            metadata,
        )
    }
}
