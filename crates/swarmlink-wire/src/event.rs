//! System events — typed notifications fanned out to registered handlers.
//!
//! Components signal state changes (agent joined, task completed, errors) as
//! [`SystemEvent`]s. The [`EventRouter`] keeps an ordered list of handlers
//! per event type plus one wildcard list, invoked synchronously within the
//! owning loop; no background threads are involved.

use crate::message::MessagePriority;
use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, error};

/// The kind of a system event.
///
/// Serialized as its string tag (the same token used as the broker subject
/// suffix, `events.<type>`). Unknown tags deserialize as [`EventType::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    AgentJoined,
    AgentLeft,
    AgentUpdated,
    TaskCompleted,
    TaskFailed,
    Error,
    Custom(String),
}

impl EventType {
    /// The wire tag / subject suffix for this event type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::AgentJoined => "agent_joined",
            Self::AgentLeft => "agent_left",
            Self::AgentUpdated => "agent_updated",
            Self::TaskCompleted => "task_completed",
            Self::TaskFailed => "task_failed",
            Self::Error => "error",
            Self::Custom(tag) => tag,
        }
    }

    /// Parse a wire tag; unknown tags become [`EventType::Custom`].
    pub fn parse(tag: &str) -> Self {
        match tag {
            "agent_joined" => Self::AgentJoined,
            "agent_left" => Self::AgentLeft,
            "agent_updated" => Self::AgentUpdated,
            "task_completed" => Self::TaskCompleted,
            "task_failed" => Self::TaskFailed,
            "error" => Self::Error,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        if tag.is_empty() {
            return Err(D::Error::custom("empty event type"));
        }
        Ok(Self::parse(&tag))
    }
}

/// A state-change notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemEvent {
    /// Unique event id.
    pub event_id: String,
    /// Event kind.
    pub event_type: EventType,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// Component or agent that emitted the event.
    pub source: String,
    /// Event-specific payload.
    pub payload: serde_json::Value,
    /// Optional id correlating this event with a message or task.
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Event priority.
    pub priority: MessagePriority,
}

impl SystemEvent {
    /// Create an event with a fresh id and the current timestamp.
    pub fn new(event_type: EventType, source: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type,
            timestamp: Utc::now(),
            source: source.into(),
            payload,
            correlation_id: None,
            priority: MessagePriority::Normal,
        }
    }

    /// Attach a correlation id.
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }
}

/// A registered event handler.
///
/// Handler errors are logged and never propagated to the publisher.
pub type EventHandler = Box<dyn Fn(&SystemEvent) -> Result<(), String> + Send + Sync>;

/// Synchronous fan-out of [`SystemEvent`]s to registered handlers.
#[derive(Default)]
pub struct EventRouter {
    typed: RwLock<HashMap<EventType, Vec<EventHandler>>>,
    wildcard: RwLock<Vec<EventHandler>>,
}

impl EventRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event type. Handlers for the same type run
    /// in registration order.
    pub fn on(&self, event_type: EventType, handler: EventHandler) {
        let mut typed = self.typed.write().unwrap_or_else(|e| e.into_inner());
        typed.entry(event_type).or_default().push(handler);
    }

    /// Register a catch-all handler invoked for every event, after the typed
    /// handlers.
    pub fn on_any(&self, handler: EventHandler) {
        let mut wildcard = self.wildcard.write().unwrap_or_else(|e| e.into_inner());
        wildcard.push(handler);
    }

    /// Dispatch an event to its typed handlers and then the wildcard list.
    ///
    /// Returns the number of handlers invoked.
    pub fn dispatch(&self, event: &SystemEvent) -> usize {
        let mut invoked = 0;

        {
            let typed = self.typed.read().unwrap_or_else(|e| e.into_inner());
            if let Some(handlers) = typed.get(&event.event_type) {
                for handler in handlers {
                    invoked += 1;
                    if let Err(e) = handler(event) {
                        error!(
                            event_id = %event.event_id,
                            event_type = %event.event_type,
                            error = %e,
                            "Event handler failed"
                        );
                    }
                }
            }
        }

        let wildcard = self.wildcard.read().unwrap_or_else(|e| e.into_inner());
        for handler in wildcard.iter() {
            invoked += 1;
            if let Err(e) = handler(event) {
                error!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    error = %e,
                    "Wildcard event handler failed"
                );
            }
        }

        debug!(event_id = %event.event_id, event_type = %event.event_type, invoked, "Event dispatched");
        invoked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_event_type_wire_tags() {
        assert_eq!(EventType::AgentJoined.as_str(), "agent_joined");
        assert_eq!(EventType::parse("task_failed"), EventType::TaskFailed);
        assert_eq!(
            EventType::parse("deployment_rolled_back"),
            EventType::Custom("deployment_rolled_back".to_string())
        );
    }

    #[test]
    fn test_event_serde_roundtrip() {
        let event = SystemEvent::new(
            EventType::TaskCompleted,
            "worker-3",
            serde_json::json!({"task": "t-9"}),
        )
        .with_correlation("t-9");

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"task_completed\""));

        let parsed: SystemEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type, EventType::TaskCompleted);
        assert_eq!(parsed.correlation_id.as_deref(), Some("t-9"));
    }

    #[test]
    fn test_typed_handlers_run_in_order() {
        let router = EventRouter::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let order = order.clone();
            router.on(
                EventType::Error,
                Box::new(move |_| {
                    order.lock().unwrap().push(tag);
                    Ok(())
                }),
            );
        }

        let event = SystemEvent::new(EventType::Error, "test", serde_json::Value::Null);
        assert_eq!(router.dispatch(&event), 2);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_wildcard_receives_everything() {
        let router = EventRouter::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        router.on_any(Box::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        router.dispatch(&SystemEvent::new(EventType::AgentJoined, "a", serde_json::Value::Null));
        router.dispatch(&SystemEvent::new(EventType::TaskFailed, "b", serde_json::Value::Null));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_handler_error_does_not_stop_others() {
        let router = EventRouter::new();
        let reached = Arc::new(AtomicUsize::new(0));

        router.on(EventType::Error, Box::new(|_| Err("boom".to_string())));
        let r = reached.clone();
        router.on(
            EventType::Error,
            Box::new(move |_| {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let event = SystemEvent::new(EventType::Error, "test", serde_json::Value::Null);
        assert_eq!(router.dispatch(&event), 2);
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_untargeted_event_only_hits_wildcard() {
        let router = EventRouter::new();
        router.on(EventType::AgentLeft, Box::new(|_| Ok(())));

        let event = SystemEvent::new(EventType::AgentJoined, "test", serde_json::Value::Null);
        assert_eq!(router.dispatch(&event), 0);
    }
}
