//! Swarmlink wire layer — message envelopes, validation, and dispatch.
//!
//! Defines the JSON message shape exchanged between agents, the per-agent
//! [`MessageHandler`] that validates, deduplicates, and dispatches inbound
//! messages, and the [`SystemEvent`] fan-out router.
//!
//! ## Architecture
//!
//! - **AgentMessage**: The wire envelope (typed, prioritized, optionally
//!   signed and/or encrypted)
//! - **MessageHandler**: Sent/received tables, duplicate rejection, per-type
//!   processor dispatch with a fallback
//! - **SystemEvent / EventRouter**: Typed event fan-out to registered
//!   handlers plus a wildcard list

pub mod error;
pub mod event;
pub mod handler;
pub mod message;

pub use error::WireError;
pub use event::{EventRouter, EventType, SystemEvent};
pub use handler::{MessageHandler, Processor};
pub use message::{AgentMessage, MessagePriority, MessageType, BROADCAST_RECEIVER};
