//! Swarmlink coordination layer — the broker side of the system.
//!
//! Owns the NATS connection, provisions the durable JetStream streams and
//! pull consumers, tracks agent liveness from discovery heartbeats, and
//! routes point-to-point messages and work-queue tasks with
//! acknowledgment-based redelivery.
//!
//! ## Architecture
//!
//! - **CoordinationService**: Connection lifecycle, publish/subscribe,
//!   task routing, health
//! - **AgentRegistry**: Registered peers with lazily evaluated liveness
//! - **streams**: The fixed stream/subject layout (interop contract)
//! - **CoordConfig**: Tunables with production defaults

pub mod config;
pub mod error;
pub mod registry;
pub mod service;
pub mod streams;

pub use config::CoordConfig;
pub use error::CoordError;
pub use registry::{
    AgentRegistry, AgentStatus, AgentUpdate, DiscoveryAnnounce, HeartbeatPing, PeerRegistration,
    UpdateKind,
};
pub use service::{CoordinationService, HealthStatus, MessageCallback};
