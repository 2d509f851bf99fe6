//! Agent registry — discovered peers and their liveness.
//!
//! Liveness is evaluated lazily at query time against the configured window;
//! no background timer mutates the table. State machine per agent:
//! Unknown → Online (heartbeat within the window) → Stale (window elapsed)
//! → Unknown (explicit unregister).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Discovery announcement published to `agents.register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryAnnounce {
    /// The registering agent.
    pub agent_id: String,
    /// Advertised capabilities.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// When the announcement was made.
    pub timestamp: DateTime<Utc>,
}

/// Heartbeat published to `agents.heartbeat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPing {
    /// The heartbeating agent.
    pub agent_id: String,
    /// When the heartbeat was sent.
    pub timestamp: DateTime<Utc>,
}

/// Registry-change notification published to `agents.updates`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentUpdate {
    /// The agent whose registration changed.
    pub agent_id: String,
    /// What happened.
    pub change: UpdateKind,
}

/// The kind of registry change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Registered,
    Unregistered,
}

/// A registered peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRegistration {
    /// The peer's stable identifier.
    pub agent_id: String,
    /// Capabilities it advertised at registration.
    pub capabilities: Vec<String>,
    /// When the peer first registered.
    pub registered_at: DateTime<Utc>,
    /// Last heartbeat (or registration) time.
    pub last_seen: DateTime<Utc>,
}

/// Derived liveness of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    /// Heartbeat received within the liveness window.
    Online,
    /// Registered, but no heartbeat within the window.
    Stale,
    /// Never registered, or explicitly unregistered.
    Unknown,
}

/// Thread-safe registry of all known agents.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    agents: Arc<RwLock<HashMap<String, PeerRegistration>>>,
    liveness_window: Duration,
}

impl AgentRegistry {
    /// Create an empty registry with the given liveness window.
    pub fn new(liveness_window_secs: u64) -> Self {
        Self {
            agents: Arc::new(RwLock::new(HashMap::new())),
            liveness_window: Duration::seconds(liveness_window_secs as i64),
        }
    }

    /// Register or re-register an agent, refreshing `last_seen`.
    pub fn register(&self, agent_id: &str, capabilities: Vec<String>) -> PeerRegistration {
        self.register_at(agent_id, capabilities, Utc::now())
    }

    fn register_at(
        &self,
        agent_id: &str,
        capabilities: Vec<String>,
        now: DateTime<Utc>,
    ) -> PeerRegistration {
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        match agents.get_mut(agent_id) {
            Some(entry) => {
                entry.capabilities = capabilities;
                entry.last_seen = now;
                entry.clone()
            }
            None => {
                let entry = PeerRegistration {
                    agent_id: agent_id.to_string(),
                    capabilities,
                    registered_at: now,
                    last_seen: now,
                };
                agents.insert(agent_id.to_string(), entry.clone());
                entry
            }
        }
    }

    /// Record a heartbeat for an already-registered agent.
    ///
    /// Returns `false` (and mutates nothing) when the agent is unknown:
    /// registration and heartbeat are distinct, intentional operations.
    pub fn heartbeat(&self, agent_id: &str) -> bool {
        self.heartbeat_at(agent_id, Utc::now())
    }

    fn heartbeat_at(&self, agent_id: &str, now: DateTime<Utc>) -> bool {
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        match agents.get_mut(agent_id) {
            Some(entry) => {
                entry.last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Remove an agent entirely.
    pub fn unregister(&self, agent_id: &str) -> Option<PeerRegistration> {
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        agents.remove(agent_id)
    }

    /// Snapshot of one agent's registration.
    pub fn get(&self, agent_id: &str) -> Option<PeerRegistration> {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        agents.get(agent_id).cloned()
    }

    /// Derived status of an agent, evaluated against the current time.
    pub fn status(&self, agent_id: &str) -> AgentStatus {
        self.status_at(agent_id, Utc::now())
    }

    /// Derived status of an agent at a given instant.
    pub fn status_at(&self, agent_id: &str, now: DateTime<Utc>) -> AgentStatus {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        match agents.get(agent_id) {
            Some(entry) if now - entry.last_seen <= self.liveness_window => AgentStatus::Online,
            Some(_) => AgentStatus::Stale,
            None => AgentStatus::Unknown,
        }
    }

    /// All registrations.
    pub fn list(&self) -> Vec<PeerRegistration> {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        agents.values().cloned().collect()
    }

    /// Total registered agents (online or stale).
    pub fn len(&self) -> usize {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        agents.len()
    }

    /// True when no agents are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of agents currently within the liveness window.
    pub fn online_count(&self) -> usize {
        self.online_count_at(Utc::now())
    }

    fn online_count_at(&self, now: DateTime<Utc>) -> usize {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        agents
            .values()
            .filter(|r| now - r.last_seen <= self.liveness_window)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_get() {
        let registry = AgentRegistry::new(60);
        registry.register("alice", vec!["search".to_string()]);

        let entry = registry.get("alice").unwrap();
        assert_eq!(entry.agent_id, "alice");
        assert_eq!(entry.capabilities, vec!["search"]);
        assert_eq!(registry.status("alice"), AgentStatus::Online);
    }

    #[test]
    fn test_reregister_updates_capabilities() {
        let registry = AgentRegistry::new(60);
        registry.register("alice", vec!["search".to_string()]);
        registry.register("alice", vec!["search".to_string(), "browse".to_string()]);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("alice").unwrap().capabilities.len(), 2);
    }

    #[test]
    fn test_heartbeat_unknown_agent_is_dropped() {
        let registry = AgentRegistry::new(60);
        assert!(!registry.heartbeat("ghost"));
        assert_eq!(registry.status("ghost"), AgentStatus::Unknown);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_liveness_timeline() {
        // Registered at t=0, heartbeats at t=10 and t=20, nothing after.
        // With a 60s window: Online at t=50, Stale at t=100.
        let registry = AgentRegistry::new(60);
        let t0 = Utc::now();
        registry.register_at("alice", vec![], t0);
        assert!(registry.heartbeat_at("alice", t0 + Duration::seconds(10)));
        assert!(registry.heartbeat_at("alice", t0 + Duration::seconds(20)));

        assert_eq!(
            registry.status_at("alice", t0 + Duration::seconds(50)),
            AgentStatus::Online
        );
        assert_eq!(
            registry.status_at("alice", t0 + Duration::seconds(100)),
            AgentStatus::Stale
        );
    }

    #[test]
    fn test_unregister_returns_to_unknown() {
        let registry = AgentRegistry::new(60);
        registry.register("alice", vec![]);
        assert_eq!(registry.status("alice"), AgentStatus::Online);

        let removed = registry.unregister("alice");
        assert!(removed.is_some());
        assert_eq!(registry.status("alice"), AgentStatus::Unknown);
        assert!(registry.unregister("alice").is_none());
    }

    #[test]
    fn test_online_count_is_lazy() {
        let registry = AgentRegistry::new(60);
        let t0 = Utc::now();
        registry.register_at("fresh", vec![], t0);
        registry.register_at("old", vec![], t0 - Duration::seconds(120));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.online_count_at(t0), 1);
        assert_eq!(registry.status_at("old", t0), AgentStatus::Stale);
    }
}
