//! Coordination service configuration with production defaults.

use std::time::Duration;

/// Default broker URL.
pub const DEFAULT_URL: &str = "nats://127.0.0.1:4222";

/// Default liveness window: an agent is Online if it heartbeated within this
/// many seconds.
pub const DEFAULT_LIVENESS_WINDOW_SECS: u64 = 60;

/// Default connection attempt ceiling.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;

/// Default delay between connection attempts.
pub const DEFAULT_CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Tunables for a [`crate::CoordinationService`].
#[derive(Debug, Clone)]
pub struct CoordConfig {
    /// Broker URL.
    pub url: String,
    /// This agent's stable identifier; used for durable consumer names and
    /// message subjects.
    pub agent_id: String,
    /// Liveness window in seconds (heartbeats older than this mark an agent
    /// Stale).
    pub liveness_window_secs: u64,
    /// Connection attempts before giving up (fatal).
    pub connect_attempts: u32,
    /// Fixed delay between connection attempts.
    pub connect_retry_delay: Duration,
    /// Messages pulled per batch fetch.
    pub fetch_batch: usize,
    /// Poll timeout per batch fetch; keeps consume loops responsive to
    /// cancellation when no messages are pending.
    pub fetch_expires: Duration,
    /// Maximum broker deliveries per message; beyond this the message is
    /// dead-lettered.
    pub max_deliver: i64,
}

impl CoordConfig {
    /// Defaults for the given agent id.
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Self::default()
        }
    }
}

impl Default for CoordConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            agent_id: format!("agent-{}", anon_suffix()),
            liveness_window_secs: DEFAULT_LIVENESS_WINDOW_SECS,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_retry_delay: DEFAULT_CONNECT_RETRY_DELAY,
            fetch_batch: 10,
            fetch_expires: Duration::from_millis(500),
            max_deliver: 3,
        }
    }
}

/// Short time-based suffix for anonymous agent ids.
fn anon_suffix() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    format!("{millis:x}")
}
