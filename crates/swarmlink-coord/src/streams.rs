//! The fixed broker stream and subject layout.
//!
//! This layout is an interop contract; names and subject patterns must be
//! preserved bit-for-bit:
//!
//! | Stream            | Subjects                       | Max age |
//! |-------------------|--------------------------------|---------|
//! | `AGENT_DISCOVERY` | `agents.register/heartbeat/unregister/updates` | 24h |
//! | `AGENT_MESSAGES`  | `messages.>`                   | 7d      |
//! | `TASK_ROUTING`    | `tasks.>`                      | 3d      |
//! | `SYSTEM_EVENTS`   | `events.>`                     | 1d      |
//!
//! Work-queue distribution of `tasks.available` comes from one shared
//! durable pull consumer that all workers fetch from, so each task is
//! claimed by exactly one of them.

use crate::config::CoordConfig;
use crate::error::CoordError;
use async_nats::jetstream;
use async_nats::jetstream::consumer::pull;
use async_nats::jetstream::consumer::AckPolicy;
use async_nats::jetstream::stream::{Config as StreamConfig, RetentionPolicy};
use std::time::Duration;
use swarmlink_wire::EventType;
use tracing::debug;

/// Discovery stream name.
pub const DISCOVERY_STREAM: &str = "AGENT_DISCOVERY";
/// Point-to-point message stream name.
pub const MESSAGE_STREAM: &str = "AGENT_MESSAGES";
/// Task routing stream name.
pub const TASK_STREAM: &str = "TASK_ROUTING";
/// Event stream name.
pub const EVENT_STREAM: &str = "SYSTEM_EVENTS";

/// Agent registration announcements.
pub const SUBJECT_REGISTER: &str = "agents.register";
/// Agent heartbeats.
pub const SUBJECT_HEARTBEAT: &str = "agents.heartbeat";
/// Agent unregistration announcements.
pub const SUBJECT_UNREGISTER: &str = "agents.unregister";
/// Registry-change notifications fanned out to interested subscribers.
pub const SUBJECT_UPDATES: &str = "agents.updates";
/// Shared work-queue subject for unaddressed tasks.
pub const SUBJECT_TASKS_AVAILABLE: &str = "tasks.available";

/// Name of the shared durable consumer competing workers fetch from.
pub const TASK_WORKERS_CONSUMER: &str = "task-workers";

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Subject carrying messages from `sender` to `receiver`.
pub fn message_subject(sender: &str, receiver: &str) -> String {
    format!("messages.{sender}.{receiver}")
}

/// Point-to-point task subject for one agent.
pub fn task_subject(agent_id: &str) -> String {
    format!("tasks.{agent_id}")
}

/// Event subject for one event type.
pub fn event_subject(event_type: &EventType) -> String {
    format!("events.{}", event_type.as_str())
}

/// The four stream definitions.
pub fn stream_configs() -> Vec<StreamConfig> {
    vec![
        StreamConfig {
            name: DISCOVERY_STREAM.to_string(),
            subjects: vec![
                SUBJECT_REGISTER.to_string().into(),
                SUBJECT_HEARTBEAT.to_string().into(),
                SUBJECT_UNREGISTER.to_string().into(),
                SUBJECT_UPDATES.to_string().into(),
            ],
            retention: RetentionPolicy::Limits,
            max_age: 24 * HOUR,
            max_bytes: 64 * 1024 * 1024,
            ..Default::default()
        },
        StreamConfig {
            name: MESSAGE_STREAM.to_string(),
            subjects: vec!["messages.>".to_string().into()],
            retention: RetentionPolicy::Limits,
            max_age: 7 * DAY,
            max_bytes: 512 * 1024 * 1024,
            ..Default::default()
        },
        StreamConfig {
            name: TASK_STREAM.to_string(),
            subjects: vec!["tasks.>".to_string().into()],
            retention: RetentionPolicy::Limits,
            max_age: 3 * DAY,
            max_bytes: 256 * 1024 * 1024,
            ..Default::default()
        },
        StreamConfig {
            name: EVENT_STREAM.to_string(),
            subjects: vec!["events.>".to_string().into()],
            retention: RetentionPolicy::Limits,
            max_age: DAY,
            max_bytes: 128 * 1024 * 1024,
            ..Default::default()
        },
    ]
}

/// Pull-consumer config for the shared task work queue.
pub fn task_workers_config(max_deliver: i64) -> pull::Config {
    pull::Config {
        durable_name: Some(TASK_WORKERS_CONSUMER.to_string()),
        filter_subject: SUBJECT_TASKS_AVAILABLE.to_string(),
        ack_policy: AckPolicy::Explicit,
        max_deliver,
        ack_wait: Duration::from_secs(30),
        ..Default::default()
    }
}

/// Pull-consumer config for one agent's addressed messages.
pub fn agent_messages_config(agent_id: &str, max_deliver: i64) -> pull::Config {
    pull::Config {
        durable_name: Some(messages_consumer_name(agent_id)),
        filter_subject: format!("messages.*.{agent_id}"),
        ack_policy: AckPolicy::Explicit,
        max_deliver,
        ack_wait: Duration::from_secs(30),
        ..Default::default()
    }
}

/// Durable consumer name for one agent's message subscription.
pub fn messages_consumer_name(agent_id: &str) -> String {
    format!("msgs-{agent_id}")
}

/// Idempotently create the four streams and the shared task consumer.
pub async fn provision(
    context: &jetstream::Context,
    config: &CoordConfig,
) -> Result<(), CoordError> {
    for stream_config in stream_configs() {
        let name = stream_config.name.clone();
        context
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| CoordError::Stream(format!("{name}: {e}")))?;
        debug!(stream = %name, "Stream provisioned");
    }

    let task_stream = context
        .get_stream(TASK_STREAM)
        .await
        .map_err(|e| CoordError::Stream(format!("{TASK_STREAM}: {e}")))?;
    task_stream
        .get_or_create_consumer(TASK_WORKERS_CONSUMER, task_workers_config(config.max_deliver))
        .await
        .map_err(|e| CoordError::Consumer(format!("{TASK_WORKERS_CONSUMER}: {e}")))?;
    debug!(consumer = TASK_WORKERS_CONSUMER, "Work-queue consumer provisioned");

    Ok(())
}
