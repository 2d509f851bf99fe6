//! CoordinationService — connection lifecycle, routing, and consume loops.
//!
//! One service instance owns the broker connection for its process. All
//! background loops (discovery listener, message/task consumers) are spawned
//! tokio tasks that check a shared stop signal each iteration, so
//! `disconnect()` cancels them cooperatively — never mid-acknowledgment.
//!
//! Delivery semantics are at-least-once: a message is acknowledged only
//! after its callback returns `Ok`; a failing callback triggers a negative
//! acknowledgment and broker redelivery up to the configured maximum, after
//! which the message is dead-lettered (logged and acked away, not silently
//! lost and not retried forever).

use crate::config::CoordConfig;
use crate::error::CoordError;
use crate::registry::{
    AgentRegistry, AgentUpdate, DiscoveryAnnounce, HeartbeatPing, UpdateKind,
};
use crate::streams;
use async_nats::jetstream;
use async_nats::jetstream::consumer::pull;
use async_nats::jetstream::AckKind;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swarmlink_wire::{AgentMessage, EventRouter, EventType, SystemEvent};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Callback supplied by the agent runtime for inbound messages.
///
/// Returning `Err` triggers a negative acknowledgment and redelivery.
#[async_trait]
pub trait MessageCallback: Send + Sync + 'static {
    /// Handle one delivered message.
    async fn on_message(&self, message: AgentMessage) -> Result<(), String>;
}

/// Read-only health snapshot; querying it has no side effects.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Whether the broker connection is up.
    pub connected: bool,
    /// Total registered agents.
    pub known_agents: usize,
    /// Agents within the liveness window right now.
    pub online_agents: usize,
    /// Running consume/listener loops.
    pub active_subscriptions: usize,
}

/// The broker coordination service.
pub struct CoordinationService {
    config: CoordConfig,
    client: async_nats::Client,
    jetstream: jetstream::Context,
    registry: AgentRegistry,
    router: Arc<EventRouter>,
    stop: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    active_subscriptions: Arc<AtomicUsize>,
    connected: AtomicBool,
}

impl CoordinationService {
    /// Connect to the broker, provision streams and the shared work-queue
    /// consumer, and start the discovery listener.
    ///
    /// Connection attempts are retried with a fixed delay up to the
    /// configured ceiling; exhausting it is fatal
    /// ([`CoordError::RetriesExhausted`]).
    pub async fn connect(config: CoordConfig) -> Result<Arc<Self>, CoordError> {
        let client = connect_with_retry(&config).await?;
        let context = jetstream::new(client.clone());
        streams::provision(&context, &config).await?;

        let (stop, _) = watch::channel(false);
        let service = Arc::new(Self {
            registry: AgentRegistry::new(config.liveness_window_secs),
            router: Arc::new(EventRouter::new()),
            client,
            jetstream: context,
            stop,
            tasks: Mutex::new(Vec::new()),
            active_subscriptions: Arc::new(AtomicUsize::new(0)),
            connected: AtomicBool::new(true),
            config,
        });
        service.spawn_discovery_listener().await?;

        info!(
            agent_id = %service.config.agent_id,
            url = %service.config.url,
            "Coordination service connected"
        );
        Ok(service)
    }

    /// This service's agent id.
    pub fn agent_id(&self) -> &str {
        &self.config.agent_id
    }

    /// The agent registry (registrations and liveness).
    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// The local event router; register handlers here before publishing.
    pub fn events(&self) -> &EventRouter {
        &self.router
    }

    /// Announce an agent on the discovery stream.
    ///
    /// Every subscriber (this process included) updates its registry from
    /// the announcement and fans out an `agents.updates` notification.
    pub async fn register_agent(
        &self,
        agent_id: &str,
        capabilities: Vec<String>,
    ) -> Result<(), CoordError> {
        self.ensure_connected()?;
        let announce = DiscoveryAnnounce {
            agent_id: agent_id.to_string(),
            capabilities,
            timestamp: Utc::now(),
        };
        self.publish_core(streams::SUBJECT_REGISTER, serde_json::to_vec(&announce)?)
            .await
    }

    /// Publish a liveness heartbeat for an already-registered agent.
    pub async fn send_heartbeat(&self, agent_id: &str) -> Result<(), CoordError> {
        self.ensure_connected()?;
        let ping = HeartbeatPing {
            agent_id: agent_id.to_string(),
            timestamp: Utc::now(),
        };
        self.publish_core(streams::SUBJECT_HEARTBEAT, serde_json::to_vec(&ping)?)
            .await
    }

    /// Remove an agent from the registry and notify subscribers.
    pub async fn unregister_agent(&self, agent_id: &str) -> Result<(), CoordError> {
        self.ensure_connected()?;
        let announce = DiscoveryAnnounce {
            agent_id: agent_id.to_string(),
            capabilities: Vec::new(),
            timestamp: Utc::now(),
        };
        self.publish_core(streams::SUBJECT_UNREGISTER, serde_json::to_vec(&announce)?)
            .await
    }

    /// Publish a point-to-point message onto the durable message stream.
    ///
    /// The publish ack is awaited, so the message survives a broker restart
    /// once this returns. Ordering is FIFO per sender/receiver pair only.
    pub async fn send_message(&self, message: &AgentMessage) -> Result<(), CoordError> {
        self.ensure_connected()?;
        let subject = streams::message_subject(&message.sender_id, &message.receiver_id);
        let payload = serde_json::to_vec(message)?;
        self.publish_durable(subject, payload).await?;
        debug!(
            message_id = %message.message_id,
            receiver = %message.receiver_id,
            "Message published"
        );
        Ok(())
    }

    /// Route a task to explicit targets, or into the shared work queue.
    ///
    /// With `targets`, one copy is published per target agent (fan-out).
    /// Without, the task goes to `tasks.available`, where exactly one
    /// competing worker will claim it.
    pub async fn route_task(
        &self,
        task: &AgentMessage,
        targets: Option<&[String]>,
    ) -> Result<(), CoordError> {
        self.ensure_connected()?;
        let payload = serde_json::to_vec(task)?;
        match targets {
            Some(agents) => {
                for agent_id in agents {
                    self.publish_durable(streams::task_subject(agent_id), payload.clone())
                        .await?;
                }
                debug!(
                    message_id = %task.message_id,
                    targets = agents.len(),
                    "Task fanned out to explicit targets"
                );
            }
            None => {
                self.publish_durable(streams::SUBJECT_TASKS_AVAILABLE.to_string(), payload)
                    .await?;
                debug!(message_id = %task.message_id, "Task queued for any worker");
            }
        }
        Ok(())
    }

    /// Consume messages addressed to this agent.
    ///
    /// Opens a durable pull consumer filtered to
    /// `messages.*.<agent_id>` and runs a background loop that fetches small
    /// batches, invokes the callback per message, and acknowledges only
    /// after the callback returns `Ok`.
    pub async fn subscribe_to_messages(
        &self,
        callback: Arc<dyn MessageCallback>,
    ) -> Result<(), CoordError> {
        self.ensure_connected()?;
        let name = streams::messages_consumer_name(&self.config.agent_id);
        let consumer = self
            .pull_consumer(
                streams::MESSAGE_STREAM,
                &name,
                streams::agent_messages_config(&self.config.agent_id, self.config.max_deliver),
            )
            .await?;
        self.spawn_consume_loop(consumer, callback, "messages");
        Ok(())
    }

    /// Compete for tasks on the shared work queue.
    ///
    /// All subscribers across all processes fetch from the same durable
    /// consumer, so each queued task is delivered to exactly one of them.
    pub async fn subscribe_to_tasks(
        &self,
        callback: Arc<dyn MessageCallback>,
    ) -> Result<(), CoordError> {
        self.ensure_connected()?;
        let consumer = self
            .pull_consumer(
                streams::TASK_STREAM,
                streams::TASK_WORKERS_CONSUMER,
                streams::task_workers_config(self.config.max_deliver),
            )
            .await?;
        self.spawn_consume_loop(consumer, callback, "tasks");
        Ok(())
    }

    /// Fire-and-forget publish of a system event.
    ///
    /// The event goes to `events.<type>` on the event stream and is also
    /// dispatched to locally registered handlers. No acknowledgment is
    /// tracked.
    pub async fn publish_event(&self, event: &SystemEvent) -> Result<(), CoordError> {
        self.ensure_connected()?;
        let subject = streams::event_subject(&event.event_type);
        self.publish_core(subject, serde_json::to_vec(event)?).await?;
        self.router.dispatch(event);
        Ok(())
    }

    /// Health snapshot; a pure read with no side effects.
    pub fn health_check(&self) -> HealthStatus {
        let connected = self.connected.load(Ordering::SeqCst)
            && self.client.connection_state() == async_nats::connection::State::Connected;
        HealthStatus {
            connected,
            known_agents: self.registry.len(),
            online_agents: self.registry.online_count(),
            active_subscriptions: self.active_subscriptions.load(Ordering::SeqCst),
        }
    }

    /// Stop all consume loops, drain pending publishes, and close the
    /// connection. Idempotent: repeated calls are no-ops.
    pub async fn disconnect(&self) -> Result<(), CoordError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.stop.send(true);

        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }

        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "Flush on disconnect failed");
        }
        info!(agent_id = %self.config.agent_id, "Coordination service disconnected");
        Ok(())
    }

    fn ensure_connected(&self) -> Result<(), CoordError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoordError::NotConnected)
        }
    }

    async fn publish_core(
        &self,
        subject: impl Into<String>,
        payload: Vec<u8>,
    ) -> Result<(), CoordError> {
        self.client
            .publish(subject.into(), payload.into())
            .await
            .map_err(|e| CoordError::Publish(e.to_string()))
    }

    async fn publish_durable(&self, subject: String, payload: Vec<u8>) -> Result<(), CoordError> {
        self.jetstream
            .publish(subject, payload.into())
            .await
            .map_err(|e| CoordError::Publish(e.to_string()))?
            .await
            .map_err(|e| CoordError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn pull_consumer(
        &self,
        stream_name: &str,
        consumer_name: &str,
        config: pull::Config,
    ) -> Result<jetstream::consumer::Consumer<pull::Config>, CoordError> {
        let stream = self
            .jetstream
            .get_stream(stream_name)
            .await
            .map_err(|e| CoordError::Stream(format!("{stream_name}: {e}")))?;
        stream
            .get_or_create_consumer(consumer_name, config)
            .await
            .map_err(|e| CoordError::Consumer(format!("{consumer_name}: {e}")))
    }

    /// Subscribe to the three discovery subjects and apply them to the
    /// registry from one background task.
    async fn spawn_discovery_listener(self: &Arc<Self>) -> Result<(), CoordError> {
        let mut register_sub = self.subscribe_core(streams::SUBJECT_REGISTER).await?;
        let mut heartbeat_sub = self.subscribe_core(streams::SUBJECT_HEARTBEAT).await?;
        let mut unregister_sub = self.subscribe_core(streams::SUBJECT_UNREGISTER).await?;

        let service = Arc::clone(self);
        let mut stop_rx = self.stop.subscribe();
        let subscriptions = Arc::clone(&self.active_subscriptions);
        subscriptions.fetch_add(1, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                    Some(msg) = register_sub.next() => {
                        service.handle_register(&msg.payload).await;
                    }
                    Some(msg) = heartbeat_sub.next() => {
                        service.handle_heartbeat(&msg.payload);
                    }
                    Some(msg) = unregister_sub.next() => {
                        service.handle_unregister(&msg.payload).await;
                    }
                    else => break,
                }
            }
            subscriptions.fetch_sub(1, Ordering::SeqCst);
            debug!("Discovery listener stopped");
        });
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).push(handle);
        Ok(())
    }

    async fn subscribe_core(
        &self,
        subject: &'static str,
    ) -> Result<async_nats::Subscriber, CoordError> {
        self.client
            .subscribe(subject)
            .await
            .map_err(|e| CoordError::Subscribe(format!("{subject}: {e}")))
    }

    async fn handle_register(&self, payload: &[u8]) {
        let announce: DiscoveryAnnounce = match serde_json::from_slice(payload) {
            Ok(a) => a,
            Err(e) => {
                warn!(error = %e, "Dropping malformed registration");
                return;
            }
        };
        self.registry.register(&announce.agent_id, announce.capabilities.clone());
        info!(agent_id = %announce.agent_id, "Agent registered");

        self.notify_update(&announce.agent_id, UpdateKind::Registered).await;
        self.router.dispatch(&SystemEvent::new(
            EventType::AgentJoined,
            announce.agent_id.clone(),
            serde_json::json!({ "capabilities": announce.capabilities }),
        ));
    }

    fn handle_heartbeat(&self, payload: &[u8]) {
        let ping: HeartbeatPing = match serde_json::from_slice(payload) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Dropping malformed heartbeat");
                return;
            }
        };
        if self.registry.heartbeat(&ping.agent_id) {
            debug!(agent_id = %ping.agent_id, "Heartbeat");
        } else {
            // Heartbeats never auto-register; registration is explicit.
            warn!(agent_id = %ping.agent_id, "Heartbeat from unknown agent dropped");
        }
    }

    async fn handle_unregister(&self, payload: &[u8]) {
        let announce: DiscoveryAnnounce = match serde_json::from_slice(payload) {
            Ok(a) => a,
            Err(e) => {
                warn!(error = %e, "Dropping malformed unregistration");
                return;
            }
        };
        if self.registry.unregister(&announce.agent_id).is_some() {
            info!(agent_id = %announce.agent_id, "Agent unregistered");
            self.notify_update(&announce.agent_id, UpdateKind::Unregistered).await;
            self.router.dispatch(&SystemEvent::new(
                EventType::AgentLeft,
                announce.agent_id.clone(),
                serde_json::Value::Null,
            ));
        } else {
            warn!(agent_id = %announce.agent_id, "Unregister for unknown agent ignored");
        }
    }

    async fn notify_update(&self, agent_id: &str, change: UpdateKind) {
        let update = AgentUpdate {
            agent_id: agent_id.to_string(),
            change,
        };
        match serde_json::to_vec(&update) {
            Ok(payload) => {
                if let Err(e) = self.publish_core(streams::SUBJECT_UPDATES, payload).await {
                    warn!(error = %e, "Failed to publish registry update");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode registry update"),
        }
    }

    /// Run a fetch/process/ack loop over a pull consumer until stopped.
    ///
    /// Each iteration checks the stop signal, then fetches a small batch
    /// with a short expiry so the loop stays responsive when idle. A message
    /// is acked only after its callback succeeds; failures are Nak'd for
    /// redelivery until the delivery budget is spent, then dead-lettered.
    fn spawn_consume_loop(
        &self,
        consumer: jetstream::consumer::Consumer<pull::Config>,
        callback: Arc<dyn MessageCallback>,
        label: &'static str,
    ) {
        let stop_rx = self.stop.subscribe();
        let batch = self.config.fetch_batch;
        let expires = self.config.fetch_expires;
        let max_deliver = self.config.max_deliver;
        let subscriptions = Arc::clone(&self.active_subscriptions);
        subscriptions.fetch_add(1, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            loop {
                if *stop_rx.borrow() {
                    break;
                }

                let fetched = consumer
                    .fetch()
                    .max_messages(batch)
                    .expires(expires)
                    .messages()
                    .await;
                let mut messages = match fetched {
                    Ok(messages) => messages,
                    Err(e) => {
                        warn!(label, error = %e, "Batch fetch failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };

                while let Some(next) = messages.next().await {
                    let msg = match next {
                        Ok(msg) => msg,
                        Err(e) => {
                            warn!(label, error = %e, "Batch stream error");
                            break;
                        }
                    };
                    deliver(&msg, callback.as_ref(), max_deliver, label).await;
                }
            }
            subscriptions.fetch_sub(1, Ordering::SeqCst);
            debug!(label, "Consume loop stopped");
        });
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).push(handle);
    }
}

/// Process one delivered broker message: parse, invoke, acknowledge.
async fn deliver(
    msg: &jetstream::Message,
    callback: &dyn MessageCallback,
    max_deliver: i64,
    label: &'static str,
) {
    let delivered = msg.info().map(|i| i.delivered).unwrap_or(1);

    let parsed = match AgentMessage::from_slice(&msg.payload) {
        Ok(parsed) => parsed,
        Err(e) => {
            // A malformed payload cannot become valid on retry; drop it.
            warn!(label, error = %e, "Dropping malformed payload");
            if let Err(e) = msg.ack().await {
                warn!(label, error = %e, "Ack of malformed payload failed");
            }
            return;
        }
    };

    let message_id = parsed.message_id.clone();
    match callback.on_message(parsed).await {
        Ok(()) => {
            if let Err(e) = msg.ack().await {
                warn!(label, message_id = %message_id, error = %e, "Ack failed");
            }
        }
        Err(cause) if delivered >= max_deliver => {
            error!(
                label,
                message_id = %message_id,
                delivered,
                error = %cause,
                "Delivery budget exhausted; dead-lettering message"
            );
            if let Err(e) = msg.ack().await {
                warn!(label, message_id = %message_id, error = %e, "Dead-letter ack failed");
            }
        }
        Err(cause) => {
            warn!(
                label,
                message_id = %message_id,
                delivered,
                error = %cause,
                "Handler failed; requesting redelivery"
            );
            if let Err(e) = msg.ack_with(AckKind::Nak(None)).await {
                warn!(label, message_id = %message_id, error = %e, "Nak failed");
            }
        }
    }
}

/// Bounded connection retry with a fixed delay between attempts.
async fn connect_with_retry(config: &CoordConfig) -> Result<async_nats::Client, CoordError> {
    let attempts = config.connect_attempts.max(1);
    let mut last = String::new();
    for attempt in 1..=attempts {
        match async_nats::connect(config.url.as_str()).await {
            Ok(client) => return Ok(client),
            Err(e) => {
                warn!(
                    attempt,
                    attempts,
                    url = %config.url,
                    error = %e,
                    "Broker connection attempt failed"
                );
                last = e.to_string();
                if attempt < attempts {
                    tokio::time::sleep(config.connect_retry_delay).await;
                }
            }
        }
    }
    Err(CoordError::RetriesExhausted { attempts, last })
}
