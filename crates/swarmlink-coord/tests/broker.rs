//! End-to-end tests against a live broker.
//!
//! These tests need a local JetStream-enabled server
//! (`nats-server -js -p 4222`) and are ignored by default:
//!
//! ```sh
//! cargo test -p swarmlink-coord -- --ignored
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swarmlink_coord::{CoordConfig, CoordinationService, MessageCallback};
use swarmlink_identity::{EncryptedEnvelope, EncryptionChannel, IdentityStore};
use swarmlink_wire::{AgentMessage, MessageHandler, MessagePriority, MessageType};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("swarmlink_coord=debug")
        .try_init();
}

fn test_config(agent_id: &str) -> CoordConfig {
    CoordConfig {
        connect_attempts: 1,
        connect_retry_delay: Duration::from_millis(100),
        fetch_expires: Duration::from_millis(200),
        ..CoordConfig::new(agent_id)
    }
}

/// Collects delivered messages, optionally failing the first N deliveries.
struct Collector {
    seen: Mutex<Vec<AgentMessage>>,
    fail_first: usize,
    attempts: AtomicUsize,
}

impl Collector {
    fn new(fail_first: usize) -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            fail_first,
            attempts: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl MessageCallback for Collector {
    async fn on_message(&self, message: AgentMessage) -> Result<(), String> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Err("transient handler failure".to_string());
        }
        self.seen.lock().unwrap().push(message);
        Ok(())
    }
}

async fn wait_for<F: Fn() -> bool>(deadline: Duration, check: F) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    check()
}

#[tokio::test]
#[ignore = "requires a running nats-server with JetStream"]
async fn durable_point_to_point_delivery() {
    init_tracing();
    let sender = CoordinationService::connect(test_config("p2p-sender")).await.unwrap();
    let receiver = CoordinationService::connect(test_config("p2p-receiver")).await.unwrap();

    let collector = Collector::new(0);
    receiver.subscribe_to_messages(collector.clone()).await.unwrap();

    let handler = MessageHandler::new("p2p-sender");
    let msg = handler.create(
        "p2p-receiver",
        "status report",
        MessageType::Status,
        MessagePriority::Normal,
        HashMap::new(),
    );
    sender.send_message(&msg).await.unwrap();

    assert!(wait_for(Duration::from_secs(5), || !collector.seen.lock().unwrap().is_empty()).await);
    let seen = collector.seen.lock().unwrap();
    assert_eq!(seen[0].message_id, msg.message_id);
    assert_eq!(seen[0].content, "status report");

    drop(seen);
    sender.disconnect().await.unwrap();
    receiver.disconnect().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running nats-server with JetStream"]
async fn failed_callback_is_redelivered() {
    init_tracing();
    let service = CoordinationService::connect(test_config("redeliver-agent")).await.unwrap();

    // Fail the first delivery; the Nak must bring the message back.
    let collector = Collector::new(1);
    service.subscribe_to_messages(collector.clone()).await.unwrap();

    let handler = MessageHandler::new("other");
    let msg = handler.create(
        "redeliver-agent",
        "flaky payload",
        MessageType::Task,
        MessagePriority::High,
        HashMap::new(),
    );
    service.send_message(&msg).await.unwrap();

    assert!(wait_for(Duration::from_secs(10), || !collector.seen.lock().unwrap().is_empty()).await);
    assert!(collector.attempts.load(Ordering::SeqCst) >= 2);

    service.disconnect().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running nats-server with JetStream"]
async fn work_queue_delivers_to_exactly_one_worker() {
    init_tracing();
    let router = CoordinationService::connect(test_config("task-router")).await.unwrap();
    let worker_a = CoordinationService::connect(test_config("worker-a")).await.unwrap();
    let worker_b = CoordinationService::connect(test_config("worker-b")).await.unwrap();

    let seen_a = Collector::new(0);
    let seen_b = Collector::new(0);
    worker_a.subscribe_to_tasks(seen_a.clone()).await.unwrap();
    worker_b.subscribe_to_tasks(seen_b.clone()).await.unwrap();

    let handler = MessageHandler::new("task-router");
    let mut queued = Vec::new();
    for i in 0..10 {
        let task = handler.create(
            "*",
            format!("job {i}"),
            MessageType::Task,
            MessagePriority::Normal,
            HashMap::new(),
        );
        router.route_task(&task, None).await.unwrap();
        queued.push(task.message_id);
    }

    assert!(
        wait_for(Duration::from_secs(10), || {
            seen_a.seen.lock().unwrap().len() + seen_b.seen.lock().unwrap().len() >= 10
        })
        .await
    );

    // Every task claimed exactly once across the two workers.
    let mut claimed: Vec<String> = seen_a
        .seen
        .lock()
        .unwrap()
        .iter()
        .chain(seen_b.seen.lock().unwrap().iter())
        .map(|m| m.message_id.clone())
        .collect();
    claimed.sort();
    claimed.dedup();
    assert_eq!(claimed.len(), 10);

    router.disconnect().await.unwrap();
    worker_a.disconnect().await.unwrap();
    worker_b.disconnect().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running nats-server with JetStream"]
async fn discovery_and_liveness_over_broker() {
    init_tracing();
    let service = CoordinationService::connect(test_config("observer")).await.unwrap();

    service
        .register_agent("crawler-1", vec!["crawl".to_string()])
        .await
        .unwrap();
    assert!(wait_for(Duration::from_secs(5), || service.registry().get("crawler-1").is_some()).await);

    service.send_heartbeat("crawler-1").await.unwrap();
    // Heartbeat for an agent nobody registered must be dropped, not added.
    service.send_heartbeat("phantom").await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(service.registry().get("phantom").is_none());

    let health = service.health_check();
    assert!(health.connected);
    assert_eq!(health.known_agents, 1);

    service.unregister_agent("crawler-1").await.unwrap();
    assert!(wait_for(Duration::from_secs(5), || service.registry().get("crawler-1").is_none()).await);

    service.disconnect().await.unwrap();
    // Idempotent.
    service.disconnect().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running nats-server with JetStream"]
async fn encrypted_message_end_to_end() {
    init_tracing();
    let alice_dir = tempfile::tempdir().unwrap();
    let bob_dir = tempfile::tempdir().unwrap();
    let alice_id = Arc::new(IdentityStore::generate("alice", alice_dir.path()).unwrap());
    let bob_id = Arc::new(IdentityStore::generate("bob", bob_dir.path()).unwrap());
    let alice_pub = alice_id.exchange_public();
    let bob_pub = bob_id.exchange_public();

    let alice = CoordinationService::connect(test_config("alice")).await.unwrap();
    let bob = CoordinationService::connect(test_config("bob")).await.unwrap();

    let collector = Collector::new(0);
    bob.subscribe_to_messages(collector.clone()).await.unwrap();

    // Alice seals the payload for Bob and ships it hex-framed in `content`.
    let channel = EncryptionChannel::new(alice_id);
    let envelope = channel
        .encrypt_for_peer(b"Hello, this is a secure message!", &bob_pub)
        .unwrap();
    let handler = MessageHandler::new("alice");
    let mut msg = handler.create(
        "bob",
        hex::encode(envelope.to_bytes()),
        MessageType::Text,
        MessagePriority::High,
        HashMap::new(),
    );
    msg.encrypted = true;
    alice.send_message(&msg).await.unwrap();

    assert!(wait_for(Duration::from_secs(5), || !collector.seen.lock().unwrap().is_empty()).await);
    let received = collector.seen.lock().unwrap()[0].clone();
    assert!(received.encrypted);

    let bob_channel = EncryptionChannel::new(bob_id);
    let envelope = EncryptedEnvelope::from_bytes(&hex::decode(&received.content).unwrap()).unwrap();
    let plaintext = bob_channel.decrypt_from_peer(&envelope, &alice_pub).unwrap();
    assert_eq!(plaintext, b"Hello, this is a secure message!");

    alice.disconnect().await.unwrap();
    bob.disconnect().await.unwrap();
}
