#![allow(clippy::expect_used)]

//! End-to-end pipeline scenarios: broker in, handler out, store in between.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use warden::application::registry::Registry;
use warden::application::services::{ClientWatchdog, Server};
use warden::domain::ports::broker::MessageBroker;
use warden::domain::ports::runner::{CommandOutput, CommandRunner, RunError};
use warden::domain::ports::store::KeyValueStore;
use warden::infrastructure::broker::InMemoryBroker;
use warden::infrastructure::persistence::InMemoryStore;
use warden::infrastructure::sandbox::PredicateEvaluator;

const REGISTRY_TOML: &str = r#"
[checks.cpu]
command = "check-cpu.sh"
interval = 60
subscribers = ["web"]
handlers = ["default"]

[handlers.default]
type = "pipe"
command = "handle-event.sh"
"#;

/// Captures every payload a pipe handler would have received.
struct CapturingRunner {
    payloads: Mutex<Vec<Value>>,
}

impl CapturingRunner {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            payloads: Mutex::new(vec![]),
        })
    }

    fn events(&self) -> Vec<Value> {
        self.payloads.lock().expect("mutex poisoned").clone()
    }
}

#[async_trait]
impl CommandRunner for CapturingRunner {
    async fn run(&self, _command: &str, stdin: Option<&[u8]>) -> Result<CommandOutput, RunError> {
        let value: Value = serde_json::from_slice(stdin.unwrap_or_default()).expect("event json");
        self.payloads.lock().expect("mutex poisoned").push(value);
        Ok(CommandOutput {
            stdout: String::new(),
            status: 0,
        })
    }
}

struct Harness {
    server: Arc<Server>,
    store: Arc<InMemoryStore>,
    broker: Arc<InMemoryBroker>,
    runner: Arc<CapturingRunner>,
}

async fn start() -> Harness {
    let registry = Arc::new(Registry::from_toml_str(REGISTRY_TOML).expect("registry"));
    let store = Arc::new(InMemoryStore::new());
    let broker = Arc::new(InMemoryBroker::new());
    let runner = CapturingRunner::new();

    let server = Server::new(
        registry,
        Arc::clone(&store) as Arc<dyn KeyValueStore>,
        Arc::clone(&broker) as Arc<dyn MessageBroker>,
        Arc::clone(&runner) as Arc<dyn CommandRunner>,
        Arc::new(PredicateEvaluator::new()),
        true,
    );
    server.bootstrap().await;
    settle().await;
    Harness {
        server,
        store,
        broker,
        runner,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

async fn publish_keepalive(broker: &InMemoryBroker, name: &str, timestamp: i64) {
    let payload = json!({"name": name, "timestamp": timestamp}).to_string();
    broker
        .publish_to_queue("keepalives", payload.as_bytes())
        .await
        .expect("publish keepalive");
}

async fn publish_result(broker: &InMemoryBroker, client: &str, check: &str, status: i64) {
    let payload = json!({
        "client": client,
        "check": {"name": check, "status": status, "output": "out", "issued": 1_700_000_100}
    })
    .to_string();
    broker
        .publish_to_queue("results", payload.as_bytes())
        .await
        .expect("publish result");
}

async fn quiesce(harness: &Harness) {
    settle().await;
    harness.server.inflight().wait_idle().await;
}

#[tokio::test]
async fn keepalives_populate_the_client_set() {
    let harness = start().await;
    publish_keepalive(&harness.broker, "web-01", 1_700_000_000).await;
    publish_keepalive(&harness.broker, "web-02", 1_700_000_000).await;
    publish_keepalive(&harness.broker, "web-01", 1_700_000_060).await;
    settle().await;

    let mut clients = harness.store.smembers("clients").await.expect("smembers");
    clients.sort();
    assert_eq!(clients, vec!["web-01", "web-02"]);

    let descriptor = harness
        .store
        .get("client:web-01")
        .await
        .expect("get")
        .expect("descriptor");
    let value: Value = serde_json::from_str(&descriptor).expect("json");
    assert_eq!(value["timestamp"], 1_700_000_060, "last keepalive wins");

    harness.server.stop().await;
}

#[tokio::test]
async fn steady_ok_keeps_the_slate_clean() {
    let harness = start().await;
    publish_keepalive(&harness.broker, "web-01", 1_700_000_000).await;
    settle().await;

    for _ in 0..25 {
        publish_result(&harness.broker, "web-01", "cpu", 0).await;
    }
    quiesce(&harness).await;

    let history = harness
        .store
        .lrange("history:web-01:cpu", 0, -1)
        .await
        .expect("lrange");
    assert_eq!(history.len(), 21);
    assert!(history.iter().all(|status| status == "0"));
    assert!(harness
        .store
        .hget("events:web-01", "cpu")
        .await
        .expect("hget")
        .is_none());
    assert!(harness.runner.events().is_empty());

    harness.server.stop().await;
}

#[tokio::test]
async fn alert_lifecycle_create_repeat_resolve() {
    let harness = start().await;
    publish_keepalive(&harness.broker, "web-01", 1_700_000_000).await;
    settle().await;

    publish_result(&harness.broker, "web-01", "cpu", 2).await;
    quiesce(&harness).await;
    {
        let events = harness.runner.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["action"], "create");
        assert_eq!(events[0]["occurrences"], 1);
        assert_eq!(events[0]["check"]["status"], 2);
    }

    publish_result(&harness.broker, "web-01", "cpu", 2).await;
    publish_result(&harness.broker, "web-01", "cpu", 2).await;
    quiesce(&harness).await;
    {
        let events = harness.runner.events();
        assert_eq!(events.len(), 3);
        assert!(events[1..].iter().all(|event| event["action"] == "create"));
        assert_eq!(events[2]["occurrences"], 3);
    }

    publish_result(&harness.broker, "web-01", "cpu", 0).await;
    quiesce(&harness).await;
    {
        let events = harness.runner.events();
        assert_eq!(events.len(), 4);
        assert_eq!(events[3]["action"], "resolve");
        assert_eq!(events[3]["occurrences"], 3);
    }
    assert!(harness
        .store
        .hget("events:web-01", "cpu")
        .await
        .expect("hget")
        .is_none());

    harness.server.stop().await;
}

#[tokio::test]
async fn orphan_results_leave_no_trace() {
    let harness = start().await;
    publish_result(&harness.broker, "ghost", "cpu", 2).await;
    quiesce(&harness).await;

    assert!(harness.runner.events().is_empty());
    assert!(harness
        .store
        .lrange("history:ghost:cpu", 0, -1)
        .await
        .expect("lrange")
        .is_empty());

    harness.server.stop().await;
}

#[tokio::test]
async fn malformed_payloads_are_acked_not_poisonous() {
    let harness = start().await;
    harness
        .broker
        .publish_to_queue("results", b"not json at all")
        .await
        .expect("publish");
    harness
        .broker
        .publish_to_queue("keepalives", b"{broken")
        .await
        .expect("publish");
    settle().await;

    assert_eq!(harness.broker.acked().await.len(), 2);

    // the consumers are still alive afterwards
    publish_keepalive(&harness.broker, "web-01", 1_700_000_000).await;
    publish_result(&harness.broker, "web-01", "cpu", 2).await;
    quiesce(&harness).await;
    assert_eq!(harness.runner.events().len(), 1);

    harness.server.stop().await;
}

#[tokio::test]
async fn stale_client_flows_through_the_results_queue() {
    let harness = start().await;
    let now = 1_700_000_000;
    publish_keepalive(&harness.broker, "web-01", now - 200).await;
    settle().await;

    // master-duty sweep, driven directly with a fixed clock
    let watchdog = ClientWatchdog::new(
        Arc::clone(&harness.store) as Arc<dyn KeyValueStore>,
        Arc::clone(&harness.broker) as Arc<dyn MessageBroker>,
    );
    watchdog.sweep(now).await.expect("sweep");
    quiesce(&harness).await;

    let events = harness.runner.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["action"], "create");
    assert_eq!(events[0]["check"]["name"], "keepalive");
    assert_eq!(events[0]["check"]["status"], 2);
    assert_eq!(
        events[0]["check"]["output"],
        "No keep-alive sent from client in over 180 seconds"
    );

    let record = harness
        .store
        .hget("events:web-01", "keepalive")
        .await
        .expect("hget");
    assert!(record.is_some(), "keepalive event must be recorded");

    harness.server.stop().await;
}

#[tokio::test]
async fn check_requests_reach_subscribed_agents() {
    // bind an agent queue to the subscription exchange before electing
    let registry = Arc::new(Registry::from_toml_str(REGISTRY_TOML).expect("registry"));
    let store = Arc::new(InMemoryStore::new());
    let broker = Arc::new(InMemoryBroker::new());
    broker.bind("web", "agent-inbox").await.expect("bind");
    let mut inbox = broker.subscribe("agent-inbox", 1).await.expect("subscribe");

    let runner = CapturingRunner::new();
    let server = Server::new(
        registry,
        store as Arc<dyn KeyValueStore>,
        Arc::clone(&broker) as Arc<dyn MessageBroker>,
        runner as Arc<dyn CommandRunner>,
        Arc::new(PredicateEvaluator::new()),
        true,
    );
    server.bootstrap().await;

    // testing mode: the publisher fires every 500 ms without stagger
    let delivery = tokio::time::timeout(Duration::from_secs(5), inbox.recv())
        .await
        .expect("a check request within five seconds")
        .expect("delivery");
    let request: Value = serde_json::from_slice(&delivery.payload).expect("json");
    assert_eq!(request["name"], "cpu");
    assert_eq!(request["command"], "check-cpu.sh");
    assert!(request["issued"].as_i64().expect("issued") > 0);

    server.stop().await;
}
