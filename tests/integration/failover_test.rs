#![allow(clippy::expect_used)]

//! Master election and failover across servers sharing one store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use warden::application::registry::Registry;
use warden::application::services::lifecycle::MASTER_LOCK_KEY;
use warden::application::services::Server;
use warden::domain::ports::broker::MessageBroker;
use warden::domain::ports::runner::{CommandOutput, CommandRunner, RunError};
use warden::domain::ports::store::KeyValueStore;
use warden::infrastructure::broker::InMemoryBroker;
use warden::infrastructure::persistence::InMemoryStore;
use warden::infrastructure::sandbox::PredicateEvaluator;

struct NullRunner;

#[async_trait]
impl CommandRunner for NullRunner {
    async fn run(&self, _command: &str, _stdin: Option<&[u8]>) -> Result<CommandOutput, RunError> {
        Ok(CommandOutput {
            stdout: String::new(),
            status: 0,
        })
    }
}

fn server_on(store: &Arc<InMemoryStore>, broker: &Arc<InMemoryBroker>) -> Arc<Server> {
    Server::new(
        Arc::new(Registry::new()),
        Arc::clone(store) as Arc<dyn KeyValueStore>,
        Arc::clone(broker) as Arc<dyn MessageBroker>,
        Arc::new(NullRunner),
        Arc::new(PredicateEvaluator::new()),
        true,
    )
}

#[tokio::test]
async fn failover_grants_mastership_to_the_survivor() {
    let store = Arc::new(InMemoryStore::new());
    let broker = Arc::new(InMemoryBroker::new());

    let primary = server_on(&store, &broker);
    let standby = server_on(&store, &broker);

    primary.request_master_election().await;
    standby.request_master_election().await;
    assert!(primary.is_master());
    assert!(!standby.is_master(), "fresh lock must not be taken over");

    // The primary dies without resigning: its lock goes stale.
    let stale = (Utc::now().timestamp() - 61).to_string();
    store.set(MASTER_LOCK_KEY, &stale).await.expect("set");

    standby.request_master_election().await;
    assert!(standby.is_master(), "stale lock is swapped atomically");

    // A restarted ex-master finds a fresh lock and stays standby.
    let restarted = server_on(&store, &broker);
    restarted.request_master_election().await;
    assert!(!restarted.is_master());

    standby.stop().await;
    restarted.stop().await;
    primary.stop().await;
}

#[tokio::test]
async fn resigned_master_leaves_the_lock_free_for_peers() {
    let store = Arc::new(InMemoryStore::new());
    let broker = Arc::new(InMemoryBroker::new());

    let first = server_on(&store, &broker);
    let second = server_on(&store, &broker);

    first.request_master_election().await;
    assert!(first.is_master());

    first.resign_master().await;
    assert!(store
        .get(MASTER_LOCK_KEY)
        .await
        .expect("get")
        .is_none());

    second.request_master_election().await;
    assert!(second.is_master());

    first.stop().await;
    second.stop().await;
}

#[tokio::test]
async fn election_round_has_a_single_winner() {
    let store = Arc::new(InMemoryStore::new());
    let broker = Arc::new(InMemoryBroker::new());

    let servers: Vec<Arc<Server>> = (0..5).map(|_| server_on(&store, &broker)).collect();
    let stale = (Utc::now().timestamp() - 120).to_string();
    store.set(MASTER_LOCK_KEY, &stale).await.expect("set");

    let mut elections = Vec::new();
    for server in &servers {
        let server = Arc::clone(server);
        elections.push(tokio::spawn(
            async move { server.request_master_election().await },
        ));
    }
    for election in elections {
        election.await.expect("join");
    }

    let masters = servers.iter().filter(|server| server.is_master()).count();
    assert_eq!(masters, 1, "exactly one server wins the takeover round");

    for server in &servers {
        server.stop().await;
    }
}
