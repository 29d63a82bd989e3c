use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use super::connection::ConnectionEvent;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("broker publish failed: {0}")]
    PublishFailed(String),
    #[error("broker subscribe failed: {0}")]
    SubscribeFailed(String),
    #[error("broker connection lost: {0}")]
    Disconnected(String),
}

/// Exchange declaration carried by `amqp` handlers and the publisher.
///
/// `kind` defaults to `direct`; remaining declaration options ride along
/// untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeSpec {
    pub name: String,
    #[serde(rename = "type", default = "default_exchange_kind")]
    pub kind: String,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

fn default_exchange_kind() -> String {
    "direct".to_string()
}

impl ExchangeSpec {
    #[must_use]
    pub fn fanout(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: "fanout".to_string(),
            options: Map::new(),
        }
    }
}

/// One message taken off a queue; must be acknowledged.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub queue: String,
    pub payload: Vec<u8>,
    pub tag: u64,
}

/// AMQP-style broker port: acknowledged queue consumption plus named
/// exchanges for outbound traffic.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publish directly to a named queue.
    async fn publish_to_queue(&self, queue: &str, payload: &[u8]) -> Result<(), BrokerError>;

    /// Publish to an exchange, declaring it as specified.
    async fn publish(&self, exchange: &ExchangeSpec, payload: &[u8]) -> Result<(), BrokerError>;

    /// Bind a queue to an exchange so fanout traffic reaches it.
    async fn bind(&self, exchange: &str, queue: &str) -> Result<(), BrokerError>;

    /// Consume a queue with the given prefetch. Any existing consumer on
    /// the queue is cancelled first.
    async fn subscribe(
        &self,
        queue: &str,
        prefetch: u16,
    ) -> Result<mpsc::Receiver<Delivery>, BrokerError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Cancel the consumer on a queue, if any.
    async fn unsubscribe(&self, queue: &str) -> Result<(), BrokerError>;

    fn connected(&self) -> bool;

    /// Subscribe to connection lifecycle events.
    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent>;
}
