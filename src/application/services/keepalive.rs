use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::domain::entities::client::Client;
use crate::domain::ports::broker::MessageBroker;
use crate::domain::ports::store::KeyValueStore;

/// Queue carrying client liveness announcements.
pub const KEEPALIVES_QUEUE: &str = "keepalives";

/// Consumes the keepalives queue and persists client descriptors.
///
/// Per-client last-writer-wins; no cross-client ordering.
pub struct KeepaliveConsumer {
    broker: Arc<dyn MessageBroker>,
    store: Arc<dyn KeyValueStore>,
}

impl KeepaliveConsumer {
    #[must_use]
    pub fn new(broker: Arc<dyn MessageBroker>, store: Arc<dyn KeyValueStore>) -> Self {
        Self { broker, store }
    }

    /// Consumer loop; ends on stop signal or queue cancellation.
    pub async fn run(self, mut stop: broadcast::Receiver<()>) {
        let mut deliveries = match self.broker.subscribe(KEEPALIVES_QUEUE, 1).await {
            Ok(deliveries) => deliveries,
            Err(error) => {
                error!(%error, "keepalives subscription failed");
                return;
            }
        };
        loop {
            tokio::select! {
                _ = stop.recv() => break,
                delivery = deliveries.recv() => {
                    let Some(delivery) = delivery else { break };
                    match serde_json::from_slice::<Client>(&delivery.payload) {
                        Ok(client) => {
                            if let Err(error) = self.persist(&client, &delivery.payload).await {
                                error!(%error, client = client.name.as_str(), "keepalive persistence failed");
                            }
                        }
                        // Malformed payloads are acked to avoid poison loops.
                        Err(error) => warn!(%error, "malformed keepalive payload dropped"),
                    }
                    if let Err(error) = self.broker.ack(&delivery).await {
                        warn!(%error, "keepalive ack failed");
                    }
                }
            }
        }
        debug!("keepalives consumer stopped");
    }

    async fn persist(
        &self,
        client: &Client,
        payload: &[u8],
    ) -> Result<(), crate::domain::ports::store::StoreError> {
        // The raw payload is stored as-is so opaque descriptor keys survive.
        let descriptor = String::from_utf8_lossy(payload);
        self.store
            .set(&Client::store_key(&client.name), &descriptor)
            .await?;
        self.store.sadd("clients", &client.name).await?;
        debug!(client = client.name.as_str(), "keepalive enregistré");
        Ok(())
    }
}
