use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::processor::RESULTS_QUEUE;
use crate::domain::entities::client::Client;
use crate::domain::entities::event::Event;
use crate::domain::ports::broker::MessageBroker;
use crate::domain::ports::store::{KeyValueStore, StoreError};

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const WARNING_AFTER_SECS: i64 = 120;
const CRITICAL_AFTER_SECS: i64 = 180;

/// Watches client keepalive timestamps and synthesizes keepalive results
/// for stale clients.
///
/// Synthetic results are published to the results queue so they flow
/// through the same processing pipeline as agent traffic. Master-only duty.
pub struct ClientWatchdog {
    store: Arc<dyn KeyValueStore>,
    broker: Arc<dyn MessageBroker>,
}

impl ClientWatchdog {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, broker: Arc<dyn MessageBroker>) -> Self {
        Self { store, broker }
    }

    /// Periodic sweep loop.
    pub async fn run(self, mut stop: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = stop.recv() => break,
                _ = interval.tick() => {
                    if let Err(error) = self.sweep(Utc::now().timestamp()).await {
                        error!(%error, "stale-client sweep failed");
                    }
                }
            }
        }
    }

    /// One sweep over every known client.
    ///
    /// # Errors
    ///
    /// Returns the first store error encountered.
    pub async fn sweep(&self, now: i64) -> Result<(), StoreError> {
        for name in self.store.smembers("clients").await? {
            let Some(descriptor) = self.store.get(&Client::store_key(&name)).await? else {
                warn!(client = name.as_str(), "client in set without descriptor");
                continue;
            };
            let client: Client = match serde_json::from_str(&descriptor) {
                Ok(client) => client,
                Err(error) => {
                    warn!(%error, client = name.as_str(), "client descriptor unreadable");
                    continue;
                }
            };

            let age = now - client.timestamp;
            let synthetic = if age >= CRITICAL_AFTER_SECS {
                Some((
                    2,
                    format!(
                        "No keep-alive sent from client in over {CRITICAL_AFTER_SECS} seconds"
                    ),
                ))
            } else if age >= WARNING_AFTER_SECS {
                Some((
                    1,
                    format!("No keep-alive sent from client in over {WARNING_AFTER_SECS} seconds"),
                ))
            } else if self
                .store
                .hexists(&Event::store_key(&name), "keepalive")
                .await?
            {
                Some((0, format!("Keep-alive sent from client {age} seconds ago")))
            } else {
                None
            };

            if let Some((status, output)) = synthetic {
                self.publish_keepalive_result(&name, status, &output, now)
                    .await;
            }
        }
        Ok(())
    }

    async fn publish_keepalive_result(&self, client: &str, status: i64, output: &str, now: i64) {
        let result = json!({
            "client": client,
            "check": {
                "name": "keepalive",
                "issued": now,
                "status": status,
                "output": output,
            }
        });
        debug!(client, status, "résultat keepalive synthétisé");
        if let Err(error) = self
            .broker
            .publish_to_queue(RESULTS_QUEUE, result.to_string().as_bytes())
            .await
        {
            error!(%error, client, "synthetic keepalive publish failed");
        }
    }
}
