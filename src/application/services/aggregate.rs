use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, error};

use crate::domain::entities::result::CheckResult;
use crate::domain::ports::store::{KeyValueStore, StoreError};
use crate::domain::value_objects::severity::Severity;

/// Issued timestamps retained per check after a prune pass.
pub const MAX_AGGREGATE_AGES: usize = 20;

const PRUNE_INTERVAL: Duration = Duration::from_secs(20);

const SEVERITY_COUNTERS: [&str; 4] = ["ok", "warning", "critical", "unknown"];

/// Rolls results up per `(check, issued)` issue.
pub struct Aggregator {
    store: Arc<dyn KeyValueStore>,
}

impl Aggregator {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Record one result in its issue's rollup.
    ///
    /// # Errors
    ///
    /// Returns the first store error encountered.
    pub async fn aggregate(&self, result: &CheckResult) -> Result<(), StoreError> {
        let check = &result.check;
        let issue = format!("{}:{}", check.name, check.issued);

        let entry = json!({"output": check.output, "status": check.status});
        self.store
            .hset(&format!("aggregation:{issue}"), &result.client, &entry.to_string())
            .await?;

        let counters_key = format!("aggregate:{issue}");
        for counter in SEVERITY_COUNTERS {
            self.store.hsetnx(&counters_key, counter, "0").await?;
        }
        let severity = Severity::from_status(check.status);
        self.store.hincrby(&counters_key, severity.as_str(), 1).await?;
        self.store.hincrby(&counters_key, "total", 1).await?;

        self.store
            .sadd(&format!("aggregates:{}", check.name), &check.issued.to_string())
            .await?;
        self.store.sadd("aggregates", &check.name).await?;

        debug!(
            check = check.name.as_str(),
            issued = check.issued,
            "result aggregated"
        );
        Ok(())
    }
}

/// Bounds aggregation history to the [`MAX_AGGREGATE_AGES`] newest issues
/// per check.
pub struct AggregatePruner {
    store: Arc<dyn KeyValueStore>,
}

impl AggregatePruner {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Periodic prune loop, a master-only duty.
    pub async fn run(self, mut stop: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = stop.recv() => break,
                _ = interval.tick() => {
                    if let Err(error) = self.prune_pass().await {
                        error!(%error, "aggregate prune pass failed");
                    }
                }
            }
        }
    }

    /// One prune pass over every aggregated check.
    ///
    /// # Errors
    ///
    /// Returns the first store error encountered.
    pub async fn prune_pass(&self) -> Result<(), StoreError> {
        for name in self.store.smembers("aggregates").await? {
            let ages_key = format!("aggregates:{name}");
            let mut issued: Vec<i64> = self
                .store
                .smembers(&ages_key)
                .await?
                .iter()
                .filter_map(|stamp| stamp.parse().ok())
                .collect();
            if issued.len() <= MAX_AGGREGATE_AGES {
                continue;
            }
            issued.sort_unstable();
            let stale = issued.len() - MAX_AGGREGATE_AGES;
            for stamp in &issued[..stale] {
                self.store.srem(&ages_key, &stamp.to_string()).await?;
                self.store.del(&format!("aggregate:{name}:{stamp}")).await?;
                self.store.del(&format!("aggregation:{name}:{stamp}")).await?;
            }
            debug!(check = name.as_str(), pruned = stale, "aggregates pruned");
        }
        Ok(())
    }
}
