use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::aggregate::Aggregator;
use super::dispatch::EventDispatcher;
use crate::application::registry::Registry;
use crate::domain::entities::check::CheckPayload;
use crate::domain::entities::client::Client;
use crate::domain::entities::event::{Event, EventAction, EventOccurrence};
use crate::domain::entities::result::CheckResult;
use crate::domain::ports::broker::MessageBroker;
use crate::domain::ports::store::{KeyValueStore, StoreError};
use crate::domain::value_objects::flap;

/// Queue carrying check results from agents.
pub const RESULTS_QUEUE: &str = "results";

#[allow(clippy::cast_possible_wrap)]
const HISTORY_START: i64 = -(flap::HISTORY_LENGTH as i64);

/// Reconciles check results against per-client history and derives events.
pub struct ResultProcessor {
    store: Arc<dyn KeyValueStore>,
    registry: Arc<Registry>,
    dispatcher: EventDispatcher,
    aggregator: Aggregator,
}

impl ResultProcessor {
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        registry: Arc<Registry>,
        dispatcher: EventDispatcher,
        aggregator: Aggregator,
    ) -> Self {
        Self {
            store,
            registry,
            dispatcher,
            aggregator,
        }
    }

    /// Process one result: update history, compute flap state, derive and
    /// dispatch the resulting event, if any.
    ///
    /// # Errors
    ///
    /// Returns the first store error; the consumer logs and moves on.
    pub async fn process(&self, result: &CheckResult) -> Result<(), StoreError> {
        let Some(client_json) = self.store.get(&Client::store_key(&result.client)).await? else {
            // Orphan result: client unknown, deliberately ignored.
            return Ok(());
        };
        let client: Client = match serde_json::from_str(&client_json) {
            Ok(client) => client,
            Err(error) => {
                warn!(%error, client = result.client.as_str(), "client descriptor unreadable");
                return Ok(());
            }
        };

        let check = self.effective_check(&result.check);

        if check.aggregate == Some(true) {
            if let Err(error) = self.aggregator.aggregate(result).await {
                error!(%error, check = check.name.as_str(), "aggregation failed");
            }
        }

        let history_key = CheckPayload::history_key(&client.name, &check.name);
        self.store
            .rpush(&history_key, &check.status.to_string())
            .await?;
        self.store
            .sadd(&format!("history:{}", client.name), &check.name)
            .await?;

        let history: Vec<i64> = self
            .store
            .lrange(&history_key, HISTORY_START, -1)
            .await?
            .iter()
            .filter_map(|status| status.parse().ok())
            .collect();

        let total_change = if history.len() == flap::HISTORY_LENGTH {
            let change = flap::total_state_change(&history);
            self.store.ltrim(&history_key, HISTORY_START, -1).await?;
            change
        } else {
            0
        };

        let events_key = Event::store_key(&client.name);
        let previous: Option<EventOccurrence> = match self.store.hget(&events_key, &check.name).await? {
            Some(json) => serde_json::from_str(&json).ok(),
            None => None,
        };

        let is_flapping = flap::is_flapping(
            previous.as_ref().is_some_and(|occ| occ.flapping),
            total_change,
            check.low_flap_threshold,
            check.high_flap_threshold,
        );

        if check.status != 0 || is_flapping {
            let occurrences = match &previous {
                Some(occ) if occ.status == check.status => occ.occurrences + 1,
                _ => 1,
            };
            let occurrence = EventOccurrence {
                output: check.output.clone(),
                status: check.status,
                issued: check.issued,
                handlers: check.handler_names(),
                flapping: is_flapping,
                occurrences,
            };
            let record = serde_json::to_string(&occurrence)
                .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
            self.store.hset(&events_key, &check.name, &record).await?;

            if check.handle != Some(false) {
                let action = if is_flapping {
                    EventAction::Flapping
                } else {
                    EventAction::Create
                };
                self.dispatch(client, check, occurrences, Some(action));
            } else {
                debug!(check = check.name.as_str(), "event recorded but not handled");
            }
        } else if let Some(previous) = previous {
            let resolvable = !(check.auto_resolve == Some(false) && check.force_resolve != Some(true));
            if resolvable {
                self.store.hdel(&events_key, &check.name).await?;
                if check.handle != Some(false) {
                    self.dispatch(
                        client,
                        check,
                        previous.occurrences,
                        Some(EventAction::Resolve),
                    );
                }
            }
        } else if check.check_type.as_deref() == Some("metric") {
            self.dispatch(client, check, 1, None);
        }

        Ok(())
    }

    /// Merge the registry definition (if any) under the reported check.
    fn effective_check(&self, reported: &CheckPayload) -> CheckPayload {
        let Some(config) = self.registry.check(&reported.name) else {
            return reported.clone();
        };
        match reported.merged_over(config) {
            Ok(merged) => merged,
            Err(error) => {
                warn!(%error, check = reported.name.as_str(), "check merge failed, using reported payload");
                reported.clone()
            }
        }
    }

    fn dispatch(
        &self,
        client: Client,
        check: CheckPayload,
        occurrences: u64,
        action: Option<EventAction>,
    ) {
        let event = Event {
            client,
            check,
            occurrences,
            action,
        };
        let action_name = action.map_or_else(|| "none".to_string(), |a| a.to_string());
        info!(
            client = event.client.name.as_str(),
            check = event.check.name.as_str(),
            action = action_name.as_str(),
            occurrences,
            "événement dérivé du résultat"
        );
        self.dispatcher.handle_event(&event);
    }
}

/// Consumes the results queue with per-message acknowledgement.
pub struct ResultConsumer {
    broker: Arc<dyn MessageBroker>,
    processor: Arc<ResultProcessor>,
}

impl ResultConsumer {
    #[must_use]
    pub fn new(broker: Arc<dyn MessageBroker>, processor: Arc<ResultProcessor>) -> Self {
        Self { broker, processor }
    }

    /// Consumer loop; ends on stop signal or queue cancellation.
    pub async fn run(self, mut stop: broadcast::Receiver<()>) {
        let mut deliveries = match self.broker.subscribe(RESULTS_QUEUE, 1).await {
            Ok(deliveries) => deliveries,
            Err(error) => {
                error!(%error, "results subscription failed");
                return;
            }
        };
        loop {
            tokio::select! {
                _ = stop.recv() => break,
                delivery = deliveries.recv() => {
                    let Some(delivery) = delivery else { break };
                    match serde_json::from_slice::<CheckResult>(&delivery.payload) {
                        Ok(result) => {
                            if let Err(error) = self.processor.process(&result).await {
                                error!(%error, client = result.client.as_str(), "result processing failed");
                            }
                        }
                        // Malformed payloads are acked to avoid poison loops.
                        Err(error) => warn!(%error, "malformed result payload dropped"),
                    }
                    if let Err(error) = self.broker.ack(&delivery).await {
                        warn!(%error, "result ack failed");
                    }
                }
            }
        }
        debug!("results consumer stopped");
    }
}
