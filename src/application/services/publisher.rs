use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::application::registry::Registry;
use crate::domain::entities::check::CheckConfig;
use crate::domain::ports::broker::{ExchangeSpec, MessageBroker};
use crate::domain::value_objects::subdue::SubdueAt;

const STAGGER_WINDOW_SECS: u64 = 30;
const TESTING_INTERVAL: Duration = Duration::from_millis(500);

/// Publishes periodic check requests to agent subscription exchanges.
///
/// One timer per publishable check, staggered at startup so a fleet of
/// checks does not fire in lockstep. Master-only duty.
pub struct CheckPublisher {
    registry: Arc<Registry>,
    broker: Arc<dyn MessageBroker>,
    testing: bool,
}

impl CheckPublisher {
    #[must_use]
    pub fn new(registry: Arc<Registry>, broker: Arc<dyn MessageBroker>, testing: bool) -> Self {
        Self {
            registry,
            broker,
            testing,
        }
    }

    /// Spawn one publish loop per publishable check.
    #[must_use]
    pub fn spawn_all(&self, stop: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();
        let mut position = 0_u64;
        for check in self.registry.checks() {
            if check.publish == Some(false) || check.standalone == Some(true) {
                continue;
            }
            position += 1;
            let stagger = if self.testing {
                Duration::ZERO
            } else {
                Duration::from_secs((2 * position) % STAGGER_WINDOW_SECS)
            };
            let interval = if self.testing {
                TESTING_INTERVAL
            } else {
                Duration::from_secs(check.interval.max(1))
            };
            info!(
                check = check.name.as_str(),
                interval_secs = interval.as_secs(),
                stagger_secs = stagger.as_secs(),
                "planification du check"
            );
            tasks.push(tokio::spawn(publish_loop(
                check.clone(),
                Arc::clone(&self.broker),
                stop.subscribe(),
                stagger,
                interval,
            )));
        }
        tasks
    }
}

async fn publish_loop(
    check: CheckConfig,
    broker: Arc<dyn MessageBroker>,
    mut stop: broadcast::Receiver<()>,
    stagger: Duration,
    period: Duration,
) {
    tokio::select! {
        _ = stop.recv() => return,
        () = tokio::time::sleep(stagger) => {}
    }

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = stop.recv() => break,
            _ = interval.tick() => publish_request(&check, broker.as_ref()).await,
        }
    }
}

async fn publish_request(check: &CheckConfig, broker: &dyn MessageBroker) {
    if let Some(subdue) = &check.subdue {
        if subdue.is_active(SubdueAt::Publisher, Local::now().naive_local()) {
            debug!(check = check.name.as_str(), "check subdued, publication skipped");
            return;
        }
    }

    let request = json!({
        "name": check.name,
        "command": check.command,
        "issued": Utc::now().timestamp(),
    });
    let payload = request.to_string();

    let subscribers: BTreeSet<&String> = check.subscribers.iter().collect();
    for subscriber in subscribers {
        let exchange = ExchangeSpec::fanout(subscriber);
        if let Err(error) = broker.publish(&exchange, payload.as_bytes()).await {
            error!(
                %error,
                check = check.name.as_str(),
                subscriber = subscriber.as_str(),
                "check request publish failed"
            );
        }
    }
}
