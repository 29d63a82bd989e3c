use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Mutex};

use crate::domain::ports::broker::{BrokerError, Delivery, ExchangeSpec, MessageBroker};
use crate::domain::ports::connection::ConnectionEvent;

const CONSUMER_CAPACITY: usize = 1024;

#[derive(Default)]
struct QueueState {
    consumer: Option<mpsc::Sender<Delivery>>,
    /// Messages waiting for a consumer.
    buffer: VecDeque<Vec<u8>>,
}

/// Channel-backed broker for tests and standalone runs.
///
/// Queues buffer while unconsumed and hand buffered messages to the next
/// subscriber; fanout exchanges copy to every bound queue. Connection state
/// can be driven from the outside to exercise lifecycle transitions.
pub struct InMemoryBroker {
    queues: Mutex<HashMap<String, QueueState>>,
    /// exchange name -> bound queue names
    bindings: Mutex<HashMap<String, BTreeSet<String>>>,
    acked: Mutex<Vec<(String, u64)>>,
    next_tag: AtomicU64,
    connected: AtomicBool,
    events: broadcast::Sender<ConnectionEvent>,
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            queues: Mutex::new(HashMap::new()),
            bindings: Mutex::new(HashMap::new()),
            acked: Mutex::new(Vec::new()),
            next_tag: AtomicU64::new(1),
            connected: AtomicBool::new(true),
            events,
        }
    }

    /// Mark the connection lost and broadcast the error.
    pub fn fail_connection(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.events.send(ConnectionEvent::Error(reason.to_string()));
    }

    /// Begin a simulated reconnect cycle.
    pub fn begin_reconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.events.send(ConnectionEvent::ReconnectStarted);
    }

    /// Complete a simulated reconnect cycle.
    pub fn complete_reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.events.send(ConnectionEvent::Reconnected);
    }

    /// Acknowledged deliveries, in order.
    pub async fn acked(&self) -> Vec<(String, u64)> {
        self.acked.lock().await.clone()
    }

    /// Messages buffered on a queue with no consumer.
    pub async fn buffered(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .await
            .get(queue)
            .map_or(0, |state| state.buffer.len())
    }

    fn check_connected(&self) -> Result<(), BrokerError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::Disconnected("in-memory broker offline".into()))
        }
    }

    fn make_delivery(&self, queue: &str, payload: &[u8]) -> Delivery {
        Delivery {
            queue: queue.to_string(),
            payload: payload.to_vec(),
            tag: self.next_tag.fetch_add(1, Ordering::SeqCst),
        }
    }

    async fn deliver(&self, queue: &str, payload: &[u8]) {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();
        let delivery = self.make_delivery(queue, payload);
        match &state.consumer {
            Some(consumer) if state.buffer.is_empty() => {
                if consumer.try_send(delivery).is_err() {
                    state.buffer.push_back(payload.to_vec());
                }
            }
            _ => state.buffer.push_back(payload.to_vec()),
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish_to_queue(&self, queue: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.check_connected()?;
        self.deliver(queue, payload).await;
        Ok(())
    }

    async fn publish(&self, exchange: &ExchangeSpec, payload: &[u8]) -> Result<(), BrokerError> {
        self.check_connected()?;
        let bound: Vec<String> = {
            let bindings = self.bindings.lock().await;
            bindings
                .get(&exchange.name)
                .map(|queues| queues.iter().cloned().collect())
                .unwrap_or_default()
        };
        for queue in bound {
            self.deliver(&queue, payload).await;
        }
        Ok(())
    }

    async fn bind(&self, exchange: &str, queue: &str) -> Result<(), BrokerError> {
        self.check_connected()?;
        let mut bindings = self.bindings.lock().await;
        bindings
            .entry(exchange.to_string())
            .or_default()
            .insert(queue.to_string());
        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        _prefetch: u16,
    ) -> Result<mpsc::Receiver<Delivery>, BrokerError> {
        self.check_connected()?;
        let (sender, receiver) = mpsc::channel(CONSUMER_CAPACITY);

        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();
        // Replacing the sender cancels any previous consumer.
        state.consumer = Some(sender.clone());

        while let Some(payload) = state.buffer.pop_front() {
            let delivery = self.make_delivery(queue, &payload);
            if let Err(error) = sender.try_send(delivery) {
                if let mpsc::error::TrySendError::Full(delivery) = error {
                    state.buffer.push_front(delivery.payload);
                }
                break;
            }
        }
        Ok(receiver)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.acked
            .lock()
            .await
            .push((delivery.queue.clone(), delivery.tag));
        Ok(())
    }

    async fn unsubscribe(&self, queue: &str) -> Result<(), BrokerError> {
        let mut queues = self.queues.lock().await;
        if let Some(state) = queues.get_mut(queue) {
            state.consumer = None;
        }
        Ok(())
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}
