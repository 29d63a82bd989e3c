use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::aggregate::{AggregatePruner, Aggregator};
use super::dispatch::{EventDispatcher, Inflight};
use super::filters::FilterEvaluator;
use super::handlers::HandlerResolver;
use super::keepalive::{KeepaliveConsumer, KEEPALIVES_QUEUE};
use super::mutate::EventMutator;
use super::processor::{ResultConsumer, ResultProcessor, RESULTS_QUEUE};
use super::publisher::CheckPublisher;
use super::watchdog::ClientWatchdog;
use crate::application::registry::Registry;
use crate::domain::ports::broker::MessageBroker;
use crate::domain::ports::connection::ConnectionEvent;
use crate::domain::ports::runner::CommandRunner;
use crate::domain::ports::sandbox::PredicateSandbox;
use crate::domain::ports::store::KeyValueStore;

/// Store key holding the current master's acquisition timestamp.
pub const MASTER_LOCK_KEY: &str = "lock:master";

/// Advisory lock TTL: a lock older than this may be taken over.
const LOCK_TTL_SECS: i64 = 60;
const LOCK_RENEWAL_INTERVAL: Duration = Duration::from_secs(20);
const RESIGNATION_CEILING: Duration = Duration::from_secs(3);
const UNSUBSCRIBE_CEILING: Duration = Duration::from_secs(5);
const RESUME_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Running,
    Pausing,
    Paused,
    Stopping,
}

/// The event-processing server: wires consumers, processor and dispatcher
/// together and runs the master-election lifecycle.
pub struct Server {
    registry: Arc<Registry>,
    store: Arc<dyn KeyValueStore>,
    broker: Arc<dyn MessageBroker>,
    processor: Arc<ResultProcessor>,
    inflight: Arc<Inflight>,
    testing: bool,
    state: StdMutex<ServerState>,
    stopping: AtomicBool,
    is_master: AtomicBool,
    master_stop: Mutex<Option<broadcast::Sender<()>>>,
    master_tasks: Mutex<Vec<JoinHandle<()>>>,
    worker_stop: Mutex<Option<broadcast::Sender<()>>>,
    worker_tasks: Mutex<Vec<JoinHandle<()>>>,
    stopped: watch::Sender<bool>,
}

impl Server {
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<dyn KeyValueStore>,
        broker: Arc<dyn MessageBroker>,
        runner: Arc<dyn CommandRunner>,
        sandbox: Arc<dyn PredicateSandbox>,
        testing: bool,
    ) -> Arc<Self> {
        let settings = Arc::new(registry.snapshot());
        let inflight = Arc::new(Inflight::new());

        let filters = FilterEvaluator::new(Arc::clone(&registry), sandbox);
        let resolver = HandlerResolver::new(Arc::clone(&registry), filters);
        let mutator = EventMutator::new(
            Arc::clone(&registry),
            Arc::clone(&runner),
            Arc::clone(&settings),
        );
        let dispatcher = EventDispatcher::new(
            resolver,
            mutator,
            runner,
            Arc::clone(&broker),
            settings,
            Arc::clone(&inflight),
        );
        let aggregator = Aggregator::new(Arc::clone(&store));
        let processor = Arc::new(ResultProcessor::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            dispatcher,
            aggregator,
        ));

        let (stopped, _) = watch::channel(false);
        Arc::new(Self {
            registry,
            store,
            broker,
            processor,
            inflight,
            testing,
            state: StdMutex::new(ServerState::Paused),
            stopping: AtomicBool::new(false),
            is_master: AtomicBool::new(false),
            master_stop: Mutex::new(None),
            master_tasks: Mutex::new(Vec::new()),
            worker_stop: Mutex::new(None),
            worker_tasks: Mutex::new(Vec::new()),
            stopped,
        })
    }

    fn state_guard(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        *self.state_guard()
    }

    #[must_use]
    pub fn is_master(&self) -> bool {
        self.is_master.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn inflight(&self) -> Arc<Inflight> {
        Arc::clone(&self.inflight)
    }

    /// Subscribe the queue consumers, start the election timer and enter
    /// the first election round.
    pub async fn bootstrap(self: &Arc<Self>) {
        let (stop, _) = broadcast::channel(1);
        let mut tasks = Vec::new();

        let keepalives = KeepaliveConsumer::new(Arc::clone(&self.broker), Arc::clone(&self.store));
        tasks.push(tokio::spawn(keepalives.run(stop.subscribe())));

        let results = ResultConsumer::new(Arc::clone(&self.broker), Arc::clone(&self.processor));
        tasks.push(tokio::spawn(results.run(stop.subscribe())));

        let server = Arc::clone(self);
        let mut election_stop = stop.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(LOCK_RENEWAL_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // the immediate first tick: bootstrap already ran an election
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = election_stop.recv() => break,
                    _ = interval.tick() => server.election_tick().await,
                }
            }
        }));

        *self.worker_stop.lock().await = Some(stop);
        self.worker_tasks.lock().await.extend(tasks);
        *self.state_guard() = ServerState::Running;

        info!("serveur démarré, entrée dans l'élection du master");
        self.request_master_election().await;
    }

    async fn election_tick(&self) {
        if self.is_master() {
            let now = Utc::now().timestamp().to_string();
            if let Err(error) = self.store.set(MASTER_LOCK_KEY, &now).await {
                warn!(%error, "renouvellement du verrou master impossible");
            }
        } else if self.broker.connected() {
            self.request_master_election().await;
        }
    }

    /// One election round: set-if-absent, then timestamp-expiry takeover
    /// through an atomic get-and-set.
    pub async fn request_master_election(&self) {
        let now = Utc::now().timestamp();
        match self.store.setnx(MASTER_LOCK_KEY, &now.to_string()).await {
            Ok(true) => self.become_master().await,
            Ok(false) => match self.store.get(MASTER_LOCK_KEY).await {
                Ok(Some(held_since)) => {
                    let age = now - held_since.parse::<i64>().unwrap_or(now);
                    if age >= LOCK_TTL_SECS {
                        match self.store.getset(MASTER_LOCK_KEY, &now.to_string()).await {
                            Ok(previous) if previous.as_deref() == Some(held_since.as_str()) => {
                                self.become_master().await;
                            }
                            Ok(_) => debug!("un autre serveur a remporté l'élection"),
                            Err(error) => warn!(%error, "takeover du verrou master impossible"),
                        }
                    }
                }
                Ok(None) => {}
                Err(error) => warn!(%error, "lecture du verrou master impossible"),
            },
            Err(error) => warn!(%error, "élection impossible, store indisponible"),
        }
    }

    /// Start master-only duties: check publication, the stale-client
    /// watchdog and the aggregate pruner.
    async fn become_master(&self) {
        if self.is_master.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("verrou master acquis, démarrage des tâches du master");

        let (stop, _) = broadcast::channel(1);
        let mut tasks = Vec::new();

        let publisher = CheckPublisher::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.broker),
            self.testing,
        );
        tasks.extend(publisher.spawn_all(&stop));

        let watchdog = ClientWatchdog::new(Arc::clone(&self.store), Arc::clone(&self.broker));
        tasks.push(tokio::spawn(watchdog.run(stop.subscribe())));

        let pruner = AggregatePruner::new(Arc::clone(&self.store));
        tasks.push(tokio::spawn(pruner.run(stop.subscribe())));

        *self.master_stop.lock().await = Some(stop);
        self.master_tasks.lock().await.extend(tasks);
    }

    /// Cancel master duties and release the lock.
    pub async fn resign_master(&self) {
        if let Some(stop) = self.master_stop.lock().await.take() {
            let _ = stop.send(());
        }
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.master_tasks.lock().await);
        if !tasks.is_empty() {
            debug!(count = tasks.len(), "arrêt des tâches du master");
            Self::join_with_ceiling(tasks, RESIGNATION_CEILING, "résignation forcée").await;
        }
        if self.store.connected() {
            let _ = self.store.del(MASTER_LOCK_KEY).await;
        }
        self.is_master.store(false, Ordering::SeqCst);
    }

    async fn join_with_ceiling(tasks: Vec<JoinHandle<()>>, ceiling: Duration, forced: &str) {
        let deadline = tokio::time::Instant::now() + ceiling;
        for mut task in tasks {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut task).await.is_err() {
                warn!(reason = forced, "tâche toujours active après le délai");
                task.abort();
            }
        }
    }

    /// Unsubscribe both queues, stop worker tasks and resign as master.
    /// Idempotent.
    pub async fn pause(&self) {
        {
            let mut state = self.state_guard();
            if matches!(*state, ServerState::Pausing | ServerState::Paused) {
                return;
            }
            *state = ServerState::Pausing;
        }
        info!("mise en pause du serveur");

        if let Err(error) = self.broker.unsubscribe(KEEPALIVES_QUEUE).await {
            warn!(%error, "désabonnement keepalives impossible");
        }
        if let Err(error) = self.broker.unsubscribe(RESULTS_QUEUE).await {
            warn!(%error, "désabonnement results impossible");
        }

        if let Some(stop) = self.worker_stop.lock().await.take() {
            let _ = stop.send(());
        }
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.worker_tasks.lock().await);
        if !tasks.is_empty() {
            Self::join_with_ceiling(tasks, UNSUBSCRIBE_CEILING, "désabonnement forcé").await;
        }

        self.resign_master().await;

        let mut state = self.state_guard();
        if *state == ServerState::Pausing {
            *state = ServerState::Paused;
        }
    }

    /// Resume when paused and both backends are reachable again.
    /// Returns true when a resume actually happened.
    pub async fn resume_if_ready(self: &Arc<Self>) -> bool {
        if self.stopping.load(Ordering::SeqCst) {
            return false;
        }
        if self.state() != ServerState::Paused {
            return false;
        }
        if !self.store.connected() || !self.broker.connected() {
            return false;
        }
        info!("reprise du serveur");
        self.bootstrap().await;
        true
    }

    /// Orderly stop: pause, wait for in-flight handlers, release the
    /// reactor.
    pub async fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!("arrêt du serveur");
        self.pause().await;
        // pause is a no-op when already paused; mastership must still end
        self.resign_master().await;
        self.inflight.wait_idle().await;
        *self.state_guard() = ServerState::Stopping;
        let _ = self.stopped.send(true);
    }

    /// Resolve once `stop` has completed.
    pub async fn wait_stopped(&self) {
        let mut stopped = self.stopped.subscribe();
        while !*stopped.borrow() {
            if stopped.changed().await.is_err() {
                return;
            }
        }
    }

    /// Run the server until stopped: bootstrap, resume poller and backend
    /// watcher.
    pub async fn run(self: &Arc<Self>) {
        self.bootstrap().await;

        let server = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(RESUME_POLL_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if server.stopping.load(Ordering::SeqCst) {
                    break;
                }
                server.resume_if_ready().await;
            }
        });

        let server = Arc::clone(self);
        tokio::spawn(async move { server.watch_backends().await });

        self.wait_stopped().await;
    }

    /// Apply the backend disconnect policy to connection events.
    async fn watch_backends(self: Arc<Self>) {
        let mut store_events = self.store.connection_events();
        let mut broker_events = self.broker.connection_events();
        loop {
            tokio::select! {
                event = store_events.recv() => match event {
                    Ok(ConnectionEvent::Error(reason)) => {
                        error!(reason = reason.as_str(), "erreur fatale du store, arrêt");
                        self.stop().await;
                        break;
                    }
                    Ok(ConnectionEvent::ReconnectStarted) => {
                        if !self.testing {
                            self.pause().await;
                        }
                    }
                    Ok(ConnectionEvent::Reconnected) => {
                        self.resume_if_ready().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                },
                event = broker_events.recv() => match event {
                    Ok(ConnectionEvent::Error(reason)) => {
                        error!(reason = reason.as_str(), "erreur fatale du broker, arrêt");
                        self.stop().await;
                        break;
                    }
                    Ok(ConnectionEvent::ReconnectStarted) => {
                        self.resign_master().await;
                    }
                    Ok(ConnectionEvent::Reconnected) => {
                        debug!("broker reconnecté, prefetch re-armé");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                },
            }
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }
        }
    }
}
