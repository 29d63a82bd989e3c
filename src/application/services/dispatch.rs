use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Notify;
use tracing::{debug, error, info};

use super::handlers::{HandlerResolver, ResolvedHandler};
use super::mutate::EventMutator;
use crate::application::registry::{HandlerDef, HandlerKind, SocketSpec};
use crate::domain::entities::event::Event;
use crate::domain::ports::broker::MessageBroker;
use crate::domain::ports::extension::Extension;
use crate::domain::ports::runner::CommandRunner;

const DEFAULT_SOCKET_TIMEOUT_SECS: u64 = 10;

/// Wait group over in-flight handler dispatches.
///
/// Incremented before every dispatch, decremented exactly once per
/// completion path through the drop guard. `wait_idle` is the shutdown
/// barrier.
pub struct Inflight {
    count: AtomicUsize,
    notify: Notify,
}

impl Inflight {
    #[must_use]
    pub fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }

    #[must_use]
    pub fn begin(self: &Arc<Self>) -> InflightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InflightGuard {
            inner: Arc::clone(self),
        }
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Resolve once no dispatch is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.notify.notified();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Default for Inflight {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InflightGuard {
    inner: Arc<Inflight>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.notify.notify_waiters();
        }
    }
}

/// Routes a mutated event to its handler transports.
///
/// Handlers run as independent tasks; one failing never prevents the
/// others, and the in-flight counter is decremented exactly once per
/// handler regardless of outcome.
#[derive(Clone)]
pub struct EventDispatcher {
    resolver: HandlerResolver,
    mutator: EventMutator,
    runner: Arc<dyn CommandRunner>,
    broker: Arc<dyn MessageBroker>,
    settings: Arc<Value>,
    inflight: Arc<Inflight>,
}

impl EventDispatcher {
    #[must_use]
    pub fn new(
        resolver: HandlerResolver,
        mutator: EventMutator,
        runner: Arc<dyn CommandRunner>,
        broker: Arc<dyn MessageBroker>,
        settings: Arc<Value>,
        inflight: Arc<Inflight>,
    ) -> Self {
        Self {
            resolver,
            mutator,
            runner,
            broker,
            settings,
            inflight,
        }
    }

    #[must_use]
    pub fn inflight(&self) -> Arc<Inflight> {
        Arc::clone(&self.inflight)
    }

    /// Resolve handlers for the event and dispatch to each of them.
    pub fn handle_event(&self, event: &Event) {
        for handler in self.resolver.for_event(event) {
            let guard = self.inflight.begin();
            let dispatcher = self.clone();
            let event = event.clone();
            tokio::spawn(async move {
                dispatcher.dispatch(&handler, &event).await;
                drop(guard);
            });
        }
    }

    async fn dispatch(&self, handler: &ResolvedHandler, event: &Event) {
        let client = event.client.name.as_str();
        let check = event.check.name.as_str();

        let data = match self.mutator.mutate(handler.mutator().as_deref(), event).await {
            Ok(data) => data,
            Err(error) => {
                error!(%error, handler = handler.name(), client, check, "mutation failed, handler skipped");
                return;
            }
        };

        match handler {
            ResolvedHandler::Config(def) => self.dispatch_config(def, &data, client, check).await,
            ResolvedHandler::Extension { name, extension } => {
                self.dispatch_extension(name, Arc::clone(extension), data, client, check)
                    .await;
            }
        }
    }

    async fn dispatch_config(&self, def: &HandlerDef, data: &[u8], client: &str, check: &str) {
        match def.kind {
            HandlerKind::Pipe => self.dispatch_pipe(def, data, client, check).await,
            HandlerKind::Tcp => Self::dispatch_tcp(def, data, client, check).await,
            HandlerKind::Udp => Self::dispatch_udp(def, data, client, check).await,
            HandlerKind::Amqp => self.dispatch_amqp(def, data, client, check).await,
            HandlerKind::Set => {
                // Sets are expanded by the resolver; reaching one here means
                // a broken definition.
                error!(handler = def.name.as_str(), "handler set cannot be dispatched");
            }
        }
    }

    async fn dispatch_pipe(&self, def: &HandlerDef, data: &[u8], client: &str, check: &str) {
        let Some(command) = &def.command else {
            error!(handler = def.name.as_str(), "pipe handler has no command");
            return;
        };
        match self.runner.run(command, Some(data)).await {
            Ok(output) => {
                for line in output.stdout.lines() {
                    info!(handler = def.name.as_str(), line, "handler output");
                }
                if output.status != 0 {
                    error!(
                        handler = def.name.as_str(),
                        status = output.status,
                        client,
                        check,
                        "pipe handler exited non-zero"
                    );
                }
            }
            Err(error) => {
                error!(%error, handler = def.name.as_str(), client, check, "pipe handler failed");
            }
        }
    }

    async fn dispatch_tcp(def: &HandlerDef, data: &[u8], client: &str, check: &str) {
        let Some(socket) = &def.socket else {
            error!(handler = def.name.as_str(), "tcp handler has no socket");
            return;
        };
        let timeout = Duration::from_secs(socket.timeout.unwrap_or(DEFAULT_SOCKET_TIMEOUT_SECS));
        let result = tokio::time::timeout(timeout, Self::send_tcp(socket, data)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                error!(%error, handler = def.name.as_str(), client, check, "tcp handler failed");
            }
            Err(_) => {
                error!(
                    handler = def.name.as_str(),
                    timeout_secs = timeout.as_secs(),
                    client,
                    check,
                    "tcp handler timed out"
                );
            }
        }
    }

    async fn send_tcp(socket: &SocketSpec, data: &[u8]) -> std::io::Result<()> {
        let mut stream = TcpStream::connect((socket.host.as_str(), socket.port)).await?;
        stream.write_all(data).await?;
        stream.shutdown().await?;
        Ok(())
    }

    async fn dispatch_udp(def: &HandlerDef, data: &[u8], client: &str, check: &str) {
        let Some(socket) = &def.socket else {
            error!(handler = def.name.as_str(), "udp handler has no socket");
            return;
        };
        let result: std::io::Result<()> = async {
            let datagram = UdpSocket::bind("0.0.0.0:0").await?;
            datagram
                .send_to(data, (socket.host.as_str(), socket.port))
                .await?;
            Ok(())
        }
        .await;
        if let Err(error) = result {
            error!(%error, handler = def.name.as_str(), client, check, "udp handler failed");
        }
    }

    async fn dispatch_amqp(&self, def: &HandlerDef, data: &[u8], client: &str, check: &str) {
        let Some(exchange) = &def.exchange else {
            error!(handler = def.name.as_str(), "amqp handler has no exchange");
            return;
        };
        if data.is_empty() {
            debug!(handler = def.name.as_str(), "empty payload, publish skipped");
            return;
        }
        if let Err(error) = self.broker.publish(exchange, data).await {
            error!(%error, handler = def.name.as_str(), client, check, "amqp handler failed");
        }
    }

    async fn dispatch_extension(
        &self,
        name: &str,
        extension: Arc<dyn Extension>,
        data: Vec<u8>,
        client: &str,
        check: &str,
    ) {
        let settings = Arc::clone(&self.settings);
        let result =
            tokio::task::spawn_blocking(move || extension.run(&data, &settings)).await;
        match result {
            Ok(Ok((output, status))) => {
                for line in output.lines() {
                    info!(handler = name, line, "extension output");
                }
                if status != 0 {
                    error!(handler = name, status, client, check, "extension exited non-zero");
                }
            }
            Ok(Err(error)) => {
                error!(%error, handler = name, client, check, "extension failed");
            }
            Err(_) => {
                error!(handler = name, client, check, "extension panicked");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::application::registry::Registry;
    use crate::application::services::filters::FilterEvaluator;
    use crate::domain::entities::check::CheckPayload;
    use crate::domain::entities::client::Client;
    use crate::domain::entities::event::EventAction;
    use crate::domain::ports::extension::ExtensionError;
    use crate::domain::ports::runner::{CommandOutput, RunError};
    use crate::infrastructure::broker::InMemoryBroker;
    use crate::infrastructure::sandbox::PredicateEvaluator;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct RecordingRunner {
        commands: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl RecordingRunner {
        fn new() -> Self {
            Self {
                commands: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(
            &self,
            command: &str,
            stdin: Option<&[u8]>,
        ) -> Result<CommandOutput, RunError> {
            self.commands
                .lock()
                .expect("mutex poisoned")
                .push((command.to_string(), stdin.unwrap_or_default().to_vec()));
            Ok(CommandOutput {
                stdout: "logged\n".into(),
                status: 0,
            })
        }
    }

    struct RecordingExtension {
        inputs: Mutex<Vec<Vec<u8>>>,
    }

    impl Extension for RecordingExtension {
        fn name(&self) -> &str {
            "recorder"
        }

        fn run(&self, input: &[u8], _settings: &Value) -> Result<(String, i32), ExtensionError> {
            self.inputs
                .lock()
                .expect("mutex poisoned")
                .push(input.to_vec());
            Ok(("recorded".into(), 0))
        }
    }

    fn event() -> Event {
        let client: Client =
            serde_json::from_value(json!({"name": "web-01", "timestamp": 1_700_000_000}))
                .expect("client");
        let check: CheckPayload = serde_json::from_value(json!({
            "name": "cpu", "status": 2, "output": "CRITICAL", "issued": 1_700_000_100,
            "handlers": ["default"]
        }))
        .expect("check");
        Event {
            client,
            check,
            occurrences: 1,
            action: Some(EventAction::Create),
        }
    }

    fn dispatcher_with(
        registry: Registry,
        runner: Arc<dyn CommandRunner>,
        broker: Arc<dyn MessageBroker>,
    ) -> EventDispatcher {
        let registry = Arc::new(registry);
        let settings = Arc::new(registry.snapshot());
        let filters = FilterEvaluator::new(
            Arc::clone(&registry),
            Arc::new(PredicateEvaluator::new()),
        );
        let resolver = HandlerResolver::new(Arc::clone(&registry), filters);
        let mutator = EventMutator::new(
            Arc::clone(&registry),
            Arc::clone(&runner),
            Arc::clone(&settings),
        );
        EventDispatcher::new(
            resolver,
            mutator,
            runner,
            broker,
            settings,
            Arc::new(Inflight::new()),
        )
    }

    #[tokio::test]
    async fn pipe_handler_receives_mutated_event_on_stdin() {
        let mut registry = Registry::new();
        registry.add_handler(
            serde_json::from_value(json!({
                "name": "default", "type": "pipe", "command": "handle-event.sh"
            }))
            .expect("handler"),
        );
        let runner = Arc::new(RecordingRunner::new());
        let dispatcher = dispatcher_with(
            registry,
            Arc::clone(&runner) as Arc<dyn CommandRunner>,
            Arc::new(InMemoryBroker::new()),
        );

        let event = event();
        dispatcher.handle_event(&event);
        dispatcher.inflight().wait_idle().await;

        let commands = runner.commands.lock().expect("mutex poisoned");
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].0, "handle-event.sh");
        assert_eq!(
            commands[0].1,
            serde_json::to_vec(&event).expect("canonical json"),
            "without a mutator the handler must receive canonical JSON"
        );
    }

    #[tokio::test]
    async fn amqp_handler_publishes_to_exchange() {
        let mut registry = Registry::new();
        registry.add_handler(
            serde_json::from_value(json!({
                "name": "default", "type": "amqp",
                "exchange": {"name": "events", "type": "fanout"}
            }))
            .expect("handler"),
        );
        let broker = Arc::new(InMemoryBroker::new());
        broker.bind("events", "sink").await.expect("bind");
        let mut sink = broker.subscribe("sink", 1).await.expect("subscribe");

        let dispatcher = dispatcher_with(
            registry,
            Arc::new(RecordingRunner::new()),
            Arc::clone(&broker) as Arc<dyn MessageBroker>,
        );
        dispatcher.handle_event(&event());
        dispatcher.inflight().wait_idle().await;

        let delivery = sink.recv().await.expect("delivery");
        let value: Value = serde_json::from_slice(&delivery.payload).expect("json");
        assert_eq!(value["check"]["name"], "cpu");
    }

    #[tokio::test]
    async fn extension_handler_receives_payload() {
        let mut registry = Registry::new();
        let extension = Arc::new(RecordingExtension {
            inputs: Mutex::new(vec![]),
        });
        registry.register_handler_extension(Arc::clone(&extension) as Arc<dyn Extension>);

        let dispatcher = dispatcher_with(
            registry,
            Arc::new(RecordingRunner::new()),
            Arc::new(InMemoryBroker::new()),
        );
        let mut event = event();
        event.check.handlers = Some(vec!["recorder".into()]);
        dispatcher.handle_event(&event);
        dispatcher.inflight().wait_idle().await;

        let inputs = extension.inputs.lock().expect("mutex poisoned");
        assert_eq!(inputs.len(), 1);
    }

    #[tokio::test]
    async fn tcp_handler_sends_and_decrements() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut buffer = Vec::new();
            tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut buffer)
                .await
                .expect("read");
            buffer
        });

        let mut registry = Registry::new();
        registry.add_handler(
            serde_json::from_value(json!({
                "name": "default", "type": "tcp",
                "socket": {"host": "127.0.0.1", "port": addr.port(), "timeout": 2}
            }))
            .expect("handler"),
        );
        let dispatcher = dispatcher_with(
            registry,
            Arc::new(RecordingRunner::new()),
            Arc::new(InMemoryBroker::new()),
        );
        dispatcher.handle_event(&event());
        dispatcher.inflight().wait_idle().await;
        assert_eq!(dispatcher.inflight().count(), 0);

        let received = server.await.expect("server task");
        let value: Value = serde_json::from_slice(&received).expect("json");
        assert_eq!(value["client"]["name"], "web-01");
    }

    #[tokio::test]
    async fn tcp_connect_failure_still_decrements() {
        let mut registry = Registry::new();
        registry.add_handler(
            serde_json::from_value(json!({
                "name": "default", "type": "tcp",
                // port 1 is almost never listening: connect is refused
                "socket": {"host": "127.0.0.1", "port": 1, "timeout": 1}
            }))
            .expect("handler"),
        );
        let dispatcher = dispatcher_with(
            registry,
            Arc::new(RecordingRunner::new()),
            Arc::new(InMemoryBroker::new()),
        );
        dispatcher.handle_event(&event());
        dispatcher.inflight().wait_idle().await;
        assert_eq!(dispatcher.inflight().count(), 0);
    }

    #[tokio::test]
    async fn udp_handler_sends_packet() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let addr = receiver.local_addr().expect("addr");

        let mut registry = Registry::new();
        registry.add_handler(
            serde_json::from_value(json!({
                "name": "default", "type": "udp",
                "socket": {"host": "127.0.0.1", "port": addr.port()}
            }))
            .expect("handler"),
        );
        let dispatcher = dispatcher_with(
            registry,
            Arc::new(RecordingRunner::new()),
            Arc::new(InMemoryBroker::new()),
        );
        dispatcher.handle_event(&event());
        dispatcher.inflight().wait_idle().await;

        let mut buffer = vec![0_u8; 65536];
        let (length, _) = receiver.recv_from(&mut buffer).await.expect("recv");
        let value: Value = serde_json::from_slice(&buffer[..length]).expect("json");
        assert_eq!(value["check"]["status"], 2);
    }

    #[tokio::test]
    async fn one_failing_handler_does_not_block_others() {
        let mut registry = Registry::new();
        registry.add_handler(
            serde_json::from_value(json!({
                "name": "broken", "type": "pipe"
                // no command: dispatch logs and returns
            }))
            .expect("handler"),
        );
        registry.add_handler(
            serde_json::from_value(json!({
                "name": "working", "type": "pipe", "command": "handle.sh"
            }))
            .expect("handler"),
        );
        let runner = Arc::new(RecordingRunner::new());
        let dispatcher = dispatcher_with(
            registry,
            Arc::clone(&runner) as Arc<dyn CommandRunner>,
            Arc::new(InMemoryBroker::new()),
        );

        let mut event = event();
        event.check.handlers = Some(vec!["broken".into(), "working".into()]);
        dispatcher.handle_event(&event);
        dispatcher.inflight().wait_idle().await;

        assert_eq!(dispatcher.inflight().count(), 0);
        assert_eq!(runner.commands.lock().expect("mutex poisoned").len(), 1);
    }

    #[tokio::test]
    async fn inflight_guard_decrements_exactly_once() {
        let inflight = Arc::new(Inflight::new());
        {
            let _guard = inflight.begin();
            assert_eq!(inflight.count(), 1);
        }
        assert_eq!(inflight.count(), 0);
        inflight.wait_idle().await;
    }
}
