pub mod aggregate;
pub mod dispatch;
pub mod filters;
pub mod handlers;
pub mod keepalive;
pub mod lifecycle;
pub mod mutate;
pub mod processor;
pub mod publisher;
pub mod watchdog;

pub use aggregate::{AggregatePruner, Aggregator};
pub use dispatch::{EventDispatcher, Inflight};
pub use filters::FilterEvaluator;
pub use handlers::{HandlerResolver, ResolvedHandler};
pub use keepalive::KeepaliveConsumer;
pub use lifecycle::{Server, ServerState};
pub use mutate::EventMutator;
pub use processor::{ResultConsumer, ResultProcessor};
pub use publisher::CheckPublisher;
pub use watchdog::ClientWatchdog;
