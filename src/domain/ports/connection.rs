/// Connection lifecycle notification emitted by backend adapters.
///
/// These drive the server state machine: errors are fatal, reconnect
/// cycles pause and resume (store) or resign and re-arm (broker).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Error(String),
    ReconnectStarted,
    Reconnected,
}
