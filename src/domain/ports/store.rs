use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use super::connection::ConnectionEvent;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store read failed: {0}")]
    ReadFailed(String),
    #[error("store write failed: {0}")]
    WriteFailed(String),
    #[error("wrong value type at key {0}")]
    WrongType(String),
    #[error("store connection lost: {0}")]
    Disconnected(String),
}

/// Key-value store port: strings, sets, hashes and lists, mirroring the
/// operation set the event pipeline relies on.
///
/// Adapters serialize their own access; callers may issue commands from any
/// task. Connection lifecycle is surfaced through [`ConnectionEvent`]s.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Set `key` only if absent. Returns true when the value was written.
    async fn setnx(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    /// Atomically write `value` and return the previous value, if any.
    async fn getset(&self, key: &str, value: &str) -> Result<Option<String>, StoreError>;

    async fn del(&self, key: &str) -> Result<(), StoreError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    async fn hdel(&self, key: &str, field: &str) -> Result<(), StoreError>;

    /// Set `field` only if absent. Returns true when the value was written.
    async fn hsetnx(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError>;

    async fn hexists(&self, key: &str, field: &str) -> Result<bool, StoreError>;

    /// Increment an integer field by `delta`, creating it at 0 first.
    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError>;

    async fn rpush(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Inclusive range; negative indices count from the tail as in redis.
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError>;

    /// Trim the list to the inclusive range.
    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), StoreError>;

    fn connected(&self) -> bool;

    /// Subscribe to connection lifecycle events.
    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent>;
}
