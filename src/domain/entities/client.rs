use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A monitored client, as announced by its keepalives.
///
/// Only `name` and `timestamp` are interpreted by the server; agents are
/// free to attach arbitrary descriptor keys (address, subscriptions, …)
/// which are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub name: String,
    /// Unix timestamp of the last keepalive.
    pub timestamp: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Client {
    /// Store key holding this client's descriptor.
    #[must_use]
    pub fn store_key(name: &str) -> String {
        format!("client:{name}")
    }
}
