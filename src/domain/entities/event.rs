use serde::{Deserialize, Serialize};

use super::check::CheckPayload;
use super::client::Client;

/// Server-side judgment tag attached to a dispatched event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Create,
    Flapping,
    Resolve,
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Flapping => write!(f, "flapping"),
            Self::Resolve => write!(f, "resolve"),
        }
    }
}

/// An event derived from a result, routed through the handler pipeline.
///
/// Metric results dispatch without an action tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub client: Client,
    pub check: CheckPayload,
    pub occurrences: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<EventAction>,
}

impl Event {
    /// Store key of the per-client event hash.
    #[must_use]
    pub fn store_key(client: &str) -> String {
        format!("events:{client}")
    }
}

/// Persisted record of a currently open event for one `(client, check)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventOccurrence {
    pub output: String,
    pub status: i64,
    pub issued: i64,
    pub handlers: Vec<String>,
    pub flapping: bool,
    pub occurrences: u64,
}
