use serde::{Deserialize, Serialize};

use super::check::CheckPayload;

/// One execution outcome of a check on one client, as published by agents
/// on the results queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Name of the reporting client.
    pub client: String,
    pub check: CheckPayload,
}
