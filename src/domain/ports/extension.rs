use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtensionError {
    #[error("extension {name} failed: {reason}")]
    Failed { name: String, reason: String },
}

/// An in-process handler or mutator extension.
///
/// Extensions receive the input bytes (a serialized event for mutators, the
/// mutated payload for handlers) and a flat snapshot of the settings, and
/// return output text plus an exit-style status. Status 0 means success,
/// mirroring the subprocess contract.
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    /// Gating attributes, read the same way as a config handler definition:
    /// `handle_flapping`, `severities`, `filters`.
    fn definition(&self) -> Value {
        Value::Object(serde_json::Map::new())
    }

    fn run(&self, input: &[u8], settings: &Value) -> Result<(String, i32), ExtensionError>;
}
