use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::application::registry::Registry;
use crate::domain::entities::event::Event;
use crate::domain::ports::extension::ExtensionError;
use crate::domain::ports::runner::{CommandRunner, RunError};

#[derive(Error, Debug)]
pub enum MutateError {
    #[error("unknown mutator: {0}")]
    UnknownMutator(String),
    #[error("mutator {name} exited with status {status}")]
    CommandFailed { name: String, status: i32 },
    #[error("mutator command failed: {0}")]
    Run(#[from] RunError),
    #[error("mutator extension failed: {0}")]
    Extension(#[from] ExtensionError),
    #[error("event not serializable: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("mutator extension panicked")]
    ExtensionPanicked,
}

/// Transforms an event's serialized form before handler dispatch.
#[derive(Clone)]
pub struct EventMutator {
    registry: Arc<Registry>,
    runner: Arc<dyn CommandRunner>,
    settings: Arc<Value>,
}

impl EventMutator {
    #[must_use]
    pub fn new(registry: Arc<Registry>, runner: Arc<dyn CommandRunner>, settings: Arc<Value>) -> Self {
        Self {
            registry,
            runner,
            settings,
        }
    }

    /// Produce the bytes a handler will receive.
    ///
    /// Without a mutator name the event is serialized as JSON. A named
    /// mutator runs its command (or extension) with the JSON payload on
    /// stdin and must exit 0 for its stdout to be used.
    ///
    /// # Errors
    ///
    /// Returns `MutateError` when the mutator is unknown, fails to run, or
    /// exits non-zero. The caller skips the affected handler only.
    pub async fn mutate(&self, mutator: Option<&str>, event: &Event) -> Result<Vec<u8>, MutateError> {
        let payload = serde_json::to_vec(event)?;
        let Some(name) = mutator else {
            return Ok(payload);
        };

        if let Some(def) = self.registry.mutator(name) {
            let output = self.runner.run(&def.command, Some(&payload)).await?;
            if output.status == 0 {
                Ok(output.stdout.into_bytes())
            } else {
                Err(MutateError::CommandFailed {
                    name: name.to_string(),
                    status: output.status,
                })
            }
        } else if let Some(extension) = self.registry.mutator_extension(name) {
            let extension = Arc::clone(extension);
            let settings = Arc::clone(&self.settings);
            let result = tokio::task::spawn_blocking(move || {
                extension.run(&payload, &settings)
            })
            .await
            .map_err(|_| MutateError::ExtensionPanicked)??;
            let (output, status) = result;
            if status == 0 {
                Ok(output.into_bytes())
            } else {
                Err(MutateError::CommandFailed {
                    name: name.to_string(),
                    status,
                })
            }
        } else {
            Err(MutateError::UnknownMutator(name.to_string()))
        }
    }
}
