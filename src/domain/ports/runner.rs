use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunError {
    #[error("failed to spawn command: {0}")]
    SpawnFailed(String),
    #[error("command I/O failed: {0}")]
    IoFailed(String),
}

/// Captured outcome of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub status: i32,
}

/// Subprocess runner port.
///
/// Commands are run with login-shell invocation semantics (the string is
/// handed to a shell). The executor is never blocked on process I/O;
/// implementations offload and resume the caller on completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Spawn `command`, write `stdin` if given, close the write side, and
    /// collect stdout and the exit status.
    async fn run(&self, command: &str, stdin: Option<&[u8]>) -> Result<CommandOutput, RunError>;
}
