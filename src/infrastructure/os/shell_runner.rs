use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::domain::ports::runner::{CommandOutput, CommandRunner, RunError};

/// Runs handler and mutator commands through `sh -c`, matching the
/// invocation semantics of a login shell being handed the string.
///
/// Process I/O happens on the tokio blocking pool; the caller is resumed
/// once stdout is drained and the process has exited.
pub struct ShellRunner;

impl ShellRunner {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str, stdin: Option<&[u8]>) -> Result<CommandOutput, RunError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| RunError::SpawnFailed(e.to_string()))?;

        if let Some(data) = stdin {
            let mut pipe = child
                .stdin
                .take()
                .ok_or_else(|| RunError::IoFailed("stdin pipe unavailable".into()))?;
            pipe.write_all(data)
                .await
                .map_err(|e| RunError::IoFailed(e.to_string()))?;
            // Dropping the pipe closes the write side so the child sees EOF.
            drop(pipe);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| RunError::IoFailed(e.to_string()))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            status: output.status.code().unwrap_or(-1),
        })
    }
}
