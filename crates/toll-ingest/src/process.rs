//! External process execution
//!
//! `curl`, `tar` and the mail command are reached through [`CommandRunner`]
//! so tests can substitute a scripted runner.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{EtlError, Result};

/// Captured stderr is cut to this many characters in error messages
const STDERR_EXCERPT_CHARS: usize = 2048;

/// A program invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
}

impl ExternalCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Bytes piped to the process on stdin
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Program and arguments as one line, for logs
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Exit status and captured streams of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into a transport error naming the command
    pub fn check(self, command: &ExternalCommand) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }

        let stderr = String::from_utf8_lossy(&self.stderr);
        let excerpt: String = stderr.trim().chars().take(STDERR_EXCERPT_CHARS).collect();
        Err(EtlError::transport(format!(
            "'{}' exited with code {}: {}",
            command.display(),
            self.exit_code,
            excerpt
        )))
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync + 'static {
    async fn run(&self, command: &ExternalCommand) -> Result<CommandOutput>;
}

/// Runs commands as child processes on the tokio runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, command: &ExternalCommand) -> Result<CommandOutput> {
        debug!(command = %command.display(), "Spawning external command");

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            EtlError::transport(format!("failed to start '{}': {}", command.program, e))
        })?;

        if let (Some(input), Some(mut stdin)) = (command.stdin.as_ref(), child.stdin.take()) {
            stdin.write_all(input).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
