//! Engine process execution.
//!
//! The gateway builds a [`ProcessSpawnRequest`], an executor starts the process, and
//! the returned [`PendingProcess`] resolves once the process has exited (or the
//! request's timeout elapsed).

pub mod tokio_process;

pub use tokio_process::TokioProcessExecutor;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use crate::models::{CoreError, CoreErrorKind, EngineOperation};

pub type ExecutionResult<T> = Result<T, CoreError>;

/// A started engine process; resolves to its captured output.
pub type PendingProcess = Pin<Box<dyn Future<Output = ExecutionResult<ProcessOutput>> + Send>>;

/// Program and argument vector. Arguments are passed as-is, never through a shell.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessSpawnRequest {
    pub operation: EngineOperation,
    pub command: CommandSpec,
    pub timeout: Option<Duration>,
}

impl ProcessSpawnRequest {
    pub fn new(operation: EngineOperation, command: CommandSpec) -> Self {
        Self {
            operation,
            command,
            timeout: None,
        }
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self) -> ExecutionResult<()> {
        let rejection = if self.command.program.as_os_str().is_empty() {
            Some("engine program path must not be empty")
        } else if self
            .command
            .args
            .iter()
            .any(|arg| arg.is_empty() || arg.contains('\0'))
        {
            Some("engine arguments must be non-empty and free of NUL bytes")
        } else if self.timeout.is_some_and(|timeout| timeout.is_zero()) {
            Some("engine timeout must be greater than zero when set")
        } else {
            None
        };

        match rejection {
            Some(message) => Err(CoreError::new(CoreErrorKind::InvalidInput, message)
                .with_operation(self.operation)),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessExitStatus {
    ExitCode(i32),
    /// Killed by a signal; no exit code is available.
    Terminated,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessOutput {
    pub status: ProcessExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

pub trait ProcessExecutor: Send + Sync {
    /// Starts the process described by `request`. Spawn failures are reported here;
    /// everything after that, including timeouts, through the returned future.
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<PendingProcess>;
}

/// Validates `request` and only then hands it to `executor`.
pub fn spawn_validated(
    executor: &dyn ProcessExecutor,
    request: ProcessSpawnRequest,
) -> ExecutionResult<PendingProcess> {
    request.validate()?;
    executor.spawn(request)
}
