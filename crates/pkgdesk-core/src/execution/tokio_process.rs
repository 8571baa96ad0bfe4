use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

use crate::execution::{
    ExecutionResult, PendingProcess, ProcessExecutor, ProcessExitStatus, ProcessOutput,
    ProcessSpawnRequest,
};
use crate::models::{CoreError, CoreErrorKind, EngineOperation};

/// Bounded window for draining output after exit. Installers that leave helpers
/// running can hold the pipes open long after the engine itself is gone.
const OUTPUT_DRAIN_WINDOW: Duration = Duration::from_millis(250);

/// Runs engine processes as Tokio children, each in its own process group.
pub struct TokioProcessExecutor;

impl ProcessExecutor for TokioProcessExecutor {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<PendingProcess> {
        let ProcessSpawnRequest {
            operation,
            command,
            timeout,
        } = request;

        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args);
        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|error| {
            process_failure(
                operation,
                format!("failed to spawn '{}': {error}", command.program.display()),
            )
        })?;

        let pid = child.id();
        tracing::debug!(
            operation = ?operation,
            pid = ?pid,
            program = %command.program.display(),
            "spawned engine process"
        );

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        Ok(Box::pin(async move {
            let stdout_reader = drain(stdout);
            let stderr_reader = drain(stderr);

            let wait_err = |error: std::io::Error| {
                process_failure(operation, format!("failed to wait for process: {error}"))
            };

            let status = match timeout {
                Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                    Ok(result) => result.map_err(wait_err)?,
                    Err(_) => {
                        if let Some(pid) = pid {
                            kill_process_group(pid, operation);
                        }
                        let _ = child.start_kill();
                        let _ = tokio::time::timeout(Duration::from_secs(1), child.wait()).await;
                        stdout_reader.abort();
                        stderr_reader.abort();
                        tracing::warn!(
                            operation = ?operation,
                            pid = ?pid,
                            timeout_ms = limit.as_millis() as u64,
                            "engine process timed out; process group killed"
                        );
                        return Err(CoreError::new(
                            CoreErrorKind::Timeout,
                            format!("engine process timed out after {}ms", limit.as_millis()),
                        )
                        .with_operation(operation));
                    }
                },
                None => child.wait().await.map_err(wait_err)?,
            };

            let stdout = collect(stdout_reader).await;
            let stderr = collect(stderr_reader).await;

            let status = match status.code() {
                Some(code) => ProcessExitStatus::ExitCode(code),
                None => ProcessExitStatus::Terminated,
            };

            Ok(ProcessOutput {
                status,
                stdout,
                stderr,
                elapsed: started.elapsed(),
            })
        }))
    }
}

fn drain<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer).await;
        }
        buffer
    })
}

async fn collect(reader: JoinHandle<Vec<u8>>) -> Vec<u8> {
    match tokio::time::timeout(OUTPUT_DRAIN_WINDOW, reader).await {
        Ok(Ok(buffer)) => buffer,
        _ => Vec::new(),
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32, operation: EngineOperation) {
    let pgid = -(pid as libc::pid_t);
    // SAFETY: kill(2) with a negative pid only signals the group created at spawn.
    let result = unsafe { libc::kill(pgid, libc::SIGKILL) };

    if result != 0 {
        let os_error = std::io::Error::last_os_error();
        if os_error.raw_os_error() != Some(libc::ESRCH) {
            tracing::warn!(
                operation = ?operation,
                pid,
                error = %os_error,
                "failed to kill engine process group"
            );
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32, _operation: EngineOperation) {
    // kill_on_drop covers the direct child where process groups are unavailable.
}

fn process_failure(operation: EngineOperation, message: String) -> CoreError {
    CoreError::new(CoreErrorKind::ProcessFailure, message).with_operation(operation)
}
