//! Host process execution

use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use vessel_errors::{Error, PlatformError};
use vessel_events::{AppEvent, EventEmitter, InstallEvent};

use crate::core::PlatformContext;
use crate::process::{CommandOutput, PlatformCommand, ProcessOperations};

/// Time a cancelled process group gets between SIGTERM and SIGKILL
pub const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Output lines kept for failure messages
const TAIL_LINES: usize = 20;

/// Host implementation of process operations
#[derive(Debug, Default)]
pub struct HostProcessOperations;

impl HostProcessOperations {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn build_command(cmd: &PlatformCommand) -> Command {
    let mut command = Command::new(cmd.program());
    command.args(cmd.get_args());
    if cmd.clears_env() {
        command.env_clear();
    }
    command.envs(cmd.get_env_vars());
    if let Some(dir) = cmd.get_current_dir() {
        command.current_dir(dir);
    }
    command
}

fn spawn_error(cmd: &PlatformCommand, e: &std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        PlatformError::CommandNotFound {
            command: cmd.program().to_string(),
        }
        .into()
    } else {
        PlatformError::ProcessExecutionFailed {
            command: cmd.display(),
            message: e.to_string(),
        }
        .into()
    }
}

/// Forward each line from `reader` as an event and keep the most recent ones
async fn pump<R: AsyncRead + Unpin>(
    reader: R,
    ctx: PlatformContext,
    tail: Arc<Mutex<VecDeque<String>>>,
) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(id) = ctx.id() {
            ctx.emit(AppEvent::Install(InstallEvent::CommandOutput {
                id: id.to_string(),
                line: line.clone(),
            }));
        }
        if let Ok(mut tail) = tail.lock() {
            if tail.len() == TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }
}

/// SIGTERM the child's process group, escalating to SIGKILL after the grace period
async fn terminate(child: &mut Child) {
    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    let group = Pid::from_raw(pid);
    if let Err(e) = killpg(group, Signal::SIGTERM) {
        tracing::debug!(pid, error = %e, "SIGTERM failed");
    }
    if tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_err() {
        let _ = killpg(group, Signal::SIGKILL);
        let _ = child.wait().await;
    }
}

#[async_trait]
impl ProcessOperations for HostProcessOperations {
    async fn execute_command(
        &self,
        _ctx: &PlatformContext,
        cmd: PlatformCommand,
    ) -> Result<CommandOutput, Error> {
        let output = build_command(&cmd)
            .output()
            .await
            .map_err(|e| spawn_error(&cmd, &e))?;

        Ok(CommandOutput {
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn run_streaming(
        &self,
        ctx: &PlatformContext,
        cmd: PlatformCommand,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, Error> {
        let mut command = build_command(&cmd);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        tracing::debug!(command = %cmd.display(), "spawning");
        let mut child = command.spawn().map_err(|e| spawn_error(&cmd, &e))?;

        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(TAIL_LINES)));
        let mut pumps = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump(stdout, ctx.clone(), tail.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump(stderr, ctx.clone(), tail.clone())));
        }

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| spawn_error(&cmd, &e))?,
            () = cancel.cancelled() => {
                terminate(&mut child).await;
                for handle in pumps {
                    handle.abort();
                }
                return Err(Error::Cancelled);
            }
        };

        for handle in pumps {
            let _ = handle.await;
        }

        let stderr = tail
            .lock()
            .map(|lines| lines.iter().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default();

        Ok(CommandOutput {
            status,
            stdout: Vec::new(),
            stderr: stderr.into_bytes(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_streaming_forwards_lines() {
        let (tx, mut rx) = vessel_events::channel();
        let ctx = PlatformContext::new(Some(tx)).with_id("abc-p-1");
        let mut cmd = PlatformCommand::new("/bin/sh");
        cmd.args(["-c", "echo one; echo two >&2; exit 3"]);

        let output = HostProcessOperations::new()
            .run_streaming(&ctx, cmd, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.status.code(), Some(3));
        let mut lines = Vec::new();
        while let Ok(AppEvent::Install(InstallEvent::CommandOutput { line, .. })) = rx.try_recv() {
            lines.push(line);
        }
        lines.sort();
        assert_eq!(lines, vec!["one", "two"]);
        assert!(String::from_utf8_lossy(&output.stderr).contains("two"));
    }

    #[tokio::test]
    async fn test_cancel_terminates_process() {
        let ctx = PlatformContext::default();
        let mut cmd = PlatformCommand::new("/bin/sh");
        cmd.args(["-c", "sleep 30"]);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = HostProcessOperations::new()
            .run_streaming(&ctx, cmd, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = HostProcessOperations::new()
            .execute_command(
                &PlatformContext::default(),
                PlatformCommand::new("/nonexistent/vessel-tool"),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Platform(PlatformError::CommandNotFound { .. })
        ));
    }
}
