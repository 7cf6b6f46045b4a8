//! External command execution with a hard timeout

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::timeout;

/// Name passed as `$0` to the shell so `$1` is the argument
const SHELL_ARG0: &str = "voxpanel";

/// Environment variable carrying the captured argument
pub const ARG_ENV: &str = "VOXPANEL_ARG";

/// How one external command run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessResult {
    /// Exit status 0
    Success {
        /// Captured stdout
        stdout: String,
        /// Captured stderr
        stderr: String,
    },
    /// Non-zero exit or killed by a signal
    Failed {
        /// Exit code, `None` if killed by a signal
        code: Option<i32>,
        /// Captured stdout
        stdout: String,
        /// Captured stderr
        stderr: String,
    },
    /// Did not finish within the timeout and was killed
    TimedOut,
    /// Could not be started at all
    SpawnFailed(String),
}

/// SIGKILLs the whole process group of a spawned shell when dropped
///
/// The shell is its own group leader, so anything it forked goes too.
/// Disarmed once the shell has exited on its own.
struct GroupGuard {
    #[cfg(unix)]
    pgid: Option<nix::unistd::Pid>,
}

impl GroupGuard {
    #[cfg(unix)]
    fn new(child: &Child) -> Self {
        let pgid = child
            .id()
            .and_then(|id| i32::try_from(id).ok())
            .map(nix::unistd::Pid::from_raw);
        Self { pgid }
    }

    #[cfg(not(unix))]
    const fn new(_child: &Child) -> Self {
        Self {}
    }

    #[cfg(unix)]
    fn kill(&mut self) {
        use nix::errno::Errno;
        use nix::sys::signal::{Signal, killpg};

        if let Some(pgid) = self.pgid.take() {
            match killpg(pgid, Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => tracing::debug!(error = %e, %pgid, "process group kill failed"),
            }
        }
    }

    #[cfg(not(unix))]
    fn kill(&mut self) {}

    fn disarm(&mut self) {
        #[cfg(unix)]
        {
            self.pgid = None;
        }
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Run `command` with `sh -c`, killing it if it outlives `limit`
///
/// The optional argument is passed as `$1` and `VOXPANEL_ARG` rather than
/// spliced into the command line. On timeout, or if the returned future is
/// dropped, the shell and everything it started are killed. Output captured
/// from a killed process is discarded.
pub async fn run_shell(command: &str, argument: Option<&str>, limit: Duration) -> ProcessResult {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .arg(SHELL_ARG0)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    if let Some(arg) = argument {
        cmd.arg(arg).env(ARG_ENV, arg);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return ProcessResult::SpawnFailed(e.to_string()),
    };

    tracing::debug!(command, pid = ?child.id(), ?limit, "command spawned");
    let mut group = GroupGuard::new(&child);

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let collect = async {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let read_out = async {
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut stdout).await;
            }
        };
        let read_err = async {
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut stderr).await;
            }
        };
        tokio::join!(read_out, read_err);
        let status = child.wait().await;
        (status, stdout, stderr)
    };

    match timeout(limit, collect).await {
        Ok((Ok(status), stdout, stderr)) => {
            // The leader is reaped, its pgid may be reused
            group.disarm();
            let stdout = String::from_utf8_lossy(&stdout).into_owned();
            let stderr = String::from_utf8_lossy(&stderr).into_owned();
            if status.success() {
                ProcessResult::Success { stdout, stderr }
            } else {
                ProcessResult::Failed {
                    code: status.code(),
                    stdout,
                    stderr,
                }
            }
        }
        Ok((Err(e), _, _)) => ProcessResult::SpawnFailed(format!("wait failed: {e}")),
        Err(_) => {
            group.kill();
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "kill after timeout failed");
            }
            let _ = child.wait().await;
            tracing::warn!(command, ?limit, "command timed out, killed");
            ProcessResult::TimedOut
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_on_success() {
        let result = run_shell("echo hello; echo oops >&2", None, Duration::from_secs(5)).await;
        assert_eq!(
            result,
            ProcessResult::Success {
                stdout: "hello\n".to_string(),
                stderr: "oops\n".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn reports_exit_code() {
        let result = run_shell("echo bad >&2; exit 3", None, Duration::from_secs(5)).await;
        let ProcessResult::Failed { code, stderr, .. } = result else {
            panic!("expected failure, got {result:?}");
        };
        assert_eq!(code, Some(3));
        assert_eq!(stderr, "bad\n");
    }

    #[tokio::test]
    async fn times_out_and_discards_output() {
        let started = std::time::Instant::now();
        let result = run_shell("echo partial; sleep 5", None, Duration::from_millis(200)).await;
        assert_eq!(result, ProcessResult::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn argument_is_positional_and_env() {
        let result = run_shell(
            "echo \"$1|$VOXPANEL_ARG\"",
            Some("75; echo injected"),
            Duration::from_secs(5),
        )
        .await;
        let ProcessResult::Success { stdout, .. } = result else {
            panic!("expected success, got {result:?}");
        };
        assert_eq!(stdout.trim(), "75; echo injected|75; echo injected");
    }

    #[tokio::test]
    async fn timeout_kills_forked_children() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("late");
        // The trailing `true` keeps sh from exec'ing the inner shell
        let command = format!("sh -c 'sleep 1; touch \"{}\"'; true", marker.display());

        let result = run_shell(&command, None, Duration::from_millis(200)).await;
        assert_eq!(result, ProcessResult::TimedOut);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "forked child outlived the timeout");
    }

    #[tokio::test]
    async fn dropping_the_run_kills_forked_children() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("late");
        let command = format!("sh -c 'sleep 1; touch \"{}\"'; true", marker.display());

        let run = run_shell(&command, None, Duration::from_secs(30));
        assert!(tokio::time::timeout(Duration::from_millis(200), run).await.is_err());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "forked child outlived the dropped run");
    }
}
