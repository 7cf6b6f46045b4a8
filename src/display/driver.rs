//! External display driver processes
//!
//! Bus-level bring-up (I2C, controller init, fonts) lives in a small driver
//! program configured per display. voxpanel starts it once and writes one
//! JSON object per line to its stdin:
//!
//! ```text
//! {"op":"show","lines":["IP Address:","10.0.0.2"]}
//! {"op":"clear"}
//! ```
//!
//! Before that, `<driver> --probe` must exit 0 if the hardware answers.
//! Geometry is passed in `VOXPANEL_*` environment variables.

use std::io::Write;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::TextDevice;
use crate::{Error, Result};

/// How long a driver gets to exit after its stdin closes
const EXIT_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum DriverCommand<'a> {
    Show { lines: &'a [String] },
    Clear,
}

/// Driver command line plus its environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverSpec {
    /// Shell command that starts the driver
    pub command: String,
    /// Extra environment for the driver
    pub env: Vec<(String, String)>,
}

impl DriverSpec {
    /// A driver started by `command`
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            env: Vec::new(),
        }
    }

    /// Add an environment variable
    #[must_use]
    pub fn env(mut self, key: &str, value: impl ToString) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    fn shell(&self, command: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }

    /// Ask the driver whether its hardware is present
    ///
    /// # Errors
    ///
    /// Returns `HardwareUnavailable` if the probe fails or exits non-zero
    pub async fn probe(&self) -> Result<()> {
        let probe = self.shell(&format!("{} --probe", self.command));
        let mut cmd = tokio::process::Command::from(probe);
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        let output = cmd
            .output()
            .await
            .map_err(|e| Error::HardwareUnavailable(format!("failed to run driver: {e}")))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(Error::HardwareUnavailable(format!(
                "driver probe failed ({}): {}",
                output.status,
                stderr.trim()
            )))
        }
    }
}

/// A running driver process
pub struct DriverDevice {
    child: Child,
    stdin: Option<ChildStdin>,
    command: String,
}

impl DriverDevice {
    /// Start the driver
    ///
    /// # Errors
    ///
    /// Returns `HardwareUnavailable` if it cannot be started
    pub fn spawn(spec: &DriverSpec) -> Result<Self> {
        let mut child = spec
            .shell(&spec.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::HardwareUnavailable(format!("failed to start driver: {e}")))?;

        let stdin = child.stdin.take();
        tracing::debug!(command = %spec.command, pid = child.id(), "display driver started");

        Ok(Self {
            child,
            stdin,
            command: spec.command.clone(),
        })
    }

    fn send(&mut self, command: &DriverCommand<'_>) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Display("driver is closed".to_string()))?;

        let mut line = serde_json::to_vec(command)?;
        line.push(b'\n');
        stdin
            .write_all(&line)
            .and_then(|()| stdin.flush())
            .map_err(|e| {
                Error::Display(format!(
                    "driver '{}' stopped accepting writes: {e}",
                    self.command
                ))
            })
    }
}

impl TextDevice for DriverDevice {
    fn show(&mut self, lines: &[String]) -> Result<()> {
        self.send(&DriverCommand::Show { lines })
    }

    fn clear(&mut self) -> Result<()> {
        self.send(&DriverCommand::Clear)
    }

    /// Blocks for up to half a second while the driver exits; run it off
    /// the async runtime
    fn close(&mut self) -> Result<()> {
        let cleared = self.clear();
        self.stdin = None;

        let deadline = Instant::now() + EXIT_GRACE;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!(%status, "display driver exited");
                    break;
                }
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(20));
                }
                Ok(None) | Err(_) => {
                    let _ = self.child.kill();
                    let _ = self.child.wait();
                    tracing::debug!("display driver killed");
                    break;
                }
            }
        }
        cleared
    }
}

impl Drop for DriverDevice {
    fn drop(&mut self) {
        if self.stdin.is_some() {
            self.stdin = None;
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_json_lines() {
        let lines = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            serde_json::to_string(&DriverCommand::Show { lines: &lines }).unwrap(),
            r#"{"op":"show","lines":["a","b"]}"#
        );
        assert_eq!(serde_json::to_string(&DriverCommand::Clear).unwrap(), r#"{"op":"clear"}"#);
    }

    #[tokio::test]
    async fn probe_uses_exit_status() {
        assert!(DriverSpec::new("true").probe().await.is_ok());
        assert!(matches!(
            DriverSpec::new("false").probe().await,
            Err(Error::HardwareUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn probe_sees_environment() {
        let spec = DriverSpec::new("test \"$VOXPANEL_COLS\" = 16 || exit 1; true")
            .env("VOXPANEL_COLS", 16);
        assert!(spec.probe().await.is_ok());
    }

    #[test]
    fn driver_receives_frames() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("frames.jsonl");
        let spec = DriverSpec::new(format!("cat > '{}'", out.display()));

        let mut device = DriverDevice::spawn(&spec).unwrap();
        device.show(&["IP Address:".to_string(), "10.0.0.2".to_string()]).unwrap();
        device.close().unwrap();

        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(
            written,
            "{\"op\":\"show\",\"lines\":[\"IP Address:\",\"10.0.0.2\"]}\n{\"op\":\"clear\"}\n"
        );
    }
}
