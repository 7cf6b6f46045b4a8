//! Display-arbitration service lifecycle
//!
//! Some pixel displays are owned by another long-running service (a status
//! screen, a clock). While voxpanel drives the display that service must be
//! stopped, and it must come back on every exit path. `ServiceLease` stops
//! the unit on acquire and restores its prior state on release or drop.

use crate::{Error, Result};

/// Service status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStatus {
    /// Service is running
    Running,
    /// Service is installed but not running
    Stopped,
    /// Status could not be determined
    Unknown(String),
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Unknown(msg) => write!(f, "unknown ({msg})"),
        }
    }
}

/// A systemd unit and the `systemctl` used to control it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUnit {
    /// Unit name, e.g. `oled-status.service`
    pub name: String,
    /// Use the user manager (`systemctl --user`)
    pub user: bool,
    /// Control program and leading arguments, `systemctl` unless overridden
    pub program: String,
}

impl ServiceUnit {
    /// A system unit controlled by `systemctl`
    pub fn new(name: impl Into<String>, user: bool) -> Self {
        Self {
            name: name.into(),
            user,
            program: "systemctl".to_string(),
        }
    }

    /// Use a different control program with the same arguments
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, verb: &str) -> std::process::Command {
        let mut words = self.program.split_whitespace();
        let mut cmd = std::process::Command::new(words.next().unwrap_or("systemctl"));
        cmd.args(words).args(self.args(verb));
        cmd
    }

    fn args<'a>(&'a self, verb: &'a str) -> Vec<&'a str> {
        let mut args = Vec::with_capacity(3);
        if self.user {
            args.push("--user");
        }
        args.push(verb);
        args.push(&self.name);
        args
    }

    /// Query whether the unit is active
    ///
    /// # Errors
    ///
    /// Returns error if the control program cannot be run
    pub fn status(&self) -> Result<ServiceStatus> {
        let output = self
            .command("is-active")
            .output()
            .map_err(|e| Error::Service(format!("failed to run {}: {e}", self.program)))?;

        let status = String::from_utf8_lossy(&output.stdout).trim().to_string();
        match status.as_str() {
            "active" | "activating" | "reloading" => Ok(ServiceStatus::Running),
            "inactive" | "failed" | "deactivating" => Ok(ServiceStatus::Stopped),
            other => Ok(ServiceStatus::Unknown(other.to_string())),
        }
    }

    /// Stop the unit
    ///
    /// # Errors
    ///
    /// Returns error if the control program fails
    pub fn stop(&self) -> Result<()> {
        self.run("stop")
    }

    /// Start the unit
    ///
    /// # Errors
    ///
    /// Returns error if the control program fails
    pub fn start(&self) -> Result<()> {
        self.run("start")
    }

    fn run(&self, verb: &str) -> Result<()> {
        let output = self
            .command(verb)
            .output()
            .map_err(|e| Error::Service(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Service(format!(
                "{} {} failed: {}",
                self.program,
                self.args(verb).join(" "),
                stderr.trim()
            )));
        }

        Ok(())
    }
}

/// Exclusive hold on a display owned by another service
///
/// The unit is restarted on `release` or drop only if it was running (or its
/// state was unknown) when the lease was taken.
#[derive(Debug)]
pub struct ServiceLease {
    unit: ServiceUnit,
    restore: bool,
    released: bool,
}

impl ServiceLease {
    /// Stop `unit` and hold it stopped until the lease ends
    ///
    /// # Errors
    ///
    /// Returns error if the unit could not be stopped
    pub fn acquire(unit: ServiceUnit) -> Result<Self> {
        let status = unit.status()?;
        let restore = status != ServiceStatus::Stopped;

        if restore {
            unit.stop()?;
            tracing::info!(unit = %unit.name, previous = %status, "stopped display service");
        } else {
            tracing::debug!(unit = %unit.name, "display service already stopped");
        }

        Ok(Self {
            unit,
            restore,
            released: false,
        })
    }

    /// Restore the unit's prior state now
    ///
    /// # Errors
    ///
    /// Returns error if the unit could not be restarted
    pub fn release(mut self) -> Result<()> {
        self.restore_now()
    }

    fn restore_now(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        if self.restore {
            self.unit.start()?;
            tracing::info!(unit = %self.unit.name, "restarted display service");
        }
        Ok(())
    }
}

impl Drop for ServiceLease {
    fn drop(&mut self) {
        if let Err(e) = self.restore_now() {
            tracing::error!(
                unit = %self.unit.name,
                error = %e,
                "failed to restore display service"
            );
        }
    }
}
