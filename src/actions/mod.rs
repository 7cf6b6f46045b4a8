//! Action execution
//!
//! One handler per `Action` variant turns a resolved command into a
//! `DisplayFrame`. Failures of external commands are rendered, not returned:
//! nothing here can end the dispatch loop.

pub mod facts;
pub mod process;
pub mod variables;

use std::time::Duration;

use rand::seq::SliceRandom;

use crate::commands::{Action, ResolvedAction, RunCommandSpec};
use crate::config::Config;
use crate::display::DisplayFrame;

pub use process::{ProcessResult, run_shell};
pub use variables::{ExecutionContext, mentions};

/// First line of the frame shown when a command outlives its timeout
pub const TIMED_OUT: &str = "Timed out";

/// First line of the frame shown for a failure when `show_errors` is off
pub const COMMAND_FAILED: &str = "Command failed";

/// Executor settings taken from the display and message configuration
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Hold time for built-in facts and command results
    pub result_hold: Duration,
    /// Captured output is cut to this many characters
    pub max_output_chars: usize,
    /// First line of the unmatched-utterance frame
    pub unknown_command: String,
    /// When non-empty, one of these replaces `unknown_command` at random
    pub error_responses: Vec<String>,
}

impl ExecutorConfig {
    /// Settings from a resolved configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            result_hold: config.display.command_result_time,
            max_output_chars: config.display.max_output_chars,
            unknown_command: config.messages.unknown_command.clone(),
            error_responses: config.messages.error_responses.clone(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// How an action ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Text rendered normally
    Rendered,
    /// External command killed at its timeout
    TimedOut,
    /// External command failed to start or exited non-zero
    Failed(String),
    /// Display cleared
    Cleared,
    /// Utterance matched no command
    Unknown,
}

/// Result of one dispatch cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    /// Frame to hand to the display
    pub frame: DisplayFrame,
    /// What happened
    pub outcome: ActionOutcome,
}

impl Execution {
    const fn rendered(frame: DisplayFrame) -> Self {
        Self {
            frame,
            outcome: ActionOutcome::Rendered,
        }
    }
}

/// Runs resolved actions
#[derive(Debug, Clone, Default)]
pub struct ActionExecutor {
    config: ExecutorConfig,
}

impl ActionExecutor {
    /// Create an executor
    #[must_use]
    pub const fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Run an action against the live clock and host facts
    pub async fn execute(&self, resolved: &ResolvedAction) -> Execution {
        let templates = templates(&resolved.command.action);
        let ip = if mentions(&templates, "ip") {
            facts::primary_ip().await
        } else {
            None
        };
        let ctx = ExecutionContext::now()
            .with_ip(ip)
            .with_hostname(mentions(&templates, "hostname").then(facts::host_name).flatten());

        self.execute_in(resolved, ctx).await
    }

    /// Run an action against a prepared context
    pub async fn execute_in(&self, resolved: &ResolvedAction, ctx: ExecutionContext) -> Execution {
        let name = resolved.command.name.as_str();
        let mut ctx = ctx.with_argument(resolved.argument.clone());
        tracing::debug!(command = name, kind = %resolved.command.action.kind(), "executing action");

        match &resolved.command.action {
            Action::ShowIp { display_format } => Execution::rendered(
                DisplayFrame::new(ctx.resolve_lines(display_format))
                    .with_hold(self.config.result_hold),
            ),
            Action::ShowTime {
                display_format,
                time_format,
                date_format,
            } => {
                let mut ctx = ctx.with_formats(time_format, date_format);
                Execution::rendered(
                    DisplayFrame::new(ctx.resolve_lines(display_format))
                        .with_hold(self.config.result_hold),
                )
            }
            Action::TellJoke {
                jokes,
                scroll_duration,
            } => {
                let joke = jokes.choose(ctx.rng()).cloned().unwrap_or_default();
                Execution::rendered(
                    DisplayFrame::new([ctx.resolve(&joke)]).with_hold(*scroll_duration),
                )
            }
            Action::CustomMessage {
                message,
                scroll_duration,
            } => Execution::rendered(
                DisplayFrame::new([ctx.resolve(message)]).with_hold(*scroll_duration),
            ),
            Action::RunCommand(spec) => {
                self.run_command(name, spec, resolved.argument.as_deref(), ctx)
                    .await
            }
            Action::ClearDisplay => Execution {
                frame: DisplayFrame::blank(),
                outcome: ActionOutcome::Cleared,
            },
        }
    }

    /// Frame for an utterance that matched nothing
    #[must_use]
    pub fn unknown(&self, utterance: &str) -> Execution {
        self.unknown_in(utterance, ExecutionContext::now())
    }

    /// Frame for an unmatched utterance, drawing the reply from `ctx`
    #[must_use]
    pub fn unknown_in(&self, utterance: &str, mut ctx: ExecutionContext) -> Execution {
        let reply = self
            .config
            .error_responses
            .choose(ctx.rng())
            .unwrap_or(&self.config.unknown_command);
        Execution {
            frame: DisplayFrame::new([reply.as_str(), utterance])
                .with_hold(self.config.result_hold),
            outcome: ActionOutcome::Unknown,
        }
    }

    async fn run_command(
        &self,
        name: &str,
        spec: &RunCommandSpec,
        argument: Option<&str>,
        ctx: ExecutionContext,
    ) -> Execution {
        tracing::info!(command = name, timeout = ?spec.timeout, "running external command");
        let hold = self.config.result_hold;

        match run_shell(&spec.command, argument, spec.timeout).await {
            ProcessResult::Success { stdout, stderr } => {
                let captured = if spec.show_errors && stdout.trim().is_empty() {
                    stderr
                } else {
                    stdout
                };
                let output = truncate_chars(captured.trim(), self.config.max_output_chars);
                let mut ctx = ctx.with_output(Some(output));
                Execution::rendered(
                    DisplayFrame::new(ctx.resolve_lines(&spec.display_format)).with_hold(hold),
                )
            }
            ProcessResult::TimedOut => {
                tracing::warn!(command = name, timeout = ?spec.timeout, "command timed out");
                Execution {
                    frame: DisplayFrame::new([TIMED_OUT, name]).with_hold(hold),
                    outcome: ActionOutcome::TimedOut,
                }
            }
            ProcessResult::Failed { code, stderr, .. } => {
                let summary = failure_summary(code, &stderr);
                tracing::warn!(command = name, ?code, %summary, "command failed");
                self.failure(name, spec.show_errors, summary)
            }
            ProcessResult::SpawnFailed(reason) => {
                tracing::error!(command = name, %reason, "command could not be started");
                self.failure(name, spec.show_errors, reason)
            }
        }
    }

    fn failure(&self, name: &str, show_errors: bool, summary: String) -> Execution {
        let frame = if show_errors {
            DisplayFrame::new([
                "Error:".to_string(),
                truncate_chars(&summary, self.config.max_output_chars),
            ])
        } else {
            DisplayFrame::new([COMMAND_FAILED, name])
        };
        Execution {
            frame: frame.with_hold(self.config.result_hold),
            outcome: ActionOutcome::Failed(summary),
        }
    }
}

/// Every template an action may expand
fn templates(action: &Action) -> Vec<String> {
    match action {
        Action::ShowIp { display_format } | Action::ShowTime { display_format, .. } => {
            display_format.clone()
        }
        Action::TellJoke { jokes, .. } => jokes.clone(),
        Action::CustomMessage { message, .. } => vec![message.clone()],
        Action::RunCommand(spec) => spec.display_format.clone(),
        Action::ClearDisplay => Vec::new(),
    }
}

/// First stderr line, else the exit status
fn failure_summary(code: Option<i32>, stderr: &str) -> String {
    stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map_or_else(
            || code.map_or_else(|| "killed by signal".to_string(), |c| format!("exit code {c}")),
            ToString::to_string,
        )
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
