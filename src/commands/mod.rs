//! Command table
//!
//! The validated, immutable set of voice commands built from the `commands`
//! section of the configuration. Every trigger phrase (canonical name or
//! alias) maps to exactly one command; collisions are rejected when the table
//! is built, never at match time.

mod matcher;

pub use matcher::{MatchOutcome, ResolvedAction, normalize};

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::file::CommandEntry;
use crate::error::ValidationErrors;

/// Default `{time}` pattern
pub const DEFAULT_TIME_FORMAT: &str = "%H:%M:%S";

/// Default `{date}` pattern
pub const DEFAULT_DATE_FORMAT: &str = "%m/%d/%y";

/// Default scroll duration for tell_joke
const JOKE_SCROLL_SECS: f64 = 8.0;

/// Default scroll duration for custom_message
const MESSAGE_SCROLL_SECS: f64 = 5.0;

/// The closed set of behaviours a command can trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Show the primary network address
    ShowIp,
    /// Show the current time and date
    ShowTime,
    /// Show a random joke
    TellJoke,
    /// Show a configured message template
    CustomMessage,
    /// Run an external command and show its output
    RunCommand,
    /// Blank the display
    ClearDisplay,
}

impl ActionKind {
    /// Every action kind, in declaration order
    pub const ALL: [Self; 6] = [
        Self::ShowIp,
        Self::ShowTime,
        Self::TellJoke,
        Self::CustomMessage,
        Self::RunCommand,
        Self::ClearDisplay,
    ];

    /// Parse from the configuration name (e.g. "show_ip")
    #[must_use]
    pub fn from_name(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Configuration name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ShowIp => "show_ip",
            Self::ShowTime => "show_time",
            Self::TellJoke => "tell_joke",
            Self::CustomMessage => "custom_message",
            Self::RunCommand => "run_command",
            Self::ClearDisplay => "clear_display",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a run_command action
#[derive(Debug, Clone, PartialEq)]
pub struct RunCommandSpec {
    /// Shell command line, run with `sh -c`
    pub command: String,
    /// Hard bound on execution time
    pub timeout: Duration,
    /// Show stderr / exit details on failure instead of a generic frame
    pub show_errors: bool,
    /// Line templates rendered after a successful run
    pub display_format: Vec<String>,
}

/// What a command does, with its kind-specific parameters
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Show the primary network address
    ShowIp {
        /// Line templates
        display_format: Vec<String>,
    },
    /// Show the current time and date
    ShowTime {
        /// Line templates
        display_format: Vec<String>,
        /// strftime pattern for `{time}`
        time_format: String,
        /// strftime pattern for `{date}`
        date_format: String,
    },
    /// Scroll a randomly chosen joke
    TellJoke {
        /// Candidate jokes, never empty
        jokes: Vec<String>,
        /// How long the joke stays up
        scroll_duration: Duration,
    },
    /// Show a message template
    CustomMessage {
        /// Message template
        message: String,
        /// How long the message stays up
        scroll_duration: Duration,
    },
    /// Run an external command
    RunCommand(RunCommandSpec),
    /// Blank the display
    ClearDisplay,
}

impl Action {
    /// The kind tag of this action
    #[must_use]
    pub const fn kind(&self) -> ActionKind {
        match self {
            Self::ShowIp { .. } => ActionKind::ShowIp,
            Self::ShowTime { .. } => ActionKind::ShowTime,
            Self::TellJoke { .. } => ActionKind::TellJoke,
            Self::CustomMessage { .. } => ActionKind::CustomMessage,
            Self::RunCommand(_) => ActionKind::RunCommand,
            Self::ClearDisplay => ActionKind::ClearDisplay,
        }
    }
}

/// One configured command
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    /// Canonical name (unique key)
    pub name: String,
    /// Normalized alias phrases
    pub aliases: Vec<String>,
    /// The action to run
    pub action: Action,
}

impl CommandSpec {
    /// Every normalized phrase that triggers this command, canonical name first
    #[must_use]
    pub fn triggers(&self) -> Vec<String> {
        let mut triggers = vec![normalize(&self.name)];
        for alias in &self.aliases {
            if !triggers.contains(alias) {
                triggers.push(alias.clone());
            }
        }
        triggers
    }
}

/// Defaults that command entries inherit from other config sections
#[derive(Debug, Clone)]
pub struct CommandDefaults {
    /// `messages.jokes`
    pub jokes: Vec<String>,
    /// `advanced.default_timeout`
    pub timeout: Duration,
}

impl Default for CommandDefaults {
    fn default() -> Self {
        Self {
            jokes: Vec::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Validated, immutable command set
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    commands: Vec<Arc<CommandSpec>>,
    /// normalized trigger phrase → index into `commands`
    triggers: HashMap<String, usize>,
}

impl CommandTable {
    /// Build a table from configuration entries
    ///
    /// Problems are appended to `errors`; the returned table only contains
    /// commands that validated cleanly, so callers must check `errors`
    /// before using it.
    pub fn from_entries(
        entries: &BTreeMap<String, CommandEntry>,
        defaults: &CommandDefaults,
        errors: &mut ValidationErrors,
    ) -> Self {
        let mut table = Self::default();

        for (name, entry) in entries {
            let field = format!("commands.{name}");

            if normalize(name).is_empty() {
                errors.push(field, "command name is empty");
                continue;
            }

            let Some(action) = build_action(&field, entry, defaults, errors) else {
                continue;
            };

            let mut aliases = Vec::with_capacity(entry.aliases.len());
            for (i, alias) in entry.aliases.iter().enumerate() {
                let normalized = normalize(alias);
                if normalized.is_empty() {
                    errors.push(format!("{field}.aliases[{i}]"), "alias is empty");
                } else if !aliases.contains(&normalized) {
                    aliases.push(normalized);
                }
            }

            let spec = CommandSpec {
                name: name.clone(),
                aliases,
                action,
            };

            table.insert(spec, &field, errors);
        }

        table
    }

    /// Add a command, rejecting trigger collisions with commands already present
    fn insert(&mut self, spec: CommandSpec, field: &str, errors: &mut ValidationErrors) {
        let triggers = spec.triggers();
        let mut collided = false;

        for trigger in &triggers {
            if let Some(&existing) = self.triggers.get(trigger) {
                let other = &self.commands[existing].name;
                errors.push(
                    format!("{field}.aliases"),
                    format!("trigger '{trigger}' is already used by command '{other}'"),
                );
                collided = true;
            }
        }

        if collided {
            return;
        }

        let index = self.commands.len();
        for trigger in triggers {
            self.triggers.insert(trigger, index);
        }
        self.commands.push(Arc::new(spec));
    }

    /// Look up a command by canonical name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<CommandSpec>> {
        self.commands.iter().find(|c| c.name == name)
    }

    /// Look up a command by normalized trigger phrase
    #[must_use]
    pub fn by_trigger(&self, trigger: &str) -> Option<&Arc<CommandSpec>> {
        self.triggers.get(trigger).map(|&i| &self.commands[i])
    }

    /// Every normalized trigger phrase with its command
    pub fn triggers(&self) -> impl Iterator<Item = (&str, &Arc<CommandSpec>)> {
        self.triggers
            .iter()
            .map(|(trigger, &i)| (trigger.as_str(), &self.commands[i]))
    }

    /// Commands in configuration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<CommandSpec>> {
        self.commands.iter()
    }

    /// Number of commands
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// True if no commands are configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Validate one entry's action kind and parameters
fn build_action(
    field: &str,
    entry: &CommandEntry,
    defaults: &CommandDefaults,
    errors: &mut ValidationErrors,
) -> Option<Action> {
    let Some(kind_name) = entry.action.as_deref() else {
        errors.push(format!("{field}.action"), "missing required field");
        return None;
    };

    let Some(kind) = ActionKind::from_name(kind_name) else {
        errors.push(
            format!("{field}.action"),
            format!("unknown action kind '{kind_name}'"),
        );
        return None;
    };

    let before = errors.len();

    if entry.timeout.is_some() && kind != ActionKind::RunCommand {
        errors.push(format!("{field}.timeout"), "only valid for run_command");
    }

    let action = match kind {
        ActionKind::ShowIp => Action::ShowIp {
            display_format: display_format(field, entry, &["IP Address:", "{ip}"], errors),
        },
        ActionKind::ShowTime => Action::ShowTime {
            display_format: display_format(field, entry, &["{time}", "{date}"], errors),
            time_format: strftime_pattern(
                &format!("{field}.time_format"),
                entry.time_format.as_deref(),
                DEFAULT_TIME_FORMAT,
                errors,
            ),
            date_format: strftime_pattern(
                &format!("{field}.date_format"),
                entry.date_format.as_deref(),
                DEFAULT_DATE_FORMAT,
                errors,
            ),
        },
        ActionKind::TellJoke => {
            let jokes = entry.jokes.clone().unwrap_or_else(|| defaults.jokes.clone());
            if jokes.iter().all(|j| j.trim().is_empty()) {
                errors.push(
                    format!("{field}.jokes"),
                    "tell_joke needs a non-empty joke list (here or in messages.jokes)",
                );
            }
            Action::TellJoke {
                jokes: jokes.into_iter().filter(|j| !j.trim().is_empty()).collect(),
                scroll_duration: seconds(
                    &format!("{field}.scroll_duration"),
                    entry.scroll_duration,
                    JOKE_SCROLL_SECS,
                    errors,
                ),
            }
        }
        ActionKind::CustomMessage => {
            let message = entry.message.clone().unwrap_or_default();
            if message.trim().is_empty() {
                errors.push(
                    format!("{field}.message"),
                    "missing required parameter for custom_message",
                );
            }
            Action::CustomMessage {
                message,
                scroll_duration: seconds(
                    &format!("{field}.scroll_duration"),
                    entry.scroll_duration,
                    MESSAGE_SCROLL_SECS,
                    errors,
                ),
            }
        }
        ActionKind::RunCommand => {
            let command = entry.command.clone().unwrap_or_default();
            if command.trim().is_empty() {
                errors.push(
                    format!("{field}.command"),
                    "missing required parameter for run_command",
                );
            }
            Action::RunCommand(RunCommandSpec {
                command,
                timeout: entry.timeout.map_or(defaults.timeout, |t| {
                    seconds(&format!("{field}.timeout"), Some(t), 0.0, errors)
                }),
                show_errors: entry.show_errors.unwrap_or(true),
                display_format: display_format(field, entry, &["Output:", "{output}"], errors),
            })
        }
        ActionKind::ClearDisplay => Action::ClearDisplay,
    };

    (errors.len() == before).then_some(action)
}

fn display_format(
    field: &str,
    entry: &CommandEntry,
    default: &[&str],
    errors: &mut ValidationErrors,
) -> Vec<String> {
    match &entry.display_format {
        None => default.iter().map(ToString::to_string).collect(),
        Some(lines) if lines.is_empty() || lines.len() > 2 => {
            errors.push(
                format!("{field}.display_format"),
                format!("expected one or two line templates, got {}", lines.len()),
            );
            Vec::new()
        }
        Some(lines) => lines.clone(),
    }
}

fn strftime_pattern(
    field: &str,
    value: Option<&str>,
    default: &str,
    errors: &mut ValidationErrors,
) -> String {
    let pattern = value.unwrap_or(default);
    let invalid = chrono::format::StrftimeItems::new(pattern)
        .any(|item| matches!(item, chrono::format::Item::Error));
    if invalid {
        errors.push(field, format!("invalid time pattern '{pattern}'"));
    }
    pattern.to_string()
}

/// Convert a positive number of seconds, recording an error otherwise
pub(crate) fn seconds(
    field: &str,
    value: Option<f64>,
    default: f64,
    errors: &mut ValidationErrors,
) -> Duration {
    let secs = value.unwrap_or(default);
    match Duration::try_from_secs_f64(secs) {
        Ok(d) if value.is_none() || !d.is_zero() => d,
        _ => {
            errors.push(field, format!("expected a positive number of seconds, got {secs}"));
            Duration::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(action: &str) -> CommandEntry {
        CommandEntry {
            action: Some(action.to_string()),
            ..Default::default()
        }
    }

    fn build(entries: Vec<(&str, CommandEntry)>) -> (CommandTable, ValidationErrors) {
        let map: BTreeMap<String, CommandEntry> = entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let mut errors = ValidationErrors::new();
        let defaults = CommandDefaults {
            jokes: vec!["Why did the Pi blush? It saw the RAM.".to_string()],
            ..Default::default()
        };
        let table = CommandTable::from_entries(&map, &defaults, &mut errors);
        (table, errors)
    }

    #[test]
    fn action_kind_names_round_trip() {
        for kind in ActionKind::ALL {
            assert_eq!(ActionKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(ActionKind::from_name("dance"), None);
    }

    #[test]
    fn builds_table_with_defaults() {
        let (table, errors) = build(vec![
            ("show_ip", CommandEntry { aliases: vec!["IP  Address".into()], ..entry("show_ip") }),
            ("clear", entry("clear_display")),
        ]);

        assert!(errors.is_empty(), "{errors}");
        assert_eq!(table.len(), 2);

        let ip = table.get("show_ip").unwrap();
        assert_eq!(ip.aliases, vec!["ip address"]);
        assert_eq!(
            ip.action,
            Action::ShowIp { display_format: vec!["IP Address:".into(), "{ip}".into()] }
        );
        assert_eq!(table.by_trigger("show ip").unwrap().name, "show_ip");
        assert_eq!(table.by_trigger("ip address").unwrap().name, "show_ip");
    }

    #[test]
    fn rejects_alias_shared_between_commands() {
        let (table, errors) = build(vec![
            (
                "lights_on",
                CommandEntry {
                    aliases: vec!["lights".into()],
                    ..entry("clear_display")
                },
            ),
            (
                "lights_off",
                CommandEntry {
                    aliases: vec!["Lights".into()],
                    ..entry("clear_display")
                },
            ),
        ]);

        assert_eq!(errors.len(), 1);
        assert_eq!(errors.errors()[0].field, "commands.lights_on.aliases");
        assert!(errors.errors()[0].reason.contains("lights_off"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn rejects_alias_equal_to_other_canonical_name() {
        let (_, errors) = build(vec![
            ("show_time", entry("show_time")),
            ("clock", CommandEntry { aliases: vec!["show time".into()], ..entry("show_time") }),
        ]);

        assert_eq!(errors.len(), 1);
        assert!(errors.errors()[0].reason.contains("show time"));
    }

    #[test]
    fn alias_equal_to_own_name_is_fine() {
        let (table, errors) = build(vec![(
            "show_time",
            CommandEntry { aliases: vec!["show time".into(), "time".into()], ..entry("show_time") },
        )]);
        assert!(errors.is_empty());
        assert_eq!(table.get("show_time").unwrap().triggers(), vec!["show time", "time"]);
    }

    #[test]
    fn reports_every_problem() {
        let (table, errors) = build(vec![
            ("a", entry("dance")),
            ("b", CommandEntry::default()),
            ("c", entry("run_command")),
            ("d", entry("custom_message")),
            ("e", CommandEntry { timeout: Some(3.0), ..entry("show_ip") }),
            ("f", CommandEntry { display_format: Some(vec![]), ..entry("show_ip") }),
        ]);

        assert!(table.is_empty());
        assert!(errors.contains_field("commands.a.action"));
        assert!(errors.contains_field("commands.b.action"));
        assert!(errors.contains_field("commands.c.command"));
        assert!(errors.contains_field("commands.d.message"));
        assert!(errors.contains_field("commands.e.timeout"));
        assert!(errors.contains_field("commands.f.display_format"));
        assert_eq!(errors.len(), 6);
    }

    #[test]
    fn run_command_timeout_and_defaults() {
        let (table, errors) = build(vec![
            (
                "uptime",
                CommandEntry {
                    command: Some("uptime".into()),
                    timeout: Some(1.5),
                    ..entry("run_command")
                },
            ),
            (
                "temp",
                CommandEntry {
                    command: Some("vcgencmd measure_temp".into()),
                    show_errors: Some(false),
                    ..entry("run_command")
                },
            ),
        ]);
        assert!(errors.is_empty(), "{errors}");

        let Action::RunCommand(uptime) = &table.get("uptime").unwrap().action else {
            panic!("expected run_command");
        };
        assert_eq!(uptime.timeout, Duration::from_millis(1500));
        assert!(uptime.show_errors);
        assert_eq!(uptime.display_format, vec!["Output:", "{output}"]);

        let Action::RunCommand(temp) = &table.get("temp").unwrap().action else {
            panic!("expected run_command");
        };
        assert_eq!(temp.timeout, Duration::from_secs(10));
        assert!(!temp.show_errors);
    }

    #[test]
    fn rejects_non_positive_timeout() {
        let (_, errors) = build(vec![(
            "x",
            CommandEntry {
                command: Some("true".into()),
                timeout: Some(0.0),
                ..entry("run_command")
            },
        )]);
        assert!(errors.contains_field("commands.x.timeout"));

        let (_, errors) = build(vec![(
            "y",
            CommandEntry {
                command: Some("true".into()),
                timeout: Some(-2.0),
                ..entry("run_command")
            },
        )]);
        assert!(errors.contains_field("commands.y.timeout"));
    }

    #[test]
    fn joke_falls_back_to_shared_pool() {
        let (table, errors) = build(vec![("joke", entry("tell_joke"))]);
        assert!(errors.is_empty());
        let Action::TellJoke { jokes, scroll_duration } = &table.get("joke").unwrap().action else {
            panic!("expected tell_joke");
        };
        assert_eq!(jokes.len(), 1);
        assert_eq!(*scroll_duration, Duration::from_secs(8));
    }

    #[test]
    fn rejects_bad_time_pattern() {
        let (_, errors) = build(vec![(
            "clock",
            CommandEntry { time_format: Some("%Q".into()), ..entry("show_time") },
        )]);
        assert!(errors.contains_field("commands.clock.time_format"));
    }
}
