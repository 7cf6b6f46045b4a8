//! Placeholder expansion for display templates
//!
//! | Placeholder     | Value                                            |
//! |-----------------|--------------------------------------------------|
//! | `{ip}`          | primary outbound address, `unknown` if missing   |
//! | `{time}`        | local time in the configured pattern             |
//! | `{date}`        | local date in the configured pattern             |
//! | `{random_X_Y}`  | fresh uniform integer in `[X, Y]` per occurrence |
//! | `{output}`      | trimmed stdout of the command just run           |
//! | `{arg}`         | text after a prefix-matched trigger              |
//! | `{hostname}`    | host name, `unknown` if missing                  |
//!
//! Anything else in braces is left as-is.

use std::sync::LazyLock;

use chrono::{DateTime, Local};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::{Captures, Regex};

use crate::commands::{DEFAULT_DATE_FORMAT, DEFAULT_TIME_FORMAT};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z0-9_-]+)\}").expect("valid regex"));

static RANDOM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^random_(-?\d+)_(-?\d+)$").expect("valid regex"));

/// Value substituted for `{ip}` and `{hostname}` when unavailable
pub const UNKNOWN: &str = "unknown";

/// Per-dispatch values that placeholders resolve against
///
/// Built once per action and dropped after rendering. Expansion reads only
/// from here, so a context with a fixed clock and seed renders the same text
/// every time.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    now: DateTime<Local>,
    time_format: String,
    date_format: String,
    ip: Option<String>,
    hostname: Option<String>,
    output: Option<String>,
    argument: Option<String>,
    rng: StdRng,
}

impl ExecutionContext {
    /// A context for the current instant with a random seed
    #[must_use]
    pub fn now() -> Self {
        Self::at(Local::now(), rand::thread_rng().r#gen())
    }

    /// A context at a fixed instant with a fixed seed
    #[must_use]
    pub fn at(now: DateTime<Local>, seed: u64) -> Self {
        Self {
            now,
            time_format: DEFAULT_TIME_FORMAT.to_string(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            ip: None,
            hostname: None,
            output: None,
            argument: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Set the `{time}` and `{date}` patterns
    #[must_use]
    pub fn with_formats(mut self, time_format: &str, date_format: &str) -> Self {
        self.time_format = time_format.to_string();
        self.date_format = date_format.to_string();
        self
    }

    /// Set `{ip}`
    #[must_use]
    pub fn with_ip(mut self, ip: Option<String>) -> Self {
        self.ip = ip;
        self
    }

    /// Set `{hostname}`
    #[must_use]
    pub fn with_hostname(mut self, hostname: Option<String>) -> Self {
        self.hostname = hostname;
        self
    }

    /// Set `{output}`
    #[must_use]
    pub fn with_output(mut self, output: Option<String>) -> Self {
        self.output = output;
        self
    }

    /// Set `{arg}`
    #[must_use]
    pub fn with_argument(mut self, argument: Option<String>) -> Self {
        self.argument = argument;
        self
    }

    /// The random source for this dispatch (joke selection uses it too)
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Expand every placeholder in `template`
    pub fn resolve(&mut self, template: &str) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &Captures<'_>| {
                let name = &caps[1];
                self.lookup(name).unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// Expand a list of line templates
    pub fn resolve_lines(&mut self, templates: &[String]) -> Vec<String> {
        templates.iter().map(|t| self.resolve(t)).collect()
    }

    fn lookup(&mut self, name: &str) -> Option<String> {
        match name {
            "ip" => Some(self.ip.clone().unwrap_or_else(|| UNKNOWN.to_string())),
            "time" => Some(self.now.format(&self.time_format).to_string()),
            "date" => Some(self.now.format(&self.date_format).to_string()),
            "output" => Some(self.output.as_deref().unwrap_or_default().trim().to_string()),
            "arg" => Some(self.argument.clone().unwrap_or_default()),
            "hostname" => Some(self.hostname.clone().unwrap_or_else(|| UNKNOWN.to_string())),
            _ => self.random(name),
        }
    }

    fn random(&mut self, name: &str) -> Option<String> {
        let caps = RANDOM.captures(name)?;
        let low: i64 = caps[1].parse().ok()?;
        let high: i64 = caps[2].parse().ok()?;
        (low <= high).then(|| self.rng.gen_range(low..=high).to_string())
    }
}

/// True if any template references the placeholder `name`
#[must_use]
pub fn mentions(templates: &[String], name: &str) -> bool {
    let needle = format!("{{{name}}}");
    templates.iter().any(|t| t.contains(&needle))
}
