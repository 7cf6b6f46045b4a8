//! Configuration management for voxpanel
//!
//! `file` holds the raw document schema. `Config` is the resolved, validated
//! form: every default applied and the command table built. A `Config` is
//! immutable; reload builds a new one and swaps it in.

pub mod file;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::commands::{CommandDefaults, CommandTable, seconds};
use crate::dispatcher::BusyPolicy;
use crate::display::{DisplayVariant, Overflow};
use crate::lifecycle::ServiceUnit;
use crate::retry::RetryPolicy;
use crate::{Error, Result, ValidationErrors};

pub use file::{
    CONFIG_ENV, ConfigDocument, DocumentFormat, default_config_path, load_document, parse_document,
};

/// Wake words used when the document names none
pub const DEFAULT_WAKE_WORDS: [&str; 2] = ["pi", "pie"];

/// Joke pool used when the document names none
pub const DEFAULT_JOKE: &str = "No jokes configured!";

/// Text of the frame shown for unmatched utterances
pub const DEFAULT_UNKNOWN_COMMAND: &str = "Unknown command";

/// Resolved voxpanel configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Display hardware
    pub hardware: HardwareConfig,

    /// Display timing and layout
    pub display: DisplayConfig,

    /// Wake words and transcription
    pub voice: VoiceConfig,

    /// Shared message text
    pub messages: MessagesConfig,

    /// Logging, history, reload, and dispatch policy
    pub advanced: AdvancedConfig,

    /// Validated command table
    pub commands: Arc<CommandTable>,

    /// File this configuration was loaded from, if any
    pub source: Option<PathBuf>,
}

/// Display hardware configuration
#[derive(Debug, Clone)]
pub struct HardwareConfig {
    /// I2C address of the character LCD backpack
    pub lcd_i2c_address: u16,

    /// I2C bus number
    pub i2c_bus: u8,

    /// Character grid columns
    pub lcd_cols: usize,

    /// Character grid rows
    pub lcd_rows: usize,

    /// Driver command for the character grid
    pub lcd_driver: Option<String>,

    /// Driver command for the pixel display
    pub oled_driver: Option<String>,

    /// Pixel display width in pixels
    pub oled_width: u32,

    /// Pixel display height in pixels
    pub oled_height: u32,

    /// Advance of one glyph in pixels
    pub glyph_width: u32,

    /// Height of one text line in pixels
    pub line_height: u32,

    /// Service that owns the pixel display while voxpanel is not running
    pub display_service: Option<ServiceUnit>,

    /// Bounded retries for each hardware probe
    pub probe: RetryPolicy,

    /// Skip probing and use this variant (console remains the fallback)
    pub preferred: Option<DisplayVariant>,
}

/// Display timing configuration
#[derive(Debug, Clone)]
pub struct DisplayConfig {
    /// Time between horizontal scroll steps
    pub scroll_step: Duration,

    /// What the character grid does with lines wider than a row
    pub overflow: Overflow,

    /// Hold time for ShowIP, ShowTime, and RunCommand results
    pub command_result_time: Duration,

    /// Hold time for short "Heard:" frames
    pub short_text_display_time: Duration,

    /// Per-line dwell of the pixel display's auto-scroll
    pub line_dwell: Duration,

    /// Frame shown once the display is up
    pub startup_message: Vec<String>,

    /// Captured command output is cut to this many characters
    pub max_output_chars: usize,
}

/// Voice configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Wake phrases
    pub wake_words: Vec<String>,

    /// Speech model directory handed to the transcriber
    pub model_path: Option<String>,

    /// Transcriber command; stdin is read when unset
    pub transcriber: Option<String>,

    /// Show a "Heard:" frame for every final transcript
    pub show_all_transcriptions: bool,

    /// Log and show transcripts that carry no wake word
    pub debug_transcripts: bool,

    /// Audio sample rate handed to the transcriber
    pub audio_sample_rate: u32,

    /// Audio chunk size handed to the transcriber
    pub audio_chunk_size: u32,
}

/// Message text configuration
#[derive(Debug, Clone)]
pub struct MessagesConfig {
    /// Default joke pool
    pub jokes: Vec<String>,

    /// First line of the frame shown for unmatched utterances
    pub unknown_command: String,

    /// Random replacements for `unknown_command`; blank entries dropped
    pub error_responses: Vec<String>,
}

/// Advanced configuration
#[derive(Debug, Clone)]
pub struct AdvancedConfig {
    /// Also write logs to `log_file`
    pub enable_logging: bool,

    /// Log file path
    pub log_file: PathBuf,

    /// Keep a ring of recent commands
    pub enable_command_history: bool,

    /// Capacity of the command history ring
    pub max_command_history: usize,

    /// What happens to utterances arriving while an action runs
    pub busy_policy: BusyPolicy,

    /// Reload the config file on SIGHUP
    pub reload_on_sighup: bool,

    /// Timeout for run_command entries that do not set one
    pub default_timeout: Duration,

    /// Transcript reconnect attempts before reporting listening unavailable
    pub reconnect_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        match Self::from_document(&ConfigDocument::default()) {
            Ok(config) => config,
            // An empty document only uses defaults, which always validate
            Err(errors) => unreachable!("default configuration is invalid: {errors}"),
        }
    }
}

impl Config {
    /// Load and validate the configuration at `path`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed, or validated
    pub fn load(path: &Path) -> Result<Self> {
        let document = load_document(path)?;
        let mut config = Self::from_document(&document).map_err(Error::Validation)?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Load `path` if it exists, else fall back to defaults
    ///
    /// # Errors
    ///
    /// Returns error if an existing file cannot be read, parsed, or validated
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Resolve defaults and validate a whole document
    ///
    /// Every problem is collected before returning.
    ///
    /// # Errors
    ///
    /// Returns the list of rejected fields
    pub fn from_document(doc: &ConfigDocument) -> std::result::Result<Self, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let hardware = resolve_hardware(&doc.hardware, &mut errors);
        let display = resolve_display(&doc.display, &mut errors);
        let voice = resolve_voice(&doc.voice, &mut errors);
        let messages = resolve_messages(&doc.messages);
        let advanced = resolve_advanced(&doc.advanced, &mut errors);

        let defaults = CommandDefaults {
            jokes: messages.jokes.clone(),
            timeout: advanced.default_timeout,
        };
        let commands = CommandTable::from_entries(&doc.commands, &defaults, &mut errors);

        errors.into_result(Self {
            hardware,
            display,
            voice,
            messages,
            advanced,
            commands: Arc::new(commands),
            source: None,
        })
    }
}

fn resolve_hardware(
    section: &file::HardwareSection,
    errors: &mut ValidationErrors,
) -> HardwareConfig {
    let address = section.lcd_i2c_address.as_deref().unwrap_or("0x3f");
    let lcd_i2c_address = parse_i2c_address(address).unwrap_or_else(|| {
        errors.push("hardware.lcd_i2c_address", format!("'{address}' is not a hex address"));
        0
    });

    let lcd_cols = section.lcd_cols.unwrap_or(16);
    if lcd_cols == 0 {
        errors.push("hardware.lcd_cols", "must be at least 1");
    }
    let lcd_rows = section.lcd_rows.unwrap_or(2);
    if !(1..=4).contains(&lcd_rows) {
        errors.push("hardware.lcd_rows", format!("expected 1 to 4 rows, got {lcd_rows}"));
    }

    let oled_width = section.oled_width.unwrap_or(128);
    let oled_height = section.oled_height.unwrap_or(32);
    let glyph_width = section.glyph_width.unwrap_or(6);
    let line_height = section.line_height.unwrap_or(8);
    if glyph_width == 0 || oled_width / glyph_width.max(1) == 0 {
        errors.push("hardware.glyph_width", "no glyph fits the display width");
    }
    if line_height == 0 || oled_height / line_height.max(1) < 2 {
        errors.push(
            "hardware.line_height",
            "the display must fit a status line and at least one content line",
        );
    }

    let display_service = section.display_service.as_ref().and_then(|entry| {
        if entry.name.trim().is_empty() {
            errors.push("hardware.display_service.name", "service name is empty");
            None
        } else {
            Some(ServiceUnit::new(entry.name.trim(), entry.user))
        }
    });

    let attempts = section.probe_attempts.unwrap_or(3);
    if attempts == 0 {
        errors.push("hardware.probe_attempts", "must be at least 1");
    }
    let probe = RetryPolicy::attempts(
        attempts,
        Duration::from_millis(section.probe_delay_ms.unwrap_or(250)),
    );

    let preferred = section.preferred.as_deref().and_then(|name| {
        let variant = DisplayVariant::from_name(name);
        if variant.is_none() {
            errors.push(
                "hardware.preferred",
                format!("unknown display '{name}' (expected lcd, oled, or console)"),
            );
        }
        variant
    });

    HardwareConfig {
        lcd_i2c_address,
        i2c_bus: section.i2c_bus.unwrap_or(1),
        lcd_cols,
        lcd_rows,
        lcd_driver: non_blank(section.lcd_driver.as_deref()),
        oled_driver: non_blank(section.oled_driver.as_deref()),
        oled_width,
        oled_height,
        glyph_width,
        line_height,
        display_service,
        probe,
        preferred,
    }
}

fn resolve_display(section: &file::DisplaySection, errors: &mut ValidationErrors) -> DisplayConfig {
    let overflow = match section.overflow.as_deref() {
        None => Overflow::Scroll,
        Some(name) => Overflow::from_name(name).unwrap_or_else(|| {
            errors.push("display.overflow", format!("expected scroll or truncate, got '{name}'"));
            Overflow::Scroll
        }),
    };

    let startup_message = section
        .startup_message
        .clone()
        .unwrap_or_else(|| vec!["Voice Ready".to_string(), "Say 'pi ...'".to_string()]);

    let max_output_chars = section.max_output_chars.unwrap_or(50);
    if max_output_chars == 0 {
        errors.push("display.max_output_chars", "must be at least 1");
    }

    DisplayConfig {
        scroll_step: seconds("display.scroll_speed", section.scroll_speed, 0.15, errors),
        overflow,
        command_result_time: seconds(
            "display.command_result_time",
            section.command_result_time,
            3.0,
            errors,
        ),
        short_text_display_time: seconds(
            "display.short_text_display_time",
            section.short_text_display_time,
            3.0,
            errors,
        ),
        line_dwell: seconds("display.line_dwell", section.line_dwell, 1.5, errors),
        startup_message,
        max_output_chars,
    }
}

fn resolve_voice(section: &file::VoiceSection, errors: &mut ValidationErrors) -> VoiceConfig {
    let wake_words = section.wake_words.clone().map_or_else(
        || DEFAULT_WAKE_WORDS.iter().map(ToString::to_string).collect(),
        |words| words.into_iter().filter(|w| !w.trim().is_empty()).collect::<Vec<_>>(),
    );
    if wake_words.is_empty() {
        errors.push("voice.wake_words", "at least one wake word is required");
    }

    VoiceConfig {
        wake_words,
        model_path: non_blank(section.model_path.as_deref()),
        transcriber: non_blank(section.transcriber.as_deref()),
        show_all_transcriptions: section.show_all_transcriptions.unwrap_or(false),
        debug_transcripts: section.debug_transcripts.unwrap_or(false),
        audio_sample_rate: section.audio_sample_rate.unwrap_or(16_000),
        audio_chunk_size: section.audio_chunk_size.unwrap_or(4_000),
    }
}

fn resolve_messages(section: &file::MessagesSection) -> MessagesConfig {
    MessagesConfig {
        jokes: section
            .jokes
            .clone()
            .unwrap_or_else(|| vec![DEFAULT_JOKE.to_string()]),
        unknown_command: non_blank(section.unknown_command.as_deref())
            .unwrap_or_else(|| DEFAULT_UNKNOWN_COMMAND.to_string()),
        error_responses: section
            .error_responses
            .iter()
            .flatten()
            .filter_map(|reply| non_blank(Some(reply.as_str())))
            .collect(),
    }
}

fn resolve_advanced(
    section: &file::AdvancedSection,
    errors: &mut ValidationErrors,
) -> AdvancedConfig {
    let busy_policy = match section.busy_policy.as_deref() {
        None => BusyPolicy::Queue,
        Some(name) => BusyPolicy::from_name(name).unwrap_or_else(|| {
            errors.push("advanced.busy_policy", format!("expected queue or drop, got '{name}'"));
            BusyPolicy::Queue
        }),
    };

    AdvancedConfig {
        enable_logging: section.enable_logging.unwrap_or(false),
        log_file: PathBuf::from(section.log_file.as_deref().unwrap_or("voxpanel.log")),
        enable_command_history: section.enable_command_history.unwrap_or(false),
        max_command_history: section.max_command_history.unwrap_or(50),
        busy_policy,
        reload_on_sighup: section.reload_on_sighup.unwrap_or(true),
        default_timeout: seconds("advanced.default_timeout", section.default_timeout, 10.0, errors),
        reconnect_attempts: section.reconnect_attempts.unwrap_or(5),
    }
}

fn parse_i2c_address(text: &str) -> Option<u16> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u16::from_str_radix(digits, 16).ok()
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(json: &str) -> ConfigDocument {
        parse_document(json, DocumentFormat::Json).unwrap()
    }

    #[test]
    fn empty_document_uses_original_defaults() {
        let config = Config::default();

        assert_eq!(config.voice.wake_words, vec!["pi", "pie"]);
        assert_eq!(config.hardware.lcd_i2c_address, 0x3f);
        assert_eq!(config.hardware.lcd_cols, 16);
        assert_eq!(config.hardware.lcd_rows, 2);
        assert_eq!(config.display.scroll_step, Duration::from_millis(150));
        assert_eq!(config.display.max_output_chars, 50);
        assert_eq!(config.messages.jokes, vec![DEFAULT_JOKE]);
        assert_eq!(config.messages.unknown_command, "Unknown command");
        assert!(config.messages.error_responses.is_empty());
        assert_eq!(config.advanced.busy_policy, BusyPolicy::Queue);
        assert_eq!(config.advanced.default_timeout, Duration::from_secs(10));
        assert!(config.commands.is_empty());
    }

    #[test]
    fn error_responses_drop_blank_entries() {
        let config = Config::from_document(&doc(
            r#"{"messages": {"error_responses": ["Say again?", "  ", "Pardon?"]}}"#,
        ))
        .unwrap();
        assert_eq!(config.messages.error_responses, vec!["Say again?", "Pardon?"]);
    }

    #[test]
    fn default_timeout_flows_into_commands() {
        let config = Config::from_document(&doc(
            r#"{
                "advanced": {"default_timeout": 2},
                "commands": {"uptime": {"action": "run_command", "command": "uptime"}}
            }"#,
        ))
        .unwrap();

        let uptime = config.commands.get("uptime").unwrap();
        let crate::commands::Action::RunCommand(spec) = &uptime.action else {
            panic!("expected run_command");
        };
        assert_eq!(spec.timeout, Duration::from_secs(2));
    }

    #[test]
    fn collects_every_problem() {
        let errors = Config::from_document(&doc(
            r#"{
                "hardware": {"lcd_i2c_address": "zz", "preferred": "hologram"},
                "display": {"overflow": "wrap"},
                "voice": {"wake_words": ["  "]},
                "advanced": {"busy_policy": "stack"},
                "commands": {
                    "a": {"action": "show_ip", "aliases": ["go"]},
                    "b": {"action": "show_time", "aliases": ["go"]},
                    "c": {"action": "dance"}
                }
            }"#,
        ))
        .unwrap_err();

        for field in [
            "hardware.lcd_i2c_address",
            "hardware.preferred",
            "display.overflow",
            "voice.wake_words",
            "advanced.busy_policy",
            "commands.b.aliases",
            "commands.c.action",
        ] {
            assert!(errors.contains_field(field), "missing {field} in {errors}");
        }
    }

    #[test]
    fn parses_i2c_addresses() {
        assert_eq!(parse_i2c_address("0x27"), Some(0x27));
        assert_eq!(parse_i2c_address("3F"), Some(0x3f));
        assert_eq!(parse_i2c_address("0xg1"), None);
    }

    #[test]
    fn display_service_and_preferred() {
        let config = Config::from_document(&doc(
            r#"{"hardware": {
                "display_service": {"name": "oled-status", "user": true},
                "preferred": "console",
                "probe_attempts": 5
            }}"#,
        ))
        .unwrap();

        let unit = config.hardware.display_service.unwrap();
        assert_eq!(unit.name, "oled-status");
        assert!(unit.user);
        assert_eq!(config.hardware.preferred, Some(DisplayVariant::Console));
        assert_eq!(config.hardware.probe.total_attempts(), 5);
    }

    #[test]
    fn load_reads_toml_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice.toml");
        std::fs::write(
            &path,
            "[voice]\nwake_words = [\"computer\"]\n\n\
             [commands.clear]\naction = \"clear_display\"\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.voice.wake_words, vec!["computer"]);
        assert_eq!(config.commands.len(), 1);
        assert_eq!(config.source.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn load_or_default_tolerates_missing_file() {
        let config = Config::load_or_default(Path::new("/no/such/voice_config.json")).unwrap();
        assert!(config.source.is_none());
    }

    #[test]
    fn load_reports_validation_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice_config.json");
        let json = r#"{"commands": {"x": {"action": "show_ip", "timeout": 3}}}"#;
        std::fs::write(&path, json).unwrap();

        let err = Config::load(&path).unwrap_err();
        let Error::Validation(errors) = err else {
            panic!("expected validation error, got {err}");
        };
        assert!(errors.contains_field("commands.x.timeout"));
    }
}
