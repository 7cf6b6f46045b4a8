//! Configuration document loading
//!
//! The document is JSON (`voice_config.json`) or TOML when the path ends in
//! `.toml`. All fields are optional: the document is a partial overlay on
//! top of defaults, resolved and validated in `config::Config`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Environment variable overriding the config path
pub const CONFIG_ENV: &str = "VOXPANEL_CONFIG";

/// Default config file name
pub const CONFIG_FILE_NAME: &str = "voice_config.json";

/// On-disk syntax of a configuration document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// JSON (default)
    Json,
    /// TOML, selected by a `.toml` extension
    Toml,
}

impl DocumentFormat {
    /// Pick the format from a file extension
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::Toml,
            _ => Self::Json,
        }
    }
}

/// Top-level configuration document schema
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigDocument {
    /// Display hardware
    #[serde(default)]
    pub hardware: HardwareSection,

    /// Display timing and layout
    #[serde(default)]
    pub display: DisplaySection,

    /// Wake words and transcription
    #[serde(default)]
    pub voice: VoiceSection,

    /// Canonical command name → command entry
    #[serde(default)]
    pub commands: BTreeMap<String, CommandEntry>,

    /// Shared message pools
    #[serde(default)]
    pub messages: MessagesSection,

    /// Logging, reload, history, execution defaults
    #[serde(default)]
    pub advanced: AdvancedSection,
}

/// `hardware` section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HardwareSection {
    /// I2C address of the character LCD backpack, as hex (e.g. "0x3f")
    pub lcd_i2c_address: Option<String>,
    /// I2C bus number
    pub i2c_bus: Option<u8>,
    /// Character columns
    pub lcd_cols: Option<usize>,
    /// Character rows
    pub lcd_rows: Option<usize>,
    /// Driver command for the character LCD
    pub lcd_driver: Option<String>,
    /// Driver command for the pixel display
    pub oled_driver: Option<String>,
    /// Pixel display width
    pub oled_width: Option<u32>,
    /// Pixel display height
    pub oled_height: Option<u32>,
    /// Glyph advance in pixels
    pub glyph_width: Option<u32>,
    /// Text line height in pixels
    pub line_height: Option<u32>,
    /// Service that owns the pixel display while voxpanel is not running
    pub display_service: Option<ServiceEntry>,
    /// Probe attempts per display variant
    pub probe_attempts: Option<u32>,
    /// Base delay between probe attempts
    pub probe_delay_ms: Option<u64>,
    /// Force a display variant ("lcd", "oled", "console")
    pub preferred: Option<String>,
}

/// A systemd unit reference
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceEntry {
    /// Unit name (e.g. "oled-status.service")
    pub name: String,
    /// Manage through the user instance (`systemctl --user`)
    #[serde(default)]
    pub user: bool,
}

/// `display` section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DisplaySection {
    /// Seconds per horizontal scroll step
    pub scroll_speed: Option<f64>,
    /// "scroll" or "truncate"
    pub overflow: Option<String>,
    /// Seconds a command result stays up
    pub command_result_time: Option<f64>,
    /// Seconds a short "Heard:" frame stays up
    pub short_text_display_time: Option<f64>,
    /// Seconds per line when the pixel display auto-scrolls
    pub line_dwell: Option<f64>,
    /// Frame shown at startup
    pub startup_message: Option<Vec<String>>,
    /// Cap on captured command output
    pub max_output_chars: Option<usize>,
}

/// `voice` section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VoiceSection {
    /// Wake phrases
    pub wake_words: Option<Vec<String>>,
    /// Speech model directory, handed to the transcriber
    pub model_path: Option<String>,
    /// Command whose stdout is the transcript stream
    pub transcriber: Option<String>,
    /// Render every final transcript as a "Heard:" frame
    pub show_all_transcriptions: Option<bool>,
    /// Show raw transcripts that carry no wake word
    pub debug_transcripts: Option<bool>,
    /// Audio sample rate, handed to the transcriber
    pub audio_sample_rate: Option<u32>,
    /// Audio chunk size, handed to the transcriber
    pub audio_chunk_size: Option<u32>,
}

/// One entry of the `commands` mapping
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandEntry {
    /// Action kind name (e.g. "run_command")
    pub action: Option<String>,
    /// Alternative trigger phrases
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Message template (custom_message)
    pub message: Option<String>,
    /// Shell command (run_command)
    pub command: Option<String>,
    /// Line templates
    pub display_format: Option<Vec<String>>,
    /// Seconds before a run_command process is killed
    pub timeout: Option<f64>,
    /// Show error details for failed commands
    pub show_errors: Option<bool>,
    /// Seconds a scrolling message stays up
    pub scroll_duration: Option<f64>,
    /// Joke pool overriding `messages.jokes`
    pub jokes: Option<Vec<String>>,
    /// strftime pattern for `{time}`
    pub time_format: Option<String>,
    /// strftime pattern for `{date}`
    pub date_format: Option<String>,
}

/// `messages` section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagesSection {
    /// Joke pool for tell_joke
    pub jokes: Option<Vec<String>>,
    /// Replacement for "Unknown command"
    pub unknown_command: Option<String>,
    /// Pool of replies for unmatched utterances, one picked at random
    pub error_responses: Option<Vec<String>>,
}

/// `advanced` section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdvancedSection {
    /// Also log to a file
    pub enable_logging: Option<bool>,
    /// Log file path
    pub log_file: Option<String>,
    /// Keep a history of handled utterances
    pub enable_command_history: Option<bool>,
    /// History capacity
    pub max_command_history: Option<usize>,
    /// "queue" or "drop" for utterances arriving while busy
    pub busy_policy: Option<String>,
    /// Reload the command table on SIGHUP
    pub reload_on_sighup: Option<bool>,
    /// Default run_command timeout in seconds
    pub default_timeout: Option<f64>,
    /// Transcript source reconnect attempts before showing "listening unavailable"
    pub reconnect_attempts: Option<u32>,
}

/// Parse a document from text
///
/// # Errors
///
/// Returns error if the text is not a well-formed document
pub fn parse_document(text: &str, format: DocumentFormat) -> Result<ConfigDocument> {
    match format {
        DocumentFormat::Json => Ok(serde_json::from_str(text)?),
        DocumentFormat::Toml => Ok(toml::from_str(text)?),
    }
}

/// Read and parse a document from disk
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn load_document(path: &Path) -> Result<ConfigDocument> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

    let document = parse_document(&text, DocumentFormat::from_path(path))?;
    tracing::info!(
        path = %path.display(),
        commands = document.commands.len(),
        "loaded config file"
    );
    Ok(document)
}

/// Return the default config path: `$VOXPANEL_CONFIG`, else
/// `~/.config/voxpanel/voice_config.json`
#[must_use]
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(path);
    }

    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(CONFIG_FILE_NAME),
        |d| d.config_dir().join("voxpanel").join(CONFIG_FILE_NAME),
    )
}
