//! Display sinks
//!
//! The dispatcher hands `DisplayFrame`s to exactly one `DisplaySink`, chosen
//! once at startup by `probe`. Sinks are synchronous and owned by a single
//! task; time-based effects (scrolling, hold expiry) advance on `tick`.

pub mod char_grid;
pub mod console;
pub mod driver;
pub mod pixel;
pub mod probe;

use std::fmt;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use crate::{Error, Result};

pub use char_grid::CharGridSink;
pub use console::ConsoleSink;
pub use driver::DriverDevice;
pub use pixel::PixelSink;
pub use probe::select_sink;

/// One rendered output unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayFrame {
    /// Text lines, top to bottom
    pub lines: Vec<String>,
    /// How long the frame should stay up (and scroll, if too wide)
    pub hold: Option<Duration>,
}

impl DisplayFrame {
    /// A frame with the given lines and no hold hint
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            hold: None,
        }
    }

    /// An empty frame, which clears the display
    #[must_use]
    pub const fn blank() -> Self {
        Self {
            lines: Vec::new(),
            hold: None,
        }
    }

    /// Request a hold/scroll duration
    #[must_use]
    pub const fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = Some(hold);
        self
    }

    /// True if the frame has no visible text
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.lines.iter().all(|l| l.trim().is_empty())
    }
}

/// Dispatcher state shown on displays with a status line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatcherStatus {
    /// Waiting for a wake word
    Ready,
    /// A final transcript arrived
    Heard,
    /// Matching an utterance
    Processing,
    /// Running the named command
    Executing(String),
    /// Showing an action result
    Result,
    /// The utterance matched nothing
    Unknown,
    /// The transcript source is down
    ListeningUnavailable,
}

impl fmt::Display for DispatcherStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "Ready"),
            Self::Heard => write!(f, "Heard"),
            Self::Processing => write!(f, "Processing"),
            Self::Executing(name) => write!(f, "Run: {name}"),
            Self::Result => write!(f, "Result"),
            Self::Unknown => write!(f, "Unknown"),
            Self::ListeningUnavailable => write!(f, "Listening unavailable"),
        }
    }
}

/// Which display implementation is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayVariant {
    /// Fixed character grid (HD44780-style LCD)
    CharGrid,
    /// Pixel buffer with wrapping and a status line (SSD1306-style OLED)
    Pixel,
    /// Text console
    Console,
}

impl DisplayVariant {
    /// Probe order
    pub const PRIORITY: [Self; 3] = [Self::CharGrid, Self::Pixel, Self::Console];

    /// Parse a configured variant name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "lcd" | "char_grid" => Some(Self::CharGrid),
            "oled" | "pixel" => Some(Self::Pixel),
            "console" => Some(Self::Console),
            _ => None,
        }
    }

    /// Short name for logs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CharGrid => "lcd",
            Self::Pixel => "oled",
            Self::Console => "console",
        }
    }
}

impl fmt::Display for DisplayVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Character-grid handling of lines wider than a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overflow {
    /// Scroll horizontally for the frame's hold duration
    Scroll,
    /// Cut at the row width
    Truncate,
}

impl Overflow {
    /// Parse a configured overflow mode
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "scroll" => Some(Self::Scroll),
            "truncate" => Some(Self::Truncate),
            _ => None,
        }
    }
}

/// Raw text output device under a sink
pub trait TextDevice: Send {
    /// Replace the visible content with `lines`
    ///
    /// # Errors
    ///
    /// Returns error if the device rejected the write
    fn show(&mut self, lines: &[String]) -> Result<()>;

    /// Blank the device
    ///
    /// # Errors
    ///
    /// Returns error if the device rejected the write
    fn clear(&mut self) -> Result<()>;

    /// Blank and release the device
    ///
    /// # Errors
    ///
    /// Returns error if the device could not be closed cleanly
    fn close(&mut self) -> Result<()> {
        self.clear()
    }
}

/// Output side of the dispatcher
pub trait DisplaySink: Send {
    /// Which variant this is
    fn variant(&self) -> DisplayVariant;

    /// Update the status line (ignored by sinks without one)
    ///
    /// # Errors
    ///
    /// Returns error if the device write failed
    fn set_status(&mut self, status: &DispatcherStatus) -> Result<()>;

    /// Replace the current frame
    ///
    /// # Errors
    ///
    /// Returns error if the device write failed
    fn render(&mut self, frame: DisplayFrame, now: Instant) -> Result<()>;

    /// Advance scrolling; called periodically by the owner
    ///
    /// # Errors
    ///
    /// Returns error if the device write failed
    fn tick(&mut self, now: Instant) -> Result<()>;

    /// True while the current frame is still within its hold time
    fn is_holding(&self, now: Instant) -> bool;

    /// Clear the display and release any hardware or service held
    ///
    /// # Errors
    ///
    /// Returns error if cleanup failed; cleanup still runs to completion
    fn shutdown(&mut self) -> Result<()>;
}

/// Shut a sink down on the blocking pool
///
/// Driver-backed sinks wait for their process to exit, which must not
/// stall the runtime.
///
/// # Errors
///
/// Returns the sink's shutdown error, or `Display` if the task panicked
pub async fn shutdown_sink(mut sink: Box<dyn DisplaySink>) -> Result<()> {
    tokio::task::spawn_blocking(move || sink.shutdown())
        .await
        .map_err(|e| Error::Display(format!("display shutdown task failed: {e}")))?
}

static HARDWARE_STATE: OnceLock<DisplayVariant> = OnceLock::new();

/// Record the probed display variant for the rest of the process
///
/// Returns false if a variant was already recorded.
pub fn set_hardware_state(variant: DisplayVariant) -> bool {
    HARDWARE_STATE.set(variant).is_ok()
}

/// The display variant selected at startup, if probing has run
#[must_use]
pub fn hardware_state() -> Option<DisplayVariant> {
    HARDWARE_STATE.get().copied()
}

/// Characters of `text` from `start`, `width` long, space-padded
pub(crate) fn window(text: &str, start: usize, width: usize) -> String {
    let mut out: String = text.chars().skip(start).take(width).collect();
    let len = out.chars().count();
    out.extend(std::iter::repeat_n(' ', width.saturating_sub(len)));
    out
}
