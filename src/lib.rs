//! voxpanel - voice-activated command dispatcher for small displays
//!
//! Listens to transcripts from an external speech engine, waits for a wake
//! word, matches the rest of the utterance against a table of configured
//! commands, runs the matching action, and shows the result on whatever
//! display the host has: a character LCD, a small OLED, or the console.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │        Transcript source (process / stdin)       │
//! └────────────────────────┬─────────────────────────┘
//!                          │
//! ┌────────────────────────▼─────────────────────────┐
//! │                    Dispatcher                    │
//! │  Wake word │ Command table │ Gate │ History      │
//! └────────────────────────┬─────────────────────────┘
//!                          │
//! ┌────────────────────────▼─────────────────────────┐
//! │   Actions: ip, time, jokes, messages, shell      │
//! └────────────────────────┬─────────────────────────┘
//!                          │
//! ┌────────────────────────▼─────────────────────────┐
//! │   Display sink: LCD │ OLED │ console             │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod actions;
pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod display;
pub mod error;
pub mod lifecycle;
pub mod retry;
pub mod signals;
pub mod voice;

pub use actions::{ActionExecutor, ActionOutcome, Execution, ExecutorConfig};
pub use commands::{Action, ActionKind, CommandSpec, CommandTable, MatchOutcome, ResolvedAction};
pub use config::{Config, ConfigDocument};
pub use dispatcher::{BusyPolicy, Dispatcher, DispatcherHandle, HistoryEntry};
pub use display::{DispatcherStatus, DisplayFrame, DisplaySink, DisplayVariant, select_sink};
pub use error::{Error, FieldError, Result, ValidationErrors};
pub use lifecycle::{ServiceLease, ServiceUnit};
pub use retry::RetryPolicy;
pub use signals::{SignalEvent, Signals};
pub use voice::{Transcript, TranscriptSource, WakeWordDetector};
