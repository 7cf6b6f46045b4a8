//! Voice input
//!
//! Speech recognition itself is external; this module consumes its
//! transcripts and finds the wake word in them.

pub mod transcript;
pub mod wake_word;

pub use transcript::{
    ChannelSource, LineSource, ProcessSource, Transcript, TranscriberEnv, TranscriptSender,
    TranscriptSource,
};
pub use wake_word::{WakeMatch, WakeWordDetector};
