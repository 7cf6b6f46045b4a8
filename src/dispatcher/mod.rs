//! Dispatch loop
//!
//! One task owns the display sink and runs the pipeline:
//! transcript → wake word → command match → action → frame. A listener task
//! owns the transcript source (and its reconnects) and forwards transcripts
//! over a channel, so the loop never blocks on the source while an action
//! is running. At most one action is in flight; `ActionGate` decides what
//! happens to utterances arriving meanwhile.
//!
//! The command table lives in a `watch` channel. Reload validates a whole
//! document and swaps the table in one step; each dispatch cycle takes its
//! own snapshot when it starts.

pub mod gate;
pub mod history;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, OptionFuture};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::actions::{ActionExecutor, ActionOutcome, Execution, ExecutorConfig};
use crate::commands::{CommandTable, MatchOutcome};
use crate::config::{Config, ConfigDocument, load_document};
use crate::display::{DispatcherStatus, DisplayFrame, DisplaySink, shutdown_sink};
use crate::retry::{RetryPolicy, delay_for_attempt};
use crate::voice::{Transcript, TranscriptSource, WakeWordDetector};
use crate::{Error, Result, ValidationErrors};

pub use gate::{ActionGate, Admission, BusyPolicy};
pub use history::{CommandHistory, HistoryEntry};

/// Scroll/hold resolution of the display
const TICK: Duration = Duration::from_millis(50);

/// Transcripts buffered between the listener and the loop
const EVENT_CAPACITY: usize = 16;

/// Base delay of transcript reconnect backoff
const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug)]
enum ListenerEvent {
    Transcript(Transcript),
    Unavailable,
    Recovered,
    Ended,
}

struct InFlight {
    command: Option<String>,
    future: BoxFuture<'static, Execution>,
}

struct Shared {
    table: watch::Sender<Arc<CommandTable>>,
    history: Mutex<CommandHistory>,
    shutdown: watch::Sender<bool>,
    config_path: Option<PathBuf>,
}

/// Control surface of a running dispatcher
#[derive(Clone)]
pub struct DispatcherHandle {
    shared: Arc<Shared>,
}

impl DispatcherHandle {
    /// Validate `document` and swap in its command table
    ///
    /// The whole document must validate; on error the active table is kept.
    ///
    /// # Errors
    ///
    /// Returns every validation problem in the document
    pub fn reload(&self, document: &ConfigDocument) -> std::result::Result<(), ValidationErrors> {
        let config = Config::from_document(document).inspect_err(|errors| {
            tracing::warn!(%errors, "reload rejected, keeping current commands");
        })?;

        let count = config.commands.len();
        self.shared.table.send_replace(config.commands);
        tracing::info!(commands = count, "command table reloaded");
        Ok(())
    }

    /// Re-read the file the configuration came from and reload it
    ///
    /// # Errors
    ///
    /// Returns error if there is no file, or it cannot be read, parsed, or
    /// validated
    pub fn reload_file(&self) -> Result<()> {
        let path = self
            .shared
            .config_path
            .as_ref()
            .ok_or_else(|| Error::Config("configuration was not loaded from a file".to_string()))?;

        let document = load_document(path)?;
        self.reload(&document).map_err(Error::Validation)
    }

    /// The active command table
    #[must_use]
    pub fn commands(&self) -> Arc<CommandTable> {
        Arc::clone(&self.shared.table.borrow())
    }

    /// Recorded history, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.shared
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Ask the loop to stop; it clears the display on the way out
    pub fn shutdown(&self) {
        self.shared.shutdown.send_replace(true);
    }
}

/// The dispatch loop and everything it owns
pub struct Dispatcher {
    detector: WakeWordDetector,
    executor: ActionExecutor,
    sink: Box<dyn DisplaySink>,
    table: watch::Receiver<Arc<CommandTable>>,
    shutdown: watch::Receiver<bool>,
    shared: Arc<Shared>,
    gate: ActionGate,
    status: DispatcherStatus,
    show_all_transcriptions: bool,
    debug_transcripts: bool,
    heard_hold: Duration,
    startup_message: Vec<String>,
    reconnect: RetryPolicy,
}

impl Dispatcher {
    /// Build a dispatcher over `sink` from a resolved configuration
    ///
    /// # Errors
    ///
    /// Returns error if the wake words are unusable
    pub fn new(config: &Config, sink: Box<dyn DisplaySink>) -> Result<(Self, DispatcherHandle)> {
        let detector = WakeWordDetector::new(config.voice.wake_words.clone())?;

        let (table_tx, table_rx) = watch::channel(Arc::clone(&config.commands));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let capacity = if config.advanced.enable_command_history {
            config.advanced.max_command_history
        } else {
            0
        };

        let shared = Arc::new(Shared {
            table: table_tx,
            history: Mutex::new(CommandHistory::new(capacity)),
            shutdown: shutdown_tx,
            config_path: config.source.clone(),
        });

        let dispatcher = Self {
            detector,
            executor: ActionExecutor::new(ExecutorConfig::from_config(config)),
            sink,
            table: table_rx,
            shutdown: shutdown_rx,
            shared: Arc::clone(&shared),
            gate: ActionGate::new(config.advanced.busy_policy),
            status: DispatcherStatus::Ready,
            show_all_transcriptions: config.voice.show_all_transcriptions,
            debug_transcripts: config.voice.debug_transcripts,
            heard_hold: config.display.short_text_display_time,
            startup_message: config.display.startup_message.clone(),
            reconnect: RetryPolicy::attempts(
                config.advanced.reconnect_attempts,
                RECONNECT_BASE_DELAY,
            ),
        };

        Ok((dispatcher, DispatcherHandle { shared }))
    }

    /// Override the transcript reconnect policy
    #[must_use]
    pub fn with_reconnect_policy(mut self, policy: RetryPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Run until shutdown is requested or the source ends
    ///
    /// When the source ends, the running action and any queued one finish
    /// first, and the last frame is left up for its hold time. The sink is
    /// always shut down before returning.
    pub async fn run(mut self, source: Box<dyn TranscriptSource>) {
        let (events_tx, mut events) = mpsc::channel(EVENT_CAPACITY);
        let listener = tokio::spawn(listen(source, events_tx, self.reconnect.clone()));

        if !self.startup_message.is_empty() {
            self.render(DisplayFrame::new(self.startup_message.clone()));
        }
        self.set_status(DispatcherStatus::Ready);
        tracing::info!(wake_words = ?self.detector.wake_words(), "listening");

        let mut in_flight: Option<InFlight> = None;
        let mut listening = true;
        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if !listening && in_flight.is_none() && !self.sink.is_holding(Instant::now()) {
                tracing::info!("transcript source ended");
                break;
            }

            tokio::select! {
                biased;

                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        tracing::info!("shutdown requested");
                        break;
                    }
                }

                Some(execution) = OptionFuture::from(
                    in_flight.as_mut().map(|f| &mut f.future)
                ), if in_flight.is_some() => {
                    let command = in_flight.take().and_then(|f| f.command);
                    self.finish(command.as_deref(), execution);
                    if let Some(next) = self.gate.complete() {
                        tracing::debug!(utterance = %next, "starting queued utterance");
                        in_flight = Some(self.begin(&next));
                    }
                }

                event = events.recv(), if listening => match event {
                    Some(ListenerEvent::Transcript(transcript)) => {
                        if let Some(started) = self.on_transcript(&transcript) {
                            in_flight = Some(started);
                        }
                    }
                    Some(ListenerEvent::Unavailable) => {
                        self.set_status(DispatcherStatus::ListeningUnavailable);
                        if in_flight.is_none() {
                            self.render(DisplayFrame::new(["Listening", "unavailable"]));
                        }
                    }
                    Some(ListenerEvent::Recovered) => self.set_status(DispatcherStatus::Ready),
                    Some(ListenerEvent::Ended) | None => listening = false,
                },

                _ = ticker.tick() => self.on_tick(in_flight.is_some()),
            }
        }

        listener.abort();
        // Dropping the action future kills any running command
        drop(in_flight);

        if let Err(e) = shutdown_sink(self.sink).await {
            tracing::error!(error = %e, "display shutdown failed");
        }
        tracing::info!("dispatcher stopped");
    }

    fn on_transcript(&mut self, transcript: &Transcript) -> Option<InFlight> {
        if !transcript.is_final {
            tracing::trace!(text = %transcript.text, "partial transcript");
            return None;
        }

        let idle = !self.gate.is_busy();
        let text = transcript.text.trim();
        tracing::debug!(text, "heard");

        if idle {
            self.set_status(DispatcherStatus::Heard);
            if self.show_all_transcriptions {
                self.render(DisplayFrame::new(["Heard:", text]).with_hold(self.heard_hold));
            }
        }

        let Some(wake) = self.detector.detect(text) else {
            if self.debug_transcripts {
                tracing::debug!(text, "no wake word");
                if idle && !self.show_all_transcriptions {
                    self.render(DisplayFrame::new(["Heard:", text]).with_hold(self.heard_hold));
                }
            }
            return None;
        };

        if wake.remainder.is_empty() {
            tracing::debug!(phrase = %wake.phrase, "wake word without a command");
            return None;
        }

        match self.gate.offer(&wake.remainder) {
            Admission::Accepted => Some(self.begin(&wake.remainder)),
            Admission::Queued => {
                tracing::info!(utterance = %wake.remainder, "busy, utterance queued");
                None
            }
            Admission::Dropped => {
                tracing::warn!(utterance = %wake.remainder, "busy, utterance dropped");
                None
            }
        }
    }

    /// Match against the current table snapshot and start the action
    fn begin(&mut self, utterance: &str) -> InFlight {
        self.set_status(DispatcherStatus::Processing);
        let table = Arc::clone(&self.table.borrow());

        match table.resolve(utterance) {
            MatchOutcome::Matched(resolved) => {
                let name = resolved.command.name.clone();
                tracing::info!(
                    command = %name,
                    trigger = %resolved.trigger,
                    argument = ?resolved.argument,
                    "executing command"
                );
                self.record(utterance, Some(&name));
                self.set_status(DispatcherStatus::Executing(name.clone()));

                let executor = self.executor.clone();
                InFlight {
                    command: Some(name),
                    future: Box::pin(async move { executor.execute(&resolved).await }),
                }
            }
            MatchOutcome::Unmatched(utterance) => {
                tracing::info!(%utterance, "no command matched");
                self.record(&utterance, None);
                let execution = self.executor.unknown(&utterance);
                InFlight {
                    command: None,
                    future: Box::pin(std::future::ready(execution)),
                }
            }
        }
    }

    fn finish(&mut self, command: Option<&str>, execution: Execution) {
        let status = match &execution.outcome {
            ActionOutcome::Unknown => DispatcherStatus::Unknown,
            ActionOutcome::Failed(reason) => {
                tracing::warn!(command, %reason, "command failed");
                DispatcherStatus::Result
            }
            ActionOutcome::TimedOut => {
                tracing::warn!(command, "command timed out");
                DispatcherStatus::Result
            }
            ActionOutcome::Rendered | ActionOutcome::Cleared => DispatcherStatus::Result,
        };
        self.set_status(status);
        self.render(execution.frame);
    }

    fn on_tick(&mut self, busy: bool) {
        let now = Instant::now();
        if let Err(e) = self.sink.tick(now) {
            tracing::warn!(error = %e, "display tick failed");
        }

        let settled = matches!(
            self.status,
            DispatcherStatus::Heard | DispatcherStatus::Result | DispatcherStatus::Unknown
        );
        if settled && !busy && !self.sink.is_holding(now) {
            self.set_status(DispatcherStatus::Ready);
        }
    }

    fn record(&self, utterance: &str, command: Option<&str>) {
        self.shared
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(HistoryEntry {
                at: chrono::Local::now(),
                utterance: utterance.to_string(),
                command: command.map(ToString::to_string),
            });
    }

    fn set_status(&mut self, status: DispatcherStatus) {
        if let Err(e) = self.sink.set_status(&status) {
            tracing::warn!(error = %e, "status update failed");
        }
        self.status = status;
    }

    fn render(&mut self, frame: DisplayFrame) {
        if let Err(e) = self.sink.render(frame, Instant::now()) {
            tracing::warn!(error = %e, "display write failed");
        }
    }
}

/// Own the source: forward transcripts, reconnect on failure
async fn listen(
    mut source: Box<dyn TranscriptSource>,
    events: mpsc::Sender<ListenerEvent>,
    policy: RetryPolicy,
) {
    loop {
        let event = match source.next_transcript().await {
            Ok(Some(transcript)) => ListenerEvent::Transcript(transcript),
            Ok(None) => {
                let _ = events.send(ListenerEvent::Ended).await;
                return;
            }
            Err(e) => {
                tracing::warn!(source = source.name(), error = %e, "transcript source failed");
                if reconnect(source.as_mut(), &policy).await {
                    continue;
                }

                tracing::error!(source = source.name(), "listening unavailable");
                if events.send(ListenerEvent::Unavailable).await.is_err() {
                    return;
                }
                loop {
                    tokio::time::sleep(policy.max_delay).await;
                    match source.reconnect().await {
                        Ok(()) => break,
                        Err(e) => tracing::debug!(error = %e, "reconnect still failing"),
                    }
                }
                tracing::info!(source = source.name(), "listening again");
                ListenerEvent::Recovered
            }
        };

        if events.send(event).await.is_err() {
            return;
        }
    }
}

async fn reconnect(source: &mut dyn TranscriptSource, policy: &RetryPolicy) -> bool {
    for attempt in 0..policy.total_attempts() {
        tokio::time::sleep(delay_for_attempt(policy, attempt)).await;
        match source.reconnect().await {
            Ok(()) => {
                tracing::info!(source = source.name(), attempt, "transcript source reconnected");
                return true;
            }
            Err(e) => {
                tracing::warn!(source = source.name(), attempt, error = %e, "reconnect failed");
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DocumentFormat, parse_document};

    fn config(json: &str) -> Config {
        Config::from_document(&parse_document(json, DocumentFormat::Json).unwrap()).unwrap()
    }

    fn handle(config: &Config) -> DispatcherHandle {
        let sink = Box::new(crate::display::ConsoleSink::new(Vec::new()));
        Dispatcher::new(config, sink).unwrap().1
    }

    #[test]
    fn reload_swaps_table() {
        let handle = handle(&config(r#"{"commands": {"a": {"action": "clear_display"}}}"#));
        let doc = parse_document(
            r#"{"commands": {"b": {"action": "clear_display"}, "c": {"action": "show_ip"}}}"#,
            DocumentFormat::Json,
        )
        .unwrap();

        handle.reload(&doc).unwrap();
        assert_eq!(handle.commands().len(), 2);
        assert!(handle.commands().get("a").is_none());
    }

    #[test]
    fn rejected_reload_keeps_table() {
        let handle = handle(&config(r#"{"commands": {"a": {"action": "clear_display"}}}"#));
        let before = handle.commands();
        let doc = parse_document(
            r#"{"commands": {
                "b": {"action": "show_ip", "aliases": ["x"]},
                "c": {"action": "show_time", "aliases": ["x"]}
            }}"#,
            DocumentFormat::Json,
        )
        .unwrap();

        let errors = handle.reload(&doc).unwrap_err();
        assert!(errors.contains_field("commands.c.aliases"));
        assert!(Arc::ptr_eq(&before, &handle.commands()));
    }

    #[test]
    fn reload_file_needs_a_source() {
        let handle = handle(&Config::default());
        assert!(matches!(handle.reload_file(), Err(Error::Config(_))));
    }
}
