//! Transcript sources
//!
//! The speech engine is an external collaborator: voxpanel only consumes the
//! strings it produces. Sources here cover a push channel (tests, embedding),
//! a line reader (stdin or any pipe), and a spawned transcriber process.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;

use crate::{Error, Result};

/// Buffered transcripts for the push channel
const CHANNEL_CAPACITY: usize = 32;

/// One transcript string from the speech engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    /// Recognized text
    pub text: String,
    /// False for in-progress hypotheses that may still change
    pub is_final: bool,
}

impl Transcript {
    /// A final transcript
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }

    /// A partial hypothesis
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }
}

/// Producer of transcript strings
#[async_trait]
pub trait TranscriptSource: Send {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Wait for the next transcript
    ///
    /// `Ok(None)` means the stream ended normally.
    ///
    /// # Errors
    ///
    /// Returns error if the source failed; the caller may `reconnect`
    async fn next_transcript(&mut self) -> Result<Option<Transcript>>;

    /// Re-establish the stream after a failure
    ///
    /// # Errors
    ///
    /// Returns error if the source could not be restarted
    async fn reconnect(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sending half of a `ChannelSource`
#[derive(Debug, Clone)]
pub struct TranscriptSender {
    tx: mpsc::Sender<Transcript>,
}

impl TranscriptSender {
    /// Push a final transcript
    ///
    /// # Errors
    ///
    /// Returns error if the receiving source was dropped
    pub async fn send(&self, text: impl Into<String>) -> Result<()> {
        self.push(Transcript::final_text(text)).await
    }

    /// Push any transcript
    ///
    /// # Errors
    ///
    /// Returns error if the receiving source was dropped
    pub async fn push(&self, transcript: Transcript) -> Result<()> {
        self.tx
            .send(transcript)
            .await
            .map_err(|_| Error::Transcript("transcript receiver closed".to_string()))
    }
}

/// Transcripts pushed in from elsewhere in the process
pub struct ChannelSource {
    rx: mpsc::Receiver<Transcript>,
}

impl ChannelSource {
    /// Create a connected sender/source pair
    #[must_use]
    pub fn pair() -> (TranscriptSender, Self) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        (TranscriptSender { tx }, Self { rx })
    }
}

#[async_trait]
impl TranscriptSource for ChannelSource {
    fn name(&self) -> &'static str {
        "channel"
    }

    async fn next_transcript(&mut self) -> Result<Option<Transcript>> {
        Ok(self.rx.recv().await)
    }
}

/// Transcripts read line by line from an async reader
///
/// Lines are plain text, or Vosk-style JSON: `{"text": "..."}` for final
/// results and `{"partial": "..."}` for hypotheses. Blank lines are skipped.
pub struct LineSource<R> {
    lines: LinesStream<R>,
}

impl<R: AsyncBufRead + Unpin + Send> LineSource<R> {
    /// Wrap a buffered reader
    pub fn new(reader: R) -> Self {
        Self {
            lines: LinesStream::new(reader.lines()),
        }
    }
}

impl LineSource<BufReader<tokio::io::Stdin>> {
    /// Read transcripts from standard input
    #[must_use]
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> TranscriptSource for LineSource<R> {
    fn name(&self) -> &'static str {
        "lines"
    }

    async fn next_transcript(&mut self) -> Result<Option<Transcript>> {
        while let Some(line) = self.lines.next().await {
            let line = line.map_err(|e| Error::Transcript(e.to_string()))?;
            if let Some(transcript) = parse_line(&line) {
                return Ok(Some(transcript));
            }
        }
        Ok(None)
    }
}

/// Parse one line of transcriber output
#[must_use]
pub fn parse_line(line: &str) -> Option<Transcript> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if line.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(line) {
            if let Some(text) = value.get("text").and_then(serde_json::Value::as_str) {
                let text = text.trim();
                return (!text.is_empty()).then(|| Transcript::final_text(text));
            }
            if let Some(text) = value.get("partial").and_then(serde_json::Value::as_str) {
                let text = text.trim();
                return (!text.is_empty()).then(|| Transcript::partial(text));
            }
            return None;
        }
    }

    Some(Transcript::final_text(line))
}

/// Options handed to the transcriber process through its environment
#[derive(Debug, Clone, Default)]
pub struct TranscriberEnv {
    /// `VOXPANEL_MODEL_PATH`
    pub model_path: Option<String>,
    /// `VOXPANEL_SAMPLE_RATE`
    pub sample_rate: Option<u32>,
    /// `VOXPANEL_CHUNK_SIZE`
    pub chunk_size: Option<u32>,
}

/// Transcripts from a spawned transcriber process's stdout
pub struct ProcessSource {
    command: String,
    env: TranscriberEnv,
    child: Option<Child>,
    lines: Option<LineSource<BufReader<ChildStdout>>>,
}

impl ProcessSource {
    /// Spawn the transcriber
    ///
    /// # Errors
    ///
    /// Returns error if the process cannot be started
    pub fn spawn(command: impl Into<String>, env: TranscriberEnv) -> Result<Self> {
        let mut source = Self {
            command: command.into(),
            env,
            child: None,
            lines: None,
        };
        source.start()?;
        Ok(source)
    }

    fn start(&mut self) -> Result<()> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(path) = &self.env.model_path {
            cmd.env("VOXPANEL_MODEL_PATH", path);
        }
        if let Some(rate) = self.env.sample_rate {
            cmd.env("VOXPANEL_SAMPLE_RATE", rate.to_string());
        }
        if let Some(chunk) = self.env.chunk_size {
            cmd.env("VOXPANEL_CHUNK_SIZE", chunk.to_string());
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Transcript(format!("failed to spawn transcriber: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transcript("transcriber stdout unavailable".to_string()))?;

        tracing::info!(command = %self.command, pid = ?child.id(), "transcriber started");

        self.lines = Some(LineSource::new(BufReader::new(stdout)));
        self.child = Some(child);
        Ok(())
    }
}

#[async_trait]
impl TranscriptSource for ProcessSource {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn next_transcript(&mut self) -> Result<Option<Transcript>> {
        let Some(lines) = self.lines.as_mut() else {
            return Err(Error::Transcript("transcriber not running".to_string()));
        };

        if let Some(transcript) = lines.next_transcript().await? {
            return Ok(Some(transcript));
        }

        // stdout closed: the transcriber died or exited
        self.lines = None;
        let status = match self.child.as_mut() {
            Some(child) => child.wait().await.map(|s| s.to_string()).unwrap_or_default(),
            None => String::new(),
        };
        self.child = None;
        Err(Error::Transcript(format!("transcriber exited ({status})")))
    }

    async fn reconnect(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
        self.lines = None;
        self.start()
    }
}
