//! Shared test utilities

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Instant;

use voxpanel::config::{DocumentFormat, parse_document};
use voxpanel::{Config, DispatcherStatus, DisplayFrame, DisplaySink, DisplayVariant, Result};

/// Everything a `RecordingSink` was asked to do
#[derive(Debug, Default)]
pub struct SinkLog {
    pub frames: Vec<DisplayFrame>,
    pub statuses: Vec<DispatcherStatus>,
    pub shut_down: bool,
}

impl SinkLog {
    /// Rendered frames as plain line vectors
    pub fn lines(&self) -> Vec<Vec<String>> {
        self.frames.iter().map(|f| f.lines.clone()).collect()
    }
}

/// A display sink that records instead of drawing; frames never hold
#[derive(Clone, Default)]
pub struct RecordingSink {
    log: Arc<Mutex<SinkLog>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, SinkLog> {
        self.log.lock().unwrap()
    }
}

impl DisplaySink for RecordingSink {
    fn variant(&self) -> DisplayVariant {
        DisplayVariant::Console
    }

    fn set_status(&mut self, status: &DispatcherStatus) -> Result<()> {
        self.log().statuses.push(status.clone());
        Ok(())
    }

    fn render(&mut self, frame: DisplayFrame, _now: Instant) -> Result<()> {
        self.log().frames.push(frame);
        Ok(())
    }

    fn tick(&mut self, _now: Instant) -> Result<()> {
        Ok(())
    }

    fn is_holding(&self, _now: Instant) -> bool {
        false
    }

    fn shutdown(&mut self) -> Result<()> {
        self.log().shut_down = true;
        Ok(())
    }
}

/// Resolve a JSON configuration document, panicking on any error
pub fn config(json: &str) -> Config {
    let document = parse_document(json, DocumentFormat::Json).expect("valid json");
    Config::from_document(&document).expect("valid config")
}
