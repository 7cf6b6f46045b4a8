//! Console display, always available

use std::io::Write;
use std::time::Instant;

use super::{DispatcherStatus, DisplayFrame, DisplaySink, DisplayVariant};
use crate::Result;

/// Prints frames as `LCD: 'line1' | 'line2'`
pub struct ConsoleSink<W = std::io::Stdout> {
    out: W,
    hold_until: Option<Instant>,
}

impl ConsoleSink {
    /// Console sink on standard output
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    /// Console sink on any writer
    pub const fn new(out: W) -> Self {
        Self {
            out,
            hold_until: None,
        }
    }

    /// The underlying writer
    pub const fn writer(&self) -> &W {
        &self.out
    }
}

/// One-line console rendering of a frame
#[must_use]
pub fn format_frame(frame: &DisplayFrame) -> String {
    if frame.is_blank() {
        return "LCD: (clear)".to_string();
    }
    let lines: Vec<String> = frame.lines.iter().map(|l| format!("'{l}'")).collect();
    format!("LCD: {}", lines.join(" | "))
}

impl<W: Write + Send> DisplaySink for ConsoleSink<W> {
    fn variant(&self) -> DisplayVariant {
        DisplayVariant::Console
    }

    fn set_status(&mut self, status: &DispatcherStatus) -> Result<()> {
        tracing::debug!(%status, "status");
        Ok(())
    }

    fn render(&mut self, frame: DisplayFrame, now: Instant) -> Result<()> {
        self.hold_until = frame.hold.map(|hold| now + hold);
        writeln!(self.out, "{}", format_frame(&frame))?;
        self.out.flush()?;
        Ok(())
    }

    fn tick(&mut self, _now: Instant) -> Result<()> {
        Ok(())
    }

    fn is_holding(&self, now: Instant) -> bool {
        self.hold_until.is_some_and(|until| now < until)
    }

    fn shutdown(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}
