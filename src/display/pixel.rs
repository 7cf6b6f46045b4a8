//! Pixel display (128x32 OLED and similar)
//!
//! The top text line is a persistent status line. Frame text is word-wrapped
//! into the remaining lines; when it does not fit, the content scrolls one
//! line per dwell period and loops until the next frame replaces it.

use std::time::{Duration, Instant};

use super::{DispatcherStatus, DisplayFrame, DisplaySink, DisplayVariant, TextDevice, window};
use crate::Result;
use crate::lifecycle::ServiceLease;

/// Text geometry of a pixel display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelLayout {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Advance of one glyph in pixels
    pub glyph_width: u32,
    /// Height of one text line in pixels
    pub line_height: u32,
}

impl PixelLayout {
    /// Glyphs that fit on one line
    #[must_use]
    pub fn columns(&self) -> usize {
        usize::try_from(self.width / self.glyph_width.max(1)).unwrap_or(1).max(1)
    }

    /// Text lines that fit on the display, status line included
    #[must_use]
    pub fn rows(&self) -> usize {
        usize::try_from(self.height / self.line_height.max(1)).unwrap_or(2).max(2)
    }

    /// Text lines available below the status line
    #[must_use]
    pub fn content_rows(&self) -> usize {
        self.rows() - 1
    }
}

/// Word-wrap `text` to a pixel budget
///
/// Breaks at whitespace; a single word wider than the budget is split by
/// character.
#[must_use]
pub fn wrap_text(text: &str, budget_px: u32, glyph_width: u32) -> Vec<String> {
    let max = usize::try_from(budget_px / glyph_width.max(1)).unwrap_or(1).max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();

        if word_len > max {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = word.chars().collect();
            let mut chunks = chars.chunks(max).peekable();
            while let Some(chunk) = chunks.next() {
                let piece: String = chunk.iter().collect();
                if chunks.peek().is_some() {
                    lines.push(piece);
                } else {
                    current_len = chunk.len();
                    current = piece;
                }
            }
        } else if current.is_empty() {
            current = word.to_string();
            current_len = word_len;
        } else if current_len + 1 + word_len <= max {
            current.push(' ');
            current.push_str(word);
            current_len += 1 + word_len;
        } else {
            lines.push(std::mem::replace(&mut current, word.to_string()));
            current_len = word_len;
        }
    }

    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// Pixel-display sink with status line and vertical auto-scroll
pub struct PixelSink {
    device: Box<dyn TextDevice>,
    layout: PixelLayout,
    line_dwell: Duration,
    status: String,
    content: Vec<String>,
    started: Instant,
    hold_until: Option<Instant>,
    shown: Vec<String>,
    lease: Option<ServiceLease>,
}

impl PixelSink {
    /// Wrap a device with the given geometry
    pub fn new(device: Box<dyn TextDevice>, layout: PixelLayout, line_dwell: Duration) -> Self {
        Self {
            device,
            layout,
            line_dwell: line_dwell.max(Duration::from_millis(1)),
            status: DispatcherStatus::Ready.to_string(),
            content: Vec::new(),
            started: Instant::now(),
            hold_until: None,
            shown: Vec::new(),
            lease: None,
        }
    }

    /// Hold `lease` until shutdown
    #[must_use]
    pub fn with_lease(mut self, lease: Option<ServiceLease>) -> Self {
        self.lease = lease;
        self
    }

    /// First content line shown at `now`
    fn offset(&self, now: Instant) -> usize {
        let rows = self.layout.content_rows();
        if self.content.len() <= rows {
            return 0;
        }
        let positions = self.content.len() - rows + 1;
        let elapsed = now.saturating_duration_since(self.started);
        let steps = elapsed.as_nanos() / self.line_dwell.as_nanos();
        usize::try_from(steps % positions as u128).unwrap_or(0)
    }

    fn view(&self, now: Instant) -> Vec<String> {
        let cols = self.layout.columns();
        let offset = self.offset(now);

        std::iter::once(window(&self.status, 0, cols))
            .chain((0..self.layout.content_rows()).map(|i| {
                let line = self.content.get(offset + i).map_or("", String::as_str);
                window(line, 0, cols)
            }))
            .collect()
    }

    fn refresh(&mut self, now: Instant) -> Result<()> {
        let view = self.view(now);
        if view != self.shown {
            self.device.show(&view)?;
            self.shown = view;
        }
        Ok(())
    }
}

impl DisplaySink for PixelSink {
    fn variant(&self) -> DisplayVariant {
        DisplayVariant::Pixel
    }

    fn set_status(&mut self, status: &DispatcherStatus) -> Result<()> {
        self.status = status.to_string();
        self.refresh(Instant::now().max(self.started))
    }

    fn render(&mut self, frame: DisplayFrame, now: Instant) -> Result<()> {
        self.started = now;
        self.hold_until = frame.hold.map(|hold| now + hold);
        self.content = if frame.is_blank() {
            Vec::new()
        } else {
            frame
                .lines
                .iter()
                .flat_map(|line| wrap_text(line, self.layout.width, self.layout.glyph_width))
                .collect()
        };
        self.refresh(now)
    }

    fn tick(&mut self, now: Instant) -> Result<()> {
        self.refresh(now)
    }

    fn is_holding(&self, now: Instant) -> bool {
        self.hold_until.is_some_and(|until| now < until)
    }

    fn shutdown(&mut self) -> Result<()> {
        self.content.clear();
        let closed = self.device.close();
        if let Some(lease) = self.lease.take() {
            lease.release()?;
        }
        closed
    }
}
