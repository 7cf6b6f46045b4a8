//! Fixed character grid (16x2 LCD and similar)

use std::time::{Duration, Instant};

use super::{
    DispatcherStatus, DisplayFrame, DisplaySink, DisplayVariant, Overflow, TextDevice, window,
};
use crate::Result;

/// Character-grid sink
///
/// Rows wider than the grid are cut or scrolled per `Overflow`. Scrolling
/// slides the text in from the right through a blank-padded window, one
/// column per `scroll_step`, for the frame's hold time (indefinitely if the
/// frame has none), then settles on the cut view.
pub struct CharGridSink {
    device: Box<dyn TextDevice>,
    cols: usize,
    rows: usize,
    overflow: Overflow,
    scroll_step: Duration,
    lines: Vec<String>,
    started: Instant,
    hold_until: Option<Instant>,
    shown: Vec<String>,
}

impl CharGridSink {
    /// Wrap a device of `cols` x `rows` characters
    pub fn new(
        device: Box<dyn TextDevice>,
        cols: usize,
        rows: usize,
        overflow: Overflow,
        scroll_step: Duration,
    ) -> Self {
        Self {
            device,
            cols: cols.max(1),
            rows: rows.max(1),
            overflow,
            scroll_step: scroll_step.max(Duration::from_millis(1)),
            lines: Vec::new(),
            started: Instant::now(),
            hold_until: None,
            shown: Vec::new(),
        }
    }

    fn scrolling(&self, now: Instant) -> bool {
        self.overflow == Overflow::Scroll && self.hold_until.is_none_or(|until| now < until)
    }

    /// The rows as they should look at `now`
    fn view(&self, now: Instant) -> Vec<String> {
        let scrolling = self.scrolling(now);
        let step = usize::try_from(
            now.saturating_duration_since(self.started).as_nanos() / self.scroll_step.as_nanos(),
        )
        .unwrap_or(usize::MAX);

        (0..self.rows)
            .map(|i| {
                let text = self.lines.get(i).map_or("", String::as_str);
                let len = text.chars().count();
                if len <= self.cols || !scrolling {
                    window(text, 0, self.cols)
                } else {
                    let blank = " ".repeat(self.cols);
                    let padded = format!("{blank}{text}{blank}");
                    let positions = len + self.cols + 1;
                    window(&padded, step % positions, self.cols)
                }
            })
            .collect()
    }

    fn refresh(&mut self, now: Instant) -> Result<()> {
        if self.lines.is_empty() {
            return Ok(());
        }
        let view = self.view(now);
        if view != self.shown {
            self.device.show(&view)?;
            self.shown = view;
        }
        Ok(())
    }
}

impl DisplaySink for CharGridSink {
    fn variant(&self) -> DisplayVariant {
        DisplayVariant::CharGrid
    }

    fn set_status(&mut self, status: &DispatcherStatus) -> Result<()> {
        tracing::trace!(%status, "status (no status line on character grid)");
        Ok(())
    }

    fn render(&mut self, frame: DisplayFrame, now: Instant) -> Result<()> {
        self.started = now;
        self.hold_until = frame.hold.map(|hold| now + hold);
        self.shown.clear();

        if frame.is_blank() {
            self.lines.clear();
            return self.device.clear();
        }

        if frame.lines.len() > self.rows {
            tracing::debug!(
                lines = frame.lines.len(),
                rows = self.rows,
                "frame taller than grid, extra lines dropped"
            );
        }
        self.lines = frame.lines.into_iter().take(self.rows).collect();
        self.refresh(now)
    }

    fn tick(&mut self, now: Instant) -> Result<()> {
        self.refresh(now)
    }

    fn is_holding(&self, now: Instant) -> bool {
        self.hold_until.is_some_and(|until| now < until)
    }

    fn shutdown(&mut self) -> Result<()> {
        self.lines.clear();
        self.device.close()
    }
}
