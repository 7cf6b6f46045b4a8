//! Process signals
//!
//! Handlers are registered before the display is probed, so a signal that
//! arrives while a service lease is held unwinds normally instead of taking
//! the default action and leaving the display service stopped.

use tokio::sync::mpsc;

/// A signal voxpanel acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// SIGINT or SIGTERM
    Shutdown,
    /// SIGHUP
    Reload,
}

/// Stream of received signals
pub struct Signals {
    events: mpsc::UnboundedReceiver<SignalEvent>,
}

impl Signals {
    /// Register handlers now and forward signals from a background task
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn install() -> Self {
        let (sender, events) = mpsc::unbounded_channel();
        forward(sender);
        Self { events }
    }

    /// Signals fed from a channel instead of the process
    #[must_use]
    pub const fn from_channel(events: mpsc::UnboundedReceiver<SignalEvent>) -> Self {
        Self { events }
    }

    /// Next signal; pends forever once no more can arrive
    pub async fn recv(&mut self) -> SignalEvent {
        match self.events.recv().await {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }

    /// Wait for a shutdown signal, ignoring reloads
    pub async fn shutdown(&mut self) {
        while self.recv().await != SignalEvent::Shutdown {
            tracing::debug!("SIGHUP ignored, nothing to reload");
        }
    }
}

#[cfg(unix)]
fn forward(sender: mpsc::UnboundedSender<SignalEvent>) {
    use tokio::signal::unix::{SignalKind, signal};

    let handlers = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::hangup()),
    );
    let (Ok(mut interrupt), Ok(mut terminate), Ok(mut hangup)) = handlers else {
        tracing::warn!("signal handlers unavailable, only ctrl-c will stop voxpanel");
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = sender.send(SignalEvent::Shutdown);
            }
        });
        return;
    };

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = interrupt.recv() => SignalEvent::Shutdown,
                _ = terminate.recv() => SignalEvent::Shutdown,
                _ = hangup.recv() => SignalEvent::Reload,
            };
            tracing::debug!(?event, "signal received");
            if sender.send(event).is_err() {
                break;
            }
        }
    });
}

#[cfg(not(unix))]
fn forward(sender: mpsc::UnboundedSender<SignalEvent>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = sender.send(SignalEvent::Shutdown);
        }
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn shutdown_skips_reloads() {
        let (sender, events) = mpsc::unbounded_channel();
        let mut signals = Signals::from_channel(events);

        sender.send(SignalEvent::Reload).unwrap();
        sender.send(SignalEvent::Reload).unwrap();
        sender.send(SignalEvent::Shutdown).unwrap();

        tokio::time::timeout(Duration::from_secs(1), signals.shutdown())
            .await
            .expect("shutdown seen");
    }

    #[tokio::test]
    async fn closed_channel_never_reports_shutdown() {
        let (sender, events) = mpsc::unbounded_channel();
        let mut signals = Signals::from_channel(events);
        drop(sender);

        let waited = tokio::time::timeout(Duration::from_millis(100), signals.shutdown()).await;
        assert!(waited.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hangup_is_delivered_as_reload() {
        use nix::sys::signal::{Signal, raise};

        let mut signals = Signals::install();
        raise(Signal::SIGHUP).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), signals.recv())
            .await
            .expect("signal forwarded");
        assert_eq!(event, SignalEvent::Reload);
    }
}
