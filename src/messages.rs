//! Human-readable status channel.
//!
//! Components report progress and failures through a [`MessageSink`]. Every
//! message is also written to the `log` facade; forwarding to the channel is
//! best effort and never blocks the reporting component.

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusMessage {
    pub source: &'static str,
    pub severity: Severity,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl std::fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}; {}", self.source, self.severity.as_str(), self.text)
    }
}

/// Cloneable sending side of the status channel.
#[derive(Debug, Clone, Default)]
pub struct MessageSink {
    sender: Option<Sender<StatusMessage>>,
}

impl MessageSink {
    /// Sink that only writes to the log.
    pub fn log_only() -> Self {
        Self { sender: None }
    }

    /// Sink plus receiver; messages beyond `capacity` unread ones are dropped.
    pub fn channel(capacity: usize) -> (Self, Receiver<StatusMessage>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn info(&self, source: &'static str, text: impl Into<String>) {
        self.post(source, Severity::Info, text.into());
    }

    pub fn warn(&self, source: &'static str, text: impl Into<String>) {
        self.post(source, Severity::Warning, text.into());
    }

    pub fn error(&self, source: &'static str, text: impl Into<String>) {
        self.post(source, Severity::Error, text.into());
    }

    fn post(&self, source: &'static str, severity: Severity, text: String) {
        match severity {
            Severity::Info => log::info!("{source}: {text}"),
            Severity::Warning => log::warn!("{source}: {text}"),
            Severity::Error => log::error!("{source}: {text}"),
        }

        let Some(sender) = &self.sender else {
            return;
        };
        let message = StatusMessage {
            source,
            severity,
            text,
            timestamp: Utc::now(),
        };
        match sender.try_send(message) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(dropped)) => {
                log::debug!("status channel full, dropped: {dropped}");
            }
        }
    }
}
