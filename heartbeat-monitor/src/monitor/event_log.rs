//! Append-only log of what the monitor did, per session.

use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEvent {
    pub important: bool,
    pub message: String,
}

impl LogEvent {
    pub fn important(message: impl Into<String>) -> Self {
        Self {
            important: true,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            important: false,
            message: message.into(),
        }
    }
}

/// What a log subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "event", rename_all = "lowercase")]
pub enum LogUpdate {
    /// A new session started; everything received before is stale.
    Cleared,
    Appended(LogEvent),
}

#[derive(Debug, Default)]
pub(crate) struct EventLog {
    entries: Vec<LogEvent>,
    subscribers: Vec<mpsc::UnboundedSender<LogUpdate>>,
}

impl EventLog {
    pub fn push(&mut self, event: LogEvent) {
        self.publish(LogUpdate::Appended(event.clone()));
        self.entries.push(event);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.publish(LogUpdate::Cleared);
    }

    pub fn entries(&self) -> &[LogEvent] {
        &self.entries
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<LogUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    // Subscribers that dropped their receiver are pruned here.
    fn publish(&mut self, update: LogUpdate) {
        self.subscribers.retain(|tx| tx.send(update.clone()).is_ok());
    }
}
