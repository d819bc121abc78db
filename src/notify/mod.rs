use crate::shared::logging::SessionLog;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Success,
    Error,
    Info,
}

impl NotificationLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Info => "info",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    pub details: Option<String>,
}

/// User-visible toast sink. Calls are fire-and-forget.
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NotificationLevel, message: &str, details: Option<&str>);

    fn success(&self, message: &str, details: Option<&str>) {
        self.notify(NotificationLevel::Success, message, details);
    }

    fn error(&self, message: &str, details: Option<&str>) {
        self.notify(NotificationLevel::Error, message, details);
    }

    fn info(&self, message: &str, details: Option<&str>) {
        self.notify(NotificationLevel::Info, message, details);
    }
}

/// Prints notifications to stderr and mirrors them into the session log.
#[derive(Debug, Clone, Default)]
pub struct ConsoleNotifier {
    log: SessionLog,
}

impl ConsoleNotifier {
    pub fn new(log: SessionLog) -> Self {
        Self { log }
    }
}

impl Notifier for ConsoleNotifier {
    fn notify(&self, level: NotificationLevel, message: &str, details: Option<&str>) {
        match details {
            Some(details) => eprintln!("[{}] {message}: {details}", level.as_str()),
            None => eprintln!("[{}] {message}", level.as_str()),
        }
        self.log.info(&format!("notify.{}", level.as_str()), message);
    }
}

/// Keeps every notification in memory; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    entries: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Notification> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, level: NotificationLevel) -> usize {
        self.entries()
            .iter()
            .filter(|entry| entry.level == level)
            .count()
    }

    pub fn last(&self) -> Option<Notification> {
        self.entries().pop()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, level: NotificationLevel, message: &str, details: Option<&str>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(Notification {
                level,
                message: message.to_string(),
                details: details.map(str::to_string),
            });
        }
    }
}
