//! Log records queued between producers and a sink's consumer thread

use chrono::Local;
use std::fmt;
use std::thread;

/// `yyyy-MM-dd HH:mm:ss.SSS` in local time
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// One timestamped, thread-tagged message
///
/// Captured on the producer thread, rendered on the consumer thread as
/// `[<timestamp>] [<thread>] <message>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    timestamp: String,
    thread_label: String,
    message: String,
}

impl LogRecord {
    /// Stamp `message` with the current time and the calling thread's label
    pub fn capture(message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            thread_label: current_thread_label(),
            message: message.into(),
        }
    }

    pub fn from_parts(
        timestamp: impl Into<String>,
        thread_label: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: timestamp.into(),
            thread_label: thread_label.into(),
            message: message.into(),
        }
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn thread_label(&self) -> &str {
        &self.thread_label
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] [{}] {}",
            self.timestamp, self.thread_label, self.message
        )
    }
}

/// Thread name, or the `ThreadId` debug form for unnamed threads
pub fn current_thread_label() -> String {
    let current = thread::current();
    match current.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", current.id()),
    }
}
