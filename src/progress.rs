//! Line-oriented progress reporting back to whoever requested an operation.

use std::sync::{Mutex, PoisonError};

/// Accepts one status line at a time. Implementations must tolerate calls
/// from several threads.
pub trait ProgressSink: Send + Sync {
    fn line(&self, line: &str);
}

/// Forwards lines to the log, tagged with the requester.
#[derive(Debug, Clone)]
pub struct LogSink {
    requested_by: String,
}

impl LogSink {
    pub fn new(requested_by: &str) -> Self {
        Self {
            requested_by: requested_by.to_string(),
        }
    }
}

impl ProgressSink for LogSink {
    fn line(&self, line: &str) {
        tracing::info!(requested_by = %self.requested_by, "{line}");
    }
}

/// Keeps every line in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last(&self) -> Option<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

impl ProgressSink for MemorySink {
    fn line(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
    }
}
