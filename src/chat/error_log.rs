//! Caller-owned log of generation failures

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::chat::event::StreamEnd;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Thread-safe, append-only list of diagnostics.
///
/// The chat client never writes here itself; the caller records the
/// [`StreamEnd`] it received.
#[derive(Debug, Default)]
pub struct ErrorLog {
    entries: Mutex<Vec<ErrorEntry>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: impl Into<String>) {
        self.entries.lock().push(ErrorEntry {
            at: Utc::now(),
            message: message.into(),
        });
    }

    /// Record the diagnostic of a stream ending; returns whether one was recorded
    pub fn record(&self, end: &StreamEnd) -> bool {
        match end.diagnostic() {
            Some(diagnostic) => {
                self.push(diagnostic);
                true
            }
            None => false,
        }
    }

    pub fn entries(&self) -> Vec<ErrorEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
