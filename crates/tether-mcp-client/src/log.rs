//! Bounded in-memory log ring surfaced to subscribers for diagnostics.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// The ring never holds more than this many entries.
pub const LOG_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    /// Epoch millis.
    pub timestamp: u64,
}

/// Fixed-capacity log: the 101st write evicts the oldest entry.
#[derive(Debug, Clone, Default)]
pub struct RingLog {
    entries: VecDeque<LogEntry>,
}

impl RingLog {
    pub fn push(&mut self, level: LogLevel, message: impl Into<String>) {
        if self.entries.len() == LOG_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            level,
            message: message.into(),
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        });
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_evicts_oldest_beyond_capacity() {
        let mut log = RingLog::default();
        for i in 0..LOG_CAPACITY + 1 {
            log.push(LogLevel::Info, format!("entry {i}"));
        }
        assert_eq!(log.len(), LOG_CAPACITY);
        let first = log.entries().next().unwrap();
        assert_eq!(first.message, "entry 1");
        let last = log.entries().last().unwrap();
        assert_eq!(last.message, format!("entry {LOG_CAPACITY}"));
    }
}
