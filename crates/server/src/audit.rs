//! Bounded per-session command log.

use std::collections::VecDeque;

use chrono::{DateTime, Local};
use nasfan_protocol::LogEntry;

pub const DEFAULT_CAPACITY: usize = 100;

/// One executed remote command. Holds the command line and its output only;
/// credentials never pass through here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAttempt {
    pub timestamp: DateTime<Local>,
    pub command: String,
    pub success: bool,
    pub response: String,
    pub error_message: Option<String>,
}

impl CommandAttempt {
    pub fn succeeded(command: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            command: command.into(),
            success: true,
            response: response.into(),
            error_message: None,
        }
    }

    pub fn failed(
        command: impl Into<String>,
        response: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Local::now(),
            command: command.into(),
            success: false,
            response: response.into(),
            error_message: Some(error.into()),
        }
    }

    pub fn to_log_entry(&self) -> LogEntry {
        LogEntry {
            timestamp: self.timestamp.format("%H:%M:%S").to_string(),
            command: self.command.clone(),
            response: self.response.clone(),
            success: self.success,
            error_message: self.error_message.clone(),
        }
    }
}

/// FIFO ring; the oldest attempt is dropped once `capacity` is reached.
#[derive(Debug, Clone)]
pub struct AuditRing {
    entries: VecDeque<CommandAttempt>,
    capacity: usize,
}

impl AuditRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn append(&mut self, attempt: CommandAttempt) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(attempt);
    }

    /// Oldest first
    pub fn snapshot(&self) -> Vec<CommandAttempt> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for AuditRing {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
