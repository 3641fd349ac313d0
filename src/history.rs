//! Chat History
//!
//! Bounded FIFO of recent messages, replayed to newly joined peers. Retention
//! (100) and the welcome replay window (50) are independent knobs.

use std::collections::VecDeque;

use chrono::Utc;

use crate::protocol::{ChatMessage, UserInfo};

/// How many messages the hub retains.
pub const HISTORY_CAPACITY: usize = 100;

/// How many retained messages a `welcome` replays at most.
pub const WELCOME_LIMIT: usize = 50;

/// Ring buffer of recent chat messages.
#[derive(Debug)]
pub struct HistoryBuffer {
    capacity: usize,
    messages: VecDeque<ChatMessage>,
}

impl HistoryBuffer {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            messages: VecDeque::with_capacity(capacity),
        }
    }

    /// Stamp and append a message, evicting the oldest beyond capacity.
    ///
    /// Ids are epoch-millis at record time; they are time-based, not
    /// guaranteed strictly monotonic.
    pub fn record(&mut self, from: UserInfo, content: String) -> ChatMessage {
        let now = Utc::now();
        let message = ChatMessage {
            id: now.timestamp_millis(),
            from,
            content,
            timestamp: now.to_rfc3339(),
        };
        if self.messages.len() >= self.capacity {
            self.messages.pop_front();
        }
        self.messages.push_back(message.clone());
        message
    }

    /// The most recent `limit` messages in chronological order.
    pub fn snapshot(&self, limit: usize) -> Vec<ChatMessage> {
        let skip = self.messages.len().saturating_sub(limit);
        self.messages.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new()
    }
}
