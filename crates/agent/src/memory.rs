//! Dialogue memory
//!
//! A bounded, per-session record of user/assistant turns. The critical
//! section is limited to append-and-evict; readers take a snapshot.

use std::collections::VecDeque;

use parking_lot::Mutex;

use bookwise_core::Message;

/// Memory configuration
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Maximum retained turns; a user/assistant exchange is two turns
    pub capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { capacity: 10 }
    }
}

/// Bounded dialogue memory with oldest-first eviction
pub struct DialogueMemory {
    capacity: usize,
    turns: Mutex<VecDeque<Message>>,
}

impl DialogueMemory {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            capacity: config.capacity,
            turns: Mutex::new(VecDeque::new()),
        }
    }

    /// Record a completed user/assistant exchange, evicting the oldest
    /// turns beyond capacity.
    pub fn record_exchange(&self, user: &str, assistant: &str) {
        let mut turns = self.turns.lock();
        turns.push_back(Message::user(user));
        turns.push_back(Message::assistant(assistant));
        while turns.len() > self.capacity {
            turns.pop_front();
        }
    }

    /// Snapshot of the retained turns, oldest first
    pub fn history(&self) -> Vec<Message> {
        self.turns.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.lock().is_empty()
    }

    /// Forget everything; used when the caller switches conversation mode
    pub fn clear(&self) {
        self.turns.lock().clear();
    }
}

impl Default for DialogueMemory {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}
