//! Bounded transcript log for display.
//!
//! Holds the most recent transcript lines echoed back by the service. Purely
//! observational; the capped window keeps memory flat over long sessions.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

/// Who produced a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    /// The user's speech (input transcription).
    User,
    /// The model's speech (output transcription).
    Model,
}

/// A single transcript line.
#[derive(Debug, Clone)]
pub struct TranscriptLine {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Ordered log of recent transcript lines, capped at a fixed window.
#[derive(Debug)]
pub struct TranscriptLog {
    lines: VecDeque<TranscriptLine>,
    capacity: usize,
}

/// Recent-window size: the last 10 lines plus the incoming one.
pub const DEFAULT_CAPACITY: usize = 11;

impl TranscriptLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a line, evicting the oldest once the window is full.
    pub fn push(&mut self, speaker: Speaker, text: impl Into<String>) -> TranscriptLine {
        let line = TranscriptLine {
            speaker,
            text: text.into(),
            timestamp: Utc::now(),
        };
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.clone());
        line
    }

    /// Current lines, oldest first.
    pub fn lines(&self) -> impl Iterator<Item = &TranscriptLine> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl Default for TranscriptLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
