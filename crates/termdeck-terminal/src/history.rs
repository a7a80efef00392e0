use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use termdeck_types::DEFAULT_HISTORY_LIMIT;

/// Direction of a history recall
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Towards older entries
    Up,
    /// Towards newer entries and finally the live draft
    Down,
}

/// Per-session command log with a recall cursor.
///
/// The cursor ranges over `[0, len]`; `len` is the live position where the
/// user's unsent draft is shown instead of a history entry.
#[derive(Debug, Clone)]
pub struct HistoryNavigator {
    entries: VecDeque<String>,
    cursor: usize,
    saved_draft: Option<String>,
    limit: usize,
}

impl Default for HistoryNavigator {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl HistoryNavigator {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cursor: 0,
            saved_draft: None,
            limit: limit.max(1),
        }
    }

    /// Seed from previously persisted commands, oldest first
    pub fn with_entries<I: IntoIterator<Item = String>>(limit: usize, entries: I) -> Self {
        let mut history = Self::new(limit);
        for entry in entries {
            history.record(&entry);
        }
        history
    }

    /// Append a command unless it is blank or repeats the previous entry.
    /// Returns whether the command was stored. Always resets the cursor.
    pub fn record(&mut self, command: &str) -> bool {
        let stored = if command.trim().is_empty()
            || self.entries.back().map(|last| last == command).unwrap_or(false)
        {
            false
        } else {
            if self.entries.len() >= self.limit {
                self.entries.pop_front();
            }
            self.entries.push_back(command.to_string());
            true
        };
        self.reset_cursor();
        stored
    }

    /// Move the cursor one step and return the text to place in the input.
    pub fn recall(&mut self, direction: Direction, current_draft: &str) -> String {
        let len = self.entries.len();
        if self.cursor == len && self.saved_draft.is_none() {
            self.saved_draft = Some(current_draft.to_string());
        }

        self.cursor = match direction {
            Direction::Up => self.cursor.saturating_sub(1),
            Direction::Down => (self.cursor + 1).min(len),
        };

        if self.cursor == len {
            self.saved_draft
                .take()
                .unwrap_or_else(|| current_draft.to_string())
        } else {
            self.entries[self.cursor].clone()
        }
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = self.entries.len();
        self.saved_draft = None;
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_live(&self) -> bool {
        self.cursor == self.entries.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = &String> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&str> {
        self.entries.back().map(|s| s.as_str())
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

    fn sample() -> HistoryNavigator {
        let mut history = HistoryNavigator::default();
        for cmd in ["ls", "pwd", "git status"] {
            history.record(cmd);
        }
        history
    }

    #[test]
    fn test_recall_round_trip() {
        let mut history = sample();
        assert_eq!(history.recall(Direction::Up, ""), "git status");
        assert_eq!(history.recall(Direction::Up, "git status"), "pwd");
        assert_eq!(history.recall(Direction::Up, "pwd"), "ls");
        assert_eq!(history.recall(Direction::Up, "ls"), "ls");
        assert_eq!(history.recall(Direction::Down, "ls"), "pwd");
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_down_past_newest_restores_draft() {
        let mut history = sample();
        assert_eq!(history.recall(Direction::Up, "half-typed"), "git status");
        assert_eq!(history.recall(Direction::Down, "git status"), "half-typed");
        assert!(history.is_live());
        // already live: stays live and keeps whatever is in the input
        assert_eq!(history.recall(Direction::Down, "edited"), "edited");
    }

    #[test]
    fn test_empty_history_returns_draft() {
        let mut history = HistoryNavigator::default();
        assert_eq!(history.recall(Direction::Up, "draft"), "draft");
        assert_eq!(history.cursor(), 0);
    }

    #[test]
    fn test_duplicates_and_blanks_skipped() {
        let mut history = HistoryNavigator::default();
        assert!(history.record("make"));
        assert!(!history.record("make"));
        assert!(!history.record("   "));
        assert!(history.record("make test"));
        assert!(history.record("make"));
        assert_eq!(history.entries().cloned().collect::<Vec<_>>(), vec!["make", "make test", "make"]);
    }

    #[test]
    fn test_record_resets_cursor_and_limit_applies() {
        let mut history = HistoryNavigator::with_entries(
            2,
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
        );
        assert_eq!(history.entries().cloned().collect::<Vec<_>>(), vec!["b", "c"]);
        history.recall(Direction::Up, "");
        history.record("d");
        assert!(history.is_live());
        assert_eq!(history.last(), Some("d"));
    }
}
