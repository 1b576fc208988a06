//! The replicated command log.
//!
//! Indices are 1-based: index 0 is the empty prefix that every log shares,
//! with term 0. That makes `prev_log_index = 0` a match on any replica.

use crate::command::LogEntry;

/// Result of merging a leader's entries into the local log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Entries written to the log (not counting ones already present).
    pub appended: usize,
    /// Conflicting entries removed before appending.
    pub truncated: usize,
    /// Index of the last entry covered by the merge.
    pub last_new_index: u64,
}

/// Ordered sequence of term-tagged commands.
///
/// Owned by exactly one [`crate::node::ConsensusNode`] and only mutated
/// under its lock.
#[derive(Debug, Clone, Default)]
pub struct ReplicatedLog {
    entries: Vec<LogEntry>,
}

impl ReplicatedLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_index(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn last_term(&self) -> u64 {
        self.entries.last().map_or(0, |entry| entry.term)
    }

    /// Returns the entry stored at `index`, if any.
    pub fn entry(&self, index: u64) -> Option<&LogEntry> {
        let position = usize::try_from(index).ok()?.checked_sub(1)?;
        self.entries.get(position)
    }

    /// Term of the entry at `index`; `Some(0)` for the empty prefix.
    pub fn term_at(&self, index: u64) -> Option<u64> {
        if index == 0 {
            return Some(0);
        }
        self.entry(index).map(|entry| entry.term)
    }

    /// Entries from `index` (inclusive) to the end of the log.
    pub fn entries_from(&self, index: u64) -> &[LogEntry] {
        let start = usize::try_from(index.max(1) - 1).unwrap_or(usize::MAX);
        self.entries.get(start..).unwrap_or(&[])
    }

    /// Appends an entry proposed locally and returns its index.
    pub fn append(&mut self, entry: LogEntry) -> u64 {
        self.entries.push(entry);
        self.last_index()
    }

    /// Whether this log holds an entry at `prev_index` with `prev_term`.
    pub fn matches(&self, prev_index: u64, prev_term: u64) -> bool {
        self.term_at(prev_index) == Some(prev_term)
    }

    /// Merges `entries`, which a leader placed directly after `prev_index`.
    ///
    /// Entries already present with the same term are left alone, so a
    /// replayed request is a no-op. The first entry whose term disagrees
    /// truncates the log from that index on. Callers must check
    /// [`ReplicatedLog::matches`] first.
    pub fn merge(&mut self, prev_index: u64, entries: &[LogEntry]) -> MergeOutcome {
        let mut outcome = MergeOutcome {
            last_new_index: prev_index + entries.len() as u64,
            ..MergeOutcome::default()
        };

        for (offset, entry) in entries.iter().enumerate() {
            let index = prev_index + 1 + offset as u64;
            match self.term_at(index) {
                Some(term) if term == entry.term => continue,
                Some(_) => {
                    outcome.truncated += self.truncate_from(index);
                    self.entries.push(entry.clone());
                }
                None => self.entries.push(entry.clone()),
            }
            outcome.appended += 1;
        }

        outcome
    }

    /// Election restriction: a candidate's log must be at least as up to date
    /// as ours, comparing the last term first and the length second.
    pub fn is_up_to_date(&self, last_log_term: u64, last_log_index: u64) -> bool {
        let our_term = self.last_term();
        last_log_term > our_term
            || (last_log_term == our_term && last_log_index >= self.last_index())
    }

    fn truncate_from(&mut self, index: u64) -> usize {
        let keep = usize::try_from(index.saturating_sub(1)).unwrap_or(usize::MAX);
        let removed = self.entries.len().saturating_sub(keep);
        self.entries.truncate(keep);
        removed
    }
}
