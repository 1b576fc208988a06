use serde::{Deserialize, Serialize};

use crate::store::KvStore;

/// Commands that flow through the replicated log.
///
/// On the wire the variant name travels in the `command` field next to its
/// operands, e.g. `{"command":"SET","key":"x","value":"1"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    Set { key: String, value: String },
    Delete { key: String },
}

impl Command {
    /// Applies the command to the state machine.
    pub fn apply(&self, store: &KvStore) {
        match self {
            Command::Set { key, value } => store.set(key.clone(), value.clone()),
            Command::Delete { key } => {
                store.delete(key);
            }
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Command::Set { key, .. } | Command::Delete { key } => key,
        }
    }
}

/// A command tagged with the term in which the leader accepted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    #[serde(flatten)]
    pub command: Command,
}

impl LogEntry {
    pub fn new(term: u64, command: Command) -> Self {
        Self { term, command }
    }

    pub fn set(term: u64, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(
            term,
            Command::Set {
                key: key.into(),
                value: value.into(),
            },
        )
    }

    pub fn delete(term: u64, key: impl Into<String>) -> Self {
        Self::new(term, Command::Delete { key: key.into() })
    }
}
