//! Error types for the consensus core, its transport and its configuration.

use thiserror::Error;

/// Errors returned to callers of the client write path.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NodeError {
    /// This node cannot accept writes. `leader` is the address of the leader
    /// it knows about for the current term, if any.
    #[error("not the leader")]
    NotLeader { leader: Option<String> },

    /// The entry was appended but no majority acknowledged it in time. It
    /// may still commit later.
    #[error("entry {index} was not committed before the deadline")]
    CommitTimeout { index: u64 },
}

/// Failures talking to a peer. The consensus core treats all of these as a
/// denied vote or a missing acknowledgement.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("peer {peer} answered with status {status}")]
    Status { peer: String, status: u16 },

    #[error("peer {peer} is unreachable")]
    Unreachable { peer: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("node id must be positive")]
    InvalidId,

    #[error("node address must not be empty")]
    EmptyAddress,

    #[error("election timeout range {min_ms}ms..{max_ms}ms is empty")]
    ElectionTimeoutRange { min_ms: u128, max_ms: u128 },

    #[error("heartbeat interval must be shorter than the minimum election timeout")]
    HeartbeatInterval,
}
