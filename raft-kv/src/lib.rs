//! Replicated key-value store built on a Raft-style consensus core.
//!
//! Each process runs one node. Nodes elect a leader by majority vote, the
//! leader appends client writes to its log and replicates them with
//! AppendEntries, and every node applies committed entries to its local
//! key-value store.
//!
//! # Modules
//!
//! - [`store`]: thread-safe in-memory key-value map (the state machine)
//! - [`command`]: commands and term-tagged log entries
//! - [`log`]: the replicated log with the consistency check and conflict repair
//! - [`message`]: RPC payloads and the status report
//! - [`node`]: the consensus core (voting, elections, replication, commits)
//! - [`transport`]: outbound RPCs over HTTP, or in-process for tests
//! - [`server`]: axum routes for peers and clients
//! - [`runtime`]: election-timeout and heartbeat driver
//! - [`config`] / [`cli`]: node identity, peers and timing
//! - [`error`]: error types
//!
//! All state lives in memory. A restarted node rejoins as an empty follower.

pub mod cli;
pub mod command;
pub mod config;
pub mod error;
pub mod log;
pub mod message;
pub mod node;
pub mod runtime;
pub mod server;
pub mod store;
pub mod transport;

pub use config::{NodeConfig, Timing};
pub use node::{ConsensusNode, ElectionOutcome, NodeId, ReplicationRound, Role};
