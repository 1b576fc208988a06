//! The consensus core of one replica.
//!
//! [`ConsensusNode`] owns the term, role, vote, log and commit bookkeeping
//! behind a single reader/writer lock and exposes the protocol as a small set
//! of transitions:
//!
//! - [`ConsensusNode::request_vote`] and [`ConsensusNode::append_entries`]
//!   handle inbound RPCs.
//! - [`ConsensusNode::start_election`] campaigns for leadership.
//! - [`ConsensusNode::replicate`] runs one leader replication round, which
//!   doubles as a heartbeat.
//! - [`ConsensusNode::set`], [`ConsensusNode::delete`] and
//!   [`ConsensusNode::get`] serve clients.
//!
//! The lock is never held across a network call. Outbound calls fan out
//! concurrently, each bounded by the RPC timeout, and their results are
//! folded back in under the lock as they arrive.
//!
//! Entries are applied to the [`KvStore`] only once committed, in index
//! order. The node lock is always taken before the store lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::command::{Command, LogEntry};
use crate::config::{NodeConfig, Timing};
use crate::error::NodeError;
use crate::log::ReplicatedLog;
use crate::message::{AppendRequest, AppendResponse, NodeStatus, VoteRequest, VoteResponse};
use crate::store::KvStore;
use crate::transport::PeerTransport;

pub type NodeId = u64;

/// A node's position in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Votes needed to win an election, or replicas needed to commit, in a
/// cluster of `cluster_size` voting members.
pub fn quorum(cluster_size: usize) -> usize {
    cluster_size / 2 + 1
}

/// How a call to [`ConsensusNode::start_election`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionOutcome {
    /// Collected a majority and became leader for `term`.
    Won { term: u64 },
    /// Every peer answered or timed out without a majority. Still candidate.
    Lost { term: u64 },
    /// Another leader or candidate moved the node on before the votes came in.
    Superseded { term: u64 },
    /// A peer reported a newer term; the node is now a follower in it.
    SteppedDown { term: u64 },
}

/// How a call to [`ConsensusNode::replicate`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationRound {
    /// The node is not leader; nothing was sent.
    NotLeader,
    /// All peers answered or timed out. `acknowledged` counts successes.
    Completed { acknowledged: usize, commit_index: u64 },
    /// A peer reported a newer term; the node is now a follower in it.
    SteppedDown { term: u64 },
}

/// Leader-side view of one follower's log.
#[derive(Debug, Clone, Copy)]
struct PeerProgress {
    next_index: u64,
    match_index: u64,
}

/// Everything guarded by the node lock.
struct NodeState {
    role: Role,
    current_term: u64,
    voted_for: Option<NodeId>,
    vote_count: usize,
    leader_id: Option<NodeId>,
    leader_address: Option<String>,
    log: ReplicatedLog,
    commit_index: u64,
    last_applied: u64,
    last_contact: Instant,
    progress: HashMap<String, PeerProgress>,
}

impl NodeState {
    fn new() -> Self {
        Self {
            role: Role::Follower,
            current_term: 0,
            voted_for: None,
            vote_count: 0,
            leader_id: None,
            leader_address: None,
            log: ReplicatedLog::new(),
            commit_index: 0,
            last_applied: 0,
            last_contact: Instant::now(),
            progress: HashMap::new(),
        }
    }

    /// Adopts a newer term seen from a peer and falls back to follower.
    ///
    /// A deposed leader restarts its election timer, since `last_contact` is
    /// not refreshed while leading.
    fn adopt_term(&mut self, term: u64) {
        debug_assert!(term > self.current_term);
        if self.role == Role::Leader {
            self.last_contact = Instant::now();
        }
        self.current_term = term;
        self.role = Role::Follower;
        self.voted_for = None;
        self.vote_count = 0;
        self.leader_id = None;
        self.leader_address = None;
        self.progress.clear();
    }

    fn is_leader_in(&self, term: u64) -> bool {
        self.role == Role::Leader && self.current_term == term
    }
}

/// One replica of the replicated key-value store.
pub struct ConsensusNode {
    id: NodeId,
    address: String,
    peers: Vec<String>,
    timing: Timing,
    state: RwLock<NodeState>,
    store: KvStore,
    transport: Arc<dyn PeerTransport>,
}

impl ConsensusNode {
    /// Creates a follower at term 0 with an empty log and store.
    pub fn new(config: NodeConfig, transport: Arc<dyn PeerTransport>) -> Self {
        Self {
            id: config.id,
            address: config.address,
            peers: config.peers,
            timing: config.timing,
            state: RwLock::new(NodeState::new()),
            store: KvStore::new(),
            transport,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// The applied state machine. Reads are local and may be stale.
    pub fn store(&self) -> &KvStore {
        &self.store
    }

    fn quorum(&self) -> usize {
        quorum(self.peers.len() + 1)
    }

    pub async fn role(&self) -> Role {
        self.state.read().await.role
    }

    pub async fn term(&self) -> u64 {
        self.state.read().await.current_term
    }

    /// Time since the last valid leader contact or granted vote.
    pub async fn since_last_contact(&self) -> Duration {
        self.state.read().await.last_contact.elapsed()
    }

    pub async fn status(&self) -> NodeStatus {
        let state = self.state.read().await;
        NodeStatus {
            id: self.id,
            address: self.address.clone(),
            role: state.role,
            term: state.current_term,
            voted_for: state.voted_for,
            log_size: state.log.len(),
            commit_index: state.commit_index,
            last_applied: state.last_applied,
            leader: state.leader_address.clone(),
        }
    }

    /// Copy of the log entries from `index` on. Mostly useful for inspection.
    pub async fn log_entries_from(&self, index: u64) -> Vec<LogEntry> {
        self.state.read().await.log.entries_from(index).to_vec()
    }

    /// Handles an inbound RequestVote.
    ///
    /// Grants at most one candidate per term; asking again for the same
    /// candidate in the same term is granted again.
    pub async fn request_vote(&self, request: &VoteRequest) -> VoteResponse {
        let mut state = self.state.write().await;

        if request.term < state.current_term {
            debug!(
                candidate = request.candidate_id,
                term = request.term,
                current_term = state.current_term,
                "rejecting vote for stale term"
            );
            return VoteResponse {
                term: state.current_term,
                granted: false,
            };
        }

        if request.term > state.current_term {
            if state.role != Role::Follower {
                info!(
                    node = self.id,
                    from = %state.role,
                    term = request.term,
                    "stepping down for newer candidate"
                );
            }
            state.adopt_term(request.term);
        }

        let granted = match state.voted_for {
            Some(voted) if voted != request.candidate_id => false,
            _ => state
                .log
                .is_up_to_date(request.last_log_term, request.last_log_index),
        };

        if granted {
            state.voted_for = Some(request.candidate_id);
            state.last_contact = Instant::now();
        }
        debug!(
            node = self.id,
            candidate = request.candidate_id,
            term = state.current_term,
            granted,
            "answered vote request"
        );

        VoteResponse {
            term: state.current_term,
            granted,
        }
    }

    /// Handles an inbound AppendEntries (a heartbeat when `entries` is empty).
    pub async fn append_entries(&self, request: &AppendRequest) -> AppendResponse {
        let mut state = self.state.write().await;

        if request.term < state.current_term {
            debug!(
                leader = request.leader_id,
                term = request.term,
                current_term = state.current_term,
                "ignoring append from stale leader"
            );
            return AppendResponse {
                term: state.current_term,
                success: false,
                last_log_index: state.log.last_index(),
            };
        }

        if request.term > state.current_term {
            state.adopt_term(request.term);
        }
        if state.role != Role::Follower {
            info!(
                node = self.id,
                from = %state.role,
                leader = request.leader_id,
                term = request.term,
                "stepping down for leader"
            );
            state.role = Role::Follower;
            state.vote_count = 0;
            state.progress.clear();
        }
        state.leader_id = Some(request.leader_id);
        if request.leader_address.is_some() {
            state.leader_address = request.leader_address.clone();
        }
        state.last_contact = Instant::now();

        if !state.log.matches(request.prev_log_index, request.prev_log_term) {
            debug!(
                node = self.id,
                prev_log_index = request.prev_log_index,
                prev_log_term = request.prev_log_term,
                last_log_index = state.log.last_index(),
                "log mismatch, asking leader to back up"
            );
            return AppendResponse {
                term: state.current_term,
                success: false,
                last_log_index: state.log.last_index(),
            };
        }

        let outcome = state.log.merge(request.prev_log_index, &request.entries);
        if outcome.truncated > 0 {
            warn!(
                node = self.id,
                truncated = outcome.truncated,
                "dropped conflicting uncommitted entries"
            );
        }
        if outcome.appended > 0 {
            debug!(node = self.id, appended = outcome.appended, "appended entries");
        }

        let commit_to = request.leader_commit.min(outcome.last_new_index);
        if commit_to > state.commit_index {
            state.commit_index = commit_to;
            self.apply_committed(&mut state);
        }

        AppendResponse {
            term: state.current_term,
            success: true,
            last_log_index: state.log.last_index(),
        }
    }

    /// Campaigns for leadership in a fresh term.
    ///
    /// Votes are requested from every peer in parallel; each call is bounded
    /// by the RPC timeout and a missing answer counts as a denial. Collection
    /// stops as soon as a majority is reached. Outstanding calls are dropped.
    pub async fn start_election(&self) -> ElectionOutcome {
        let request = {
            let mut state = self.state.write().await;
            state.current_term += 1;
            state.role = Role::Candidate;
            state.voted_for = Some(self.id);
            state.vote_count = 1;
            state.leader_id = None;
            state.leader_address = None;
            state.progress.clear();
            state.last_contact = Instant::now();

            info!(node = self.id, term = state.current_term, "starting election");

            if state.vote_count >= self.quorum() {
                self.become_leader(&mut state);
                return ElectionOutcome::Won {
                    term: state.current_term,
                };
            }

            VoteRequest {
                term: state.current_term,
                candidate_id: self.id,
                last_log_index: state.log.last_index(),
                last_log_term: state.log.last_term(),
            }
        };
        let term = request.term;
        let majority = self.quorum();

        let mut ballots: FuturesUnordered<_> = self
            .peers
            .iter()
            .map(|peer| self.ask_for_vote(peer, &request))
            .collect();

        while let Some(response) = ballots.next().await {
            let Some(response) = response else {
                continue;
            };

            let mut state = self.state.write().await;
            if response.term > state.current_term {
                info!(
                    node = self.id,
                    term = response.term,
                    "peer has newer term, abandoning election"
                );
                state.adopt_term(response.term);
                return ElectionOutcome::SteppedDown {
                    term: response.term,
                };
            }
            if !response.granted {
                continue;
            }
            if state.role != Role::Candidate || state.current_term != term {
                return ElectionOutcome::Superseded { term };
            }

            state.vote_count += 1;
            if state.vote_count >= majority {
                self.become_leader(&mut state);
                return ElectionOutcome::Won { term };
            }
        }

        let state = self.state.read().await;
        if state.role == Role::Candidate && state.current_term == term {
            info!(
                node = self.id,
                term,
                votes = state.vote_count,
                needed = majority,
                "election lost"
            );
            ElectionOutcome::Lost { term }
        } else {
            ElectionOutcome::Superseded { term }
        }
    }

    async fn ask_for_vote(&self, peer: &str, request: &VoteRequest) -> Option<VoteResponse> {
        match time::timeout(
            self.timing.rpc_timeout,
            self.transport.request_vote(peer, request),
        )
        .await
        {
            Ok(Ok(response)) => Some(response),
            Ok(Err(err)) => {
                debug!(peer, error = %err, "vote request failed");
                None
            }
            Err(_) => {
                debug!(peer, "vote request timed out");
                None
            }
        }
    }

    fn become_leader(&self, state: &mut NodeState) {
        state.role = Role::Leader;
        state.leader_id = Some(self.id);
        state.leader_address = Some(self.address.clone());
        let next_index = state.log.last_index() + 1;
        state.progress = self
            .peers
            .iter()
            .map(|peer| {
                (
                    peer.clone(),
                    PeerProgress {
                        next_index,
                        match_index: 0,
                    },
                )
            })
            .collect();
        info!(
            node = self.id,
            term = state.current_term,
            votes = state.vote_count,
            "became leader"
        );
    }

    /// Sends every follower the entries it is missing, or an empty heartbeat.
    ///
    /// Successful acknowledgements advance the commit index as soon as a
    /// majority holds an entry from the current term. Rejections walk the
    /// follower's `next_index` back so the next round retries earlier.
    pub async fn replicate(&self) -> ReplicationRound {
        let (term, batches) = {
            let state = self.state.read().await;
            if state.role != Role::Leader {
                return ReplicationRound::NotLeader;
            }
            let batches: Vec<(String, AppendRequest)> = self
                .peers
                .iter()
                .filter_map(|peer| {
                    let progress = state.progress.get(peer)?;
                    Some((peer.clone(), self.append_request_for(&state, progress)))
                })
                .collect();
            (state.current_term, batches)
        };

        let mut acks: FuturesUnordered<_> = batches
            .into_iter()
            .map(|(peer, request)| async move {
                let response = self.send_append(&peer, &request).await;
                (peer, request, response)
            })
            .collect();

        let mut acknowledged = 0;
        while let Some((peer, request, response)) = acks.next().await {
            let Some(response) = response else {
                continue;
            };

            let mut state = self.state.write().await;
            if response.term > state.current_term {
                info!(
                    node = self.id,
                    peer = %peer,
                    term = response.term,
                    "follower has newer term, stepping down"
                );
                state.adopt_term(response.term);
                return ReplicationRound::SteppedDown {
                    term: response.term,
                };
            }
            if !state.is_leader_in(term) {
                return ReplicationRound::NotLeader;
            }
            let Some(progress) = state.progress.get_mut(&peer) else {
                continue;
            };

            if response.success {
                progress.match_index = progress.match_index.max(request.last_index());
                progress.next_index = progress.match_index + 1;
                acknowledged += 1;
                self.advance_commit_index(&mut state);
            } else {
                progress.next_index = request
                    .prev_log_index
                    .min(response.last_log_index + 1)
                    .max(1);
                debug!(
                    node = self.id,
                    peer = %peer,
                    next_index = progress.next_index,
                    "follower rejected append, backing up"
                );
            }
        }

        let mut state = self.state.write().await;
        if !state.is_leader_in(term) {
            return ReplicationRound::NotLeader;
        }
        // A cluster without peers commits on the leader's copy alone.
        self.advance_commit_index(&mut state);
        ReplicationRound::Completed {
            acknowledged,
            commit_index: state.commit_index,
        }
    }

    fn append_request_for(&self, state: &NodeState, progress: &PeerProgress) -> AppendRequest {
        let prev_log_index = progress.next_index.saturating_sub(1);
        AppendRequest {
            term: state.current_term,
            leader_id: self.id,
            leader_address: Some(self.address.clone()),
            prev_log_index,
            prev_log_term: state.log.term_at(prev_log_index).unwrap_or(0),
            entries: state.log.entries_from(progress.next_index).to_vec(),
            leader_commit: state.commit_index,
        }
    }

    async fn send_append(&self, peer: &str, request: &AppendRequest) -> Option<AppendResponse> {
        match time::timeout(
            self.timing.rpc_timeout,
            self.transport.append_entries(peer, request),
        )
        .await
        {
            Ok(Ok(response)) => Some(response),
            Ok(Err(err)) => {
                debug!(peer, error = %err, "append request failed");
                None
            }
            Err(_) => {
                debug!(peer, "append request timed out");
                None
            }
        }
    }

    /// Commits the highest current-term index stored on a majority.
    ///
    /// Entries from earlier terms are never counted directly; they commit
    /// along with the first current-term entry that follows them.
    fn advance_commit_index(&self, state: &mut NodeState) {
        let quorum = self.quorum();
        let mut index = state.log.last_index();
        while index > state.commit_index {
            if state.log.term_at(index) == Some(state.current_term) {
                let replicas = 1 + state
                    .progress
                    .values()
                    .filter(|progress| progress.match_index >= index)
                    .count();
                if replicas >= quorum {
                    debug!(node = self.id, index, replicas, "commit index advanced");
                    state.commit_index = index;
                    self.apply_committed(state);
                    return;
                }
            } else {
                break;
            }
            index -= 1;
        }
    }

    fn apply_committed(&self, state: &mut NodeState) {
        while state.last_applied < state.commit_index {
            let index = state.last_applied + 1;
            let Some(entry) = state.log.entry(index) else {
                warn!(node = self.id, index, "committed index missing from log");
                return;
            };
            entry.command.apply(&self.store);
            debug!(
                node = self.id,
                index,
                term = entry.term,
                key = entry.command.key(),
                "applied entry"
            );
            state.last_applied = index;
        }
    }

    /// Replicates `SET key value` through the log.
    ///
    /// Returns the entry's index once a majority stored it and it was applied
    /// locally. Keys do not need to exist beforehand.
    pub async fn set(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<u64, NodeError> {
        self.propose(Command::Set {
            key: key.into(),
            value: value.into(),
        })
        .await
    }

    /// Replicates `DELETE key` through the log.
    pub async fn delete(&self, key: impl Into<String>) -> Result<u64, NodeError> {
        self.propose(Command::Delete { key: key.into() }).await
    }

    /// Local read; no quorum is consulted, so followers may lag.
    pub fn get(&self, key: &str) -> Option<String> {
        self.store.get(key)
    }

    async fn propose(&self, command: Command) -> Result<u64, NodeError> {
        let (term, index) = {
            let mut state = self.state.write().await;
            if state.role != Role::Leader {
                return Err(NodeError::NotLeader {
                    leader: state.leader_address.clone(),
                });
            }
            let term = state.current_term;
            let index = state.log.append(LogEntry::new(term, command));
            debug!(node = self.id, term, index, "appended client command");
            (term, index)
        };

        let deadline = Instant::now() + self.timing.commit_timeout;
        loop {
            self.replicate().await;
            {
                let state = self.state.read().await;
                if state.current_term != term || state.log.term_at(index) != Some(term) {
                    return Err(NodeError::NotLeader {
                        leader: state.leader_address.clone(),
                    });
                }
                if state.commit_index >= index {
                    return Ok(index);
                }
                if state.role != Role::Leader {
                    return Err(NodeError::NotLeader {
                        leader: state.leader_address.clone(),
                    });
                }
            }
            if Instant::now() >= deadline {
                warn!(node = self.id, index, "write not committed before deadline");
                return Err(NodeError::CommitTimeout { index });
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            time::sleep(self.timing.heartbeat_interval.min(remaining)).await;
        }
    }
}

impl fmt::Debug for ConsensusNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsensusNode")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("peers", &self.peers)
            .finish_non_exhaustive()
    }
}
