//! Wire payloads exchanged between nodes and with clients.
//!
//! Field names follow the JSON protocol (`candidateID`, `leaderID`, camelCase
//! elsewhere). Fields added on top of the minimal protocol default to zero or
//! empty, so a bare `{"term":1,"candidateID":2}` is still a valid request.

use serde::{Deserialize, Serialize};

use crate::command::LogEntry;
use crate::node::{NodeId, Role};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub term: u64,
    #[serde(rename = "candidateID")]
    pub candidate_id: NodeId,
    #[serde(default)]
    pub last_log_index: u64,
    #[serde(default)]
    pub last_log_term: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    #[serde(default)]
    pub term: u64,
    pub granted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendRequest {
    pub term: u64,
    #[serde(rename = "leaderID")]
    pub leader_id: NodeId,
    #[serde(default)]
    pub leader_address: Option<String>,
    #[serde(default)]
    pub prev_log_index: u64,
    #[serde(default)]
    pub prev_log_term: u64,
    #[serde(default)]
    pub entries: Vec<LogEntry>,
    #[serde(default)]
    pub leader_commit: u64,
}

impl AppendRequest {
    /// Index of the last entry this request covers.
    pub fn last_index(&self) -> u64 {
        self.prev_log_index + self.entries.len() as u64
    }
}

/// Reply to AppendEntries.
///
/// On a log mismatch `success` is false and `last_log_index` tells the leader
/// where the follower's log ends, so it can retry from an earlier index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendResponse {
    pub term: u64,
    pub success: bool,
    #[serde(default)]
    pub last_log_index: u64,
}

/// Point-in-time view of a node, served by `/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub id: NodeId,
    pub address: String,
    pub role: Role,
    pub term: u64,
    pub voted_for: Option<NodeId>,
    pub log_size: usize,
    pub commit_index: u64,
    pub last_applied: u64,
    pub leader: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_vote_request_parses() {
        let request: VoteRequest =
            serde_json::from_value(json!({"term": 3, "candidateID": 2})).expect("parse");
        assert_eq!(request.candidate_id, 2);
        assert_eq!(request.last_log_index, 0);
        assert_eq!(request.last_log_term, 0);
    }

    #[test]
    fn minimal_append_request_parses() {
        let request: AppendRequest = serde_json::from_value(json!({
            "term": 5,
            "leaderID": 1,
            "entries": [{"term": 5, "command": "SET", "key": "x", "value": "1"}]
        }))
        .expect("parse");

        assert_eq!(request.entries.len(), 1);
        assert_eq!(request.prev_log_index, 0);
        assert_eq!(request.leader_commit, 0);
        assert_eq!(request.last_index(), 1);
    }

    #[test]
    fn status_uses_camel_case_fields() {
        let status = NodeStatus {
            id: 1,
            address: "127.0.0.1:8080".into(),
            role: Role::Leader,
            term: 2,
            voted_for: Some(1),
            log_size: 0,
            commit_index: 0,
            last_applied: 0,
            leader: None,
        };
        let value = serde_json::to_value(&status).expect("serialize");
        assert_eq!(value["role"], "Leader");
        assert_eq!(value["votedFor"], 1);
        assert_eq!(value["logSize"], 0);
        assert_eq!(value["commitIndex"], 0);
    }
}
