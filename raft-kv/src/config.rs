//! Node identity, cluster membership and protocol timing.
//!
//! Everything here is fixed when the node starts. Membership changes are not
//! supported.

use std::time::Duration;

use crate::error::ConfigError;
use crate::node::NodeId;

/// Timeouts that drive elections, heartbeats and peer calls.
///
/// - `election_timeout_min..=election_timeout_max`: a follower that hears
///   nothing from a leader for a random duration in this range campaigns.
/// - `heartbeat_interval`: how often a leader replicates, even with nothing
///   new to send. Must stay well below the election timeout.
/// - `rpc_timeout`: upper bound on any single peer call; an unanswered call
///   counts as a denial.
/// - `commit_timeout`: how long a client write waits for a majority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub heartbeat_interval: Duration,
    pub rpc_timeout: Duration,
    pub commit_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            election_timeout_min: Duration::from_millis(150),
            election_timeout_max: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(50),
            rpc_timeout: Duration::from_secs(2),
            commit_timeout: Duration::from_secs(2),
        }
    }
}

impl Timing {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.election_timeout_min > self.election_timeout_max
            || self.election_timeout_min.is_zero()
        {
            return Err(ConfigError::ElectionTimeoutRange {
                min_ms: self.election_timeout_min.as_millis(),
                max_ms: self.election_timeout_max.as_millis(),
            });
        }
        if self.heartbeat_interval.is_zero()
            || self.heartbeat_interval >= self.election_timeout_min
        {
            return Err(ConfigError::HeartbeatInterval);
        }
        Ok(())
    }
}

/// Configuration for one replica.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// This node's unique, positive ID.
    pub id: NodeId,
    /// Address peers use to reach this node (e.g. "127.0.0.1:7101").
    pub address: String,
    /// Addresses of every other replica. Never contains `address`.
    pub peers: Vec<String>,
    pub timing: Timing,
}

impl NodeConfig {
    /// Builds a validated configuration.
    ///
    /// The same peer list can be handed to every node: this node's own
    /// address and duplicates are dropped.
    pub fn new(
        id: NodeId,
        address: impl Into<String>,
        peers: impl IntoIterator<Item = String>,
        timing: Timing,
    ) -> Result<Self, ConfigError> {
        let address = address.into();
        if id == 0 {
            return Err(ConfigError::InvalidId);
        }
        if address.trim().is_empty() {
            return Err(ConfigError::EmptyAddress);
        }
        timing.validate()?;

        let mut unique = Vec::new();
        for peer in peers {
            let peer = peer.trim().to_string();
            if peer.is_empty() || peer == address || unique.contains(&peer) {
                continue;
            }
            unique.push(peer);
        }

        Ok(Self {
            id,
            address,
            peers: unique,
            timing,
        })
    }

    /// Number of voting members, this node included.
    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peers(list: &[&str]) -> Vec<String> {
        list.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn own_address_and_duplicates_are_dropped() {
        let config = NodeConfig::new(
            1,
            "127.0.0.1:7101",
            peers(&["127.0.0.1:7101", "127.0.0.1:7102", "127.0.0.1:7102", "127.0.0.1:7103"]),
            Timing::default(),
        )
        .expect("valid config");

        assert_eq!(config.peers, peers(&["127.0.0.1:7102", "127.0.0.1:7103"]));
        assert_eq!(config.cluster_size(), 3);
    }

    #[test]
    fn zero_id_is_rejected() {
        let result = NodeConfig::new(0, "127.0.0.1:7101", Vec::new(), Timing::default());
        assert_eq!(result.unwrap_err(), ConfigError::InvalidId);
    }

    #[test]
    fn inverted_election_range_is_rejected() {
        let timing = Timing {
            election_timeout_min: Duration::from_millis(300),
            election_timeout_max: Duration::from_millis(150),
            ..Timing::default()
        };
        let result = NodeConfig::new(1, "127.0.0.1:7101", Vec::new(), timing);
        assert!(matches!(
            result,
            Err(ConfigError::ElectionTimeoutRange { min_ms: 300, max_ms: 150 })
        ));
    }

    #[test]
    fn heartbeat_must_undercut_election_timeout() {
        let timing = Timing {
            heartbeat_interval: Duration::from_millis(150),
            ..Timing::default()
        };
        let result = NodeConfig::new(1, "127.0.0.1:7101", Vec::new(), timing);
        assert_eq!(result.unwrap_err(), ConfigError::HeartbeatInterval);
    }
}
