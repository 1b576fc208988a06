//! Command-line flags for a node.

use std::time::Duration;

use clap::Parser;

use crate::config::{NodeConfig, Timing};
use crate::error::ConfigError;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Replicated key-value store node", long_about = None)]
pub struct Cli {
    /// Unique, positive ID of this node.
    #[arg(long)]
    pub id: u64,

    /// Address to bind and advertise to peers (host:port).
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub address: String,

    /// Address of another cluster member. Repeat the flag or separate with
    /// commas. This node's own address is ignored if listed.
    #[arg(long = "peer", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Lower bound of the randomized election timeout.
    #[arg(long, default_value_t = 150)]
    pub election_timeout_min_ms: u64,

    /// Upper bound of the randomized election timeout.
    #[arg(long, default_value_t = 300)]
    pub election_timeout_max_ms: u64,

    /// Interval between leader heartbeats.
    #[arg(long, default_value_t = 50)]
    pub heartbeat_ms: u64,

    /// Timeout for a single call to a peer.
    #[arg(long, default_value_t = 2000)]
    pub rpc_timeout_ms: u64,

    /// How long a client write waits for a majority before failing.
    #[arg(long, default_value_t = 2000)]
    pub commit_timeout_ms: u64,
}

impl Cli {
    pub fn timing(&self) -> Timing {
        Timing {
            election_timeout_min: Duration::from_millis(self.election_timeout_min_ms),
            election_timeout_max: Duration::from_millis(self.election_timeout_max_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_ms),
            rpc_timeout: Duration::from_millis(self.rpc_timeout_ms),
            commit_timeout: Duration::from_millis(self.commit_timeout_ms),
        }
    }

    pub fn into_config(self) -> Result<NodeConfig, ConfigError> {
        let timing = self.timing();
        NodeConfig::new(self.id, self.address, self.peers, timing)
    }
}
