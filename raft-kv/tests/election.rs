//! Leader election across an in-process cluster.
//!
//! Nodes are wired through `LocalNetwork`, so partitions are simulated by
//! isolating addresses rather than by killing sockets.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use raft_kv::runtime::Driver;
use raft_kv::transport::LocalNetwork;
use raft_kv::{ConsensusNode, ElectionOutcome, NodeConfig, ReplicationRound, Role, Timing};
use tokio::sync::oneshot;
use tokio::time::{sleep, Instant};

/// Test harness for a cluster of nodes sharing one `LocalNetwork`.
struct TestCluster {
    network: Arc<LocalNetwork>,
    nodes: Vec<Arc<ConsensusNode>>,
}

impl TestCluster {
    /// Builds N nodes with IDs 1..=N at addresses "node-1".."node-N".
    fn new(n: usize) -> Result<Self> {
        let network = LocalNetwork::new();
        let addresses: Vec<String> = (1..=n).map(|id| format!("node-{id}")).collect();

        let mut nodes = Vec::new();
        for (i, address) in addresses.iter().enumerate() {
            let config =
                NodeConfig::new(i as u64 + 1, address.clone(), addresses.clone(), Timing::default())?;
            let node = Arc::new(ConsensusNode::new(config, network.transport_for(address)));
            network.register(Arc::clone(&node));
            nodes.push(node);
        }

        Ok(Self { network, nodes })
    }

    /// Gets a node by 1-indexed ID.
    fn node(&self, id: usize) -> &Arc<ConsensusNode> {
        &self.nodes[id - 1]
    }

    fn isolate(&self, id: usize) {
        self.network.isolate(self.node(id).address());
    }

    fn heal(&self, id: usize) {
        self.network.heal(self.node(id).address());
    }

    /// IDs of nodes currently claiming leadership, with their terms.
    async fn leaders(&self) -> Vec<(usize, u64)> {
        let mut leaders = Vec::new();
        for (i, node) in self.nodes.iter().enumerate() {
            let status = node.status().await;
            if status.role == Role::Leader {
                leaders.push((i + 1, status.term));
            }
        }
        leaders
    }

    /// Waits until exactly one node among `candidates` leads and every other
    /// member of `candidates` names it as leader.
    async fn wait_for_agreed_leader(&self, candidates: &[usize], timeout: Duration) -> Result<usize> {
        let start = Instant::now();
        loop {
            if start.elapsed() > timeout {
                bail!("timeout waiting for an agreed leader");
            }

            let mut leaders = Vec::new();
            let mut hints = Vec::new();
            for &id in candidates {
                let status = self.node(id).status().await;
                if status.role == Role::Leader {
                    leaders.push(id);
                }
                hints.push(status.leader);
            }

            if let [leader] = leaders[..] {
                let address = self.node(leader).address().to_string();
                if hints.iter().all(|hint| hint.as_deref() == Some(address.as_str())) {
                    return Ok(leader);
                }
            }

            sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Asserts that no two nodes lead in the same term.
fn assert_no_split_brain(leaders: &[(usize, u64)]) {
    let mut by_term: HashMap<u64, Vec<usize>> = HashMap::new();
    for &(id, term) in leaders {
        by_term.entry(term).or_default().push(id);
    }
    for (term, ids) in by_term {
        assert!(ids.len() <= 1, "SPLIT BRAIN: nodes {ids:?} all lead term {term}");
    }
}

#[tokio::test]
async fn campaigner_wins_with_two_peer_votes() -> Result<()> {
    let cluster = TestCluster::new(3)?;

    for id in 1..=3 {
        assert_eq!(cluster.node(id).role().await, Role::Follower);
        assert_eq!(cluster.node(id).term().await, 0);
    }

    let outcome = cluster.node(1).start_election().await;

    assert_eq!(outcome, ElectionOutcome::Won { term: 1 });
    assert_eq!(cluster.leaders().await, vec![(1, 1)]);
    for id in 2..=3 {
        let status = cluster.node(id).status().await;
        assert_eq!(status.term, 1);
        assert_eq!(status.role, Role::Follower);
    }

    // The first heartbeat tells followers who leads.
    let round = cluster.node(1).replicate().await;
    assert!(matches!(round, ReplicationRound::Completed { acknowledged: 2, .. }));
    for id in 2..=3 {
        let status = cluster.node(id).status().await;
        assert_eq!(status.leader.as_deref(), Some("node-1"));
    }

    Ok(())
}

#[tokio::test]
async fn isolated_candidate_cannot_win() -> Result<()> {
    let cluster = TestCluster::new(3)?;
    cluster.isolate(3);

    let outcome = cluster.node(3).start_election().await;

    assert_eq!(outcome, ElectionOutcome::Lost { term: 1 });
    assert_eq!(cluster.node(3).role().await, Role::Candidate);
    assert_eq!(cluster.node(1).term().await, 0);
    assert_eq!(cluster.node(2).term().await, 0);

    Ok(())
}

#[tokio::test]
async fn deposed_leader_steps_down_after_partition_heals() -> Result<()> {
    let cluster = TestCluster::new(3)?;
    cluster.node(1).start_election().await;
    cluster.isolate(1);

    let outcome = cluster.node(2).start_election().await;
    assert_eq!(outcome, ElectionOutcome::Won { term: 2 });
    // Node 1 still believes it leads, but only in the older term.
    assert_eq!(cluster.leaders().await, vec![(1, 1), (2, 2)]);

    cluster.heal(1);
    let round = cluster.node(1).replicate().await;

    assert_eq!(round, ReplicationRound::SteppedDown { term: 2 });
    let status = cluster.node(1).status().await;
    assert_eq!(status.role, Role::Follower);
    assert_eq!(status.term, 2);
    assert_eq!(cluster.leaders().await, vec![(2, 2)]);

    Ok(())
}

#[tokio::test]
async fn concurrent_campaigns_never_share_a_term() -> Result<()> {
    let cluster = TestCluster::new(3)?;

    let (first, second) = tokio::join!(
        cluster.node(1).start_election(),
        cluster.node(2).start_election()
    );

    let winners = [first, second]
        .iter()
        .filter(|outcome| matches!(outcome, ElectionOutcome::Won { .. }))
        .count();
    assert!(winners >= 1, "one of the campaigns should win: {first:?} {second:?}");
    assert_no_split_brain(&cluster.leaders().await);

    Ok(())
}

#[tokio::test]
async fn drivers_elect_and_replace_a_leader() -> Result<()> {
    let cluster = TestCluster::new(3)?;

    let mut stops = Vec::new();
    let mut drivers = Vec::new();
    for node in &cluster.nodes {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        drivers.push(Driver::new(Arc::clone(node)).spawn(async move {
            let _ = stop_rx.await;
        }));
        stops.push(stop_tx);
    }

    let first = cluster
        .wait_for_agreed_leader(&[1, 2, 3], Duration::from_secs(5))
        .await?;
    let first_term = cluster.node(first).term().await;

    cluster.isolate(first);
    let survivors: Vec<usize> = (1..=3).filter(|&id| id != first).collect();
    let second = cluster
        .wait_for_agreed_leader(&survivors, Duration::from_secs(5))
        .await?;

    assert_ne!(first, second);
    assert!(cluster.node(second).term().await > first_term);
    assert_no_split_brain(&cluster.leaders().await);

    for stop in stops {
        let _ = stop.send(());
    }
    for driver in drivers {
        driver.await?;
    }

    Ok(())
}
