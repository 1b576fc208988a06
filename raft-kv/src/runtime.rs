//! Timer-driven driver for a [`ConsensusNode`].
//!
//! The consensus core never decides on its own when to campaign or send
//! heartbeats; this module does. Every tick the driver looks at the node's
//! role:
//!
//! - **Follower / Candidate**: if no leader contact happened within a
//!   randomized election timeout, start an election.
//! - **Leader**: every `heartbeat_interval`, run a replication round.
//!
//! Elections and replication rounds run as spawned tasks, at most one of
//! each in flight, so a slow peer never delays the next tick.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::select;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::node::{ConsensusNode, ElectionOutcome, ReplicationRound, Role};

/// How often the driver checks the node's timers.
const TICK_INTERVAL: Duration = Duration::from_millis(10);

pub struct Driver {
    node: Arc<ConsensusNode>,
    election: Option<JoinHandle<ElectionOutcome>>,
    replication: Option<JoinHandle<ReplicationRound>>,
    election_timeout: Duration,
    last_broadcast: Option<Instant>,
    last_role: Role,
}

impl Driver {
    pub fn new(node: Arc<ConsensusNode>) -> Self {
        let election_timeout = random_election_timeout(&node);
        Self {
            node,
            election: None,
            replication: None,
            election_timeout,
            last_broadcast: None,
            last_role: Role::Follower,
        }
    }

    /// Runs until `shutdown` resolves, then aborts any in-flight work.
    pub async fn run_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        let mut ticker = time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!(node = self.node.id(), "driver shutting down");
                    break;
                }
                _ = ticker.tick() => self.tick().await,
            }
        }

        if let Some(handle) = self.election.take() {
            handle.abort();
        }
        if let Some(handle) = self.replication.take() {
            handle.abort();
        }
    }

    /// Spawns the driver on the current runtime.
    pub fn spawn<F>(self, shutdown: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(self.run_until(shutdown))
    }

    async fn tick(&mut self) {
        let role = self.node.role().await;
        self.log_role_change(role);

        match role {
            Role::Leader => self.maybe_broadcast(),
            Role::Follower | Role::Candidate => self.maybe_campaign().await,
        }
    }

    fn maybe_broadcast(&mut self) {
        if in_flight(&self.replication) {
            return;
        }
        let due = self
            .last_broadcast
            .map_or(true, |at| at.elapsed() >= self.node.timing().heartbeat_interval);
        if !due {
            return;
        }

        let node = Arc::clone(&self.node);
        self.replication = Some(tokio::spawn(async move { node.replicate().await }));
        self.last_broadcast = Some(Instant::now());
    }

    async fn maybe_campaign(&mut self) {
        if in_flight(&self.election) {
            return;
        }
        if self.node.since_last_contact().await < self.election_timeout {
            return;
        }

        debug!(
            node = self.node.id(),
            timeout_ms = self.election_timeout.as_millis() as u64,
            "election timeout elapsed"
        );
        let node = Arc::clone(&self.node);
        self.election = Some(tokio::spawn(async move { node.start_election().await }));
        self.election_timeout = random_election_timeout(&self.node);
    }

    fn log_role_change(&mut self, role: Role) {
        if role == self.last_role {
            return;
        }
        info!(
            node = self.node.id(),
            from = %self.last_role,
            to = %role,
            "role changed"
        );
        if role == Role::Leader {
            // Announce the new leadership right away.
            self.last_broadcast = None;
        }
        self.last_role = role;
    }
}

fn in_flight<T>(handle: &Option<JoinHandle<T>>) -> bool {
    handle.as_ref().is_some_and(|handle| !handle.is_finished())
}

fn random_election_timeout(node: &ConsensusNode) -> Duration {
    let timing = node.timing();
    rand::thread_rng().gen_range(timing.election_timeout_min..=timing.election_timeout_max)
}
