//! `raft-kv` binary: runs one node until ctrl-c.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{info, warn};

use raft_kv::cli::Cli;
use raft_kv::runtime::Driver;
use raft_kv::server;
use raft_kv::transport::HttpTransport;
use raft_kv::ConsensusNode;

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Cli::parse().into_config().context("invalid configuration")?;
    let transport = HttpTransport::new(config.timing.rpc_timeout)
        .context("failed to build peer http client")?;
    let listener = TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("failed to bind {}", config.address))?;

    info!(
        id = config.id,
        address = %config.address,
        peers = ?config.peers,
        "node starting"
    );
    let node = Arc::new(ConsensusNode::new(config, Arc::new(transport)));

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let driver = Driver::new(Arc::clone(&node)).spawn(async move {
        let _ = stop_rx.await;
    });

    let served = server::serve_until(listener, node, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = ?err, "failed to install ctrl-c handler");
        }
    })
    .await;

    let _ = stop_tx.send(());
    let _ = driver.await;
    info!("node stopped");

    served.context("http server failed")
}
