//! Basalt coordinator process
//!
//! Issues timestamps, validates OCC commits, fans out the write phase,
//! and keeps the bounded committed history. One coordinator per cluster.

use basalt_server::{serve_coordinator, CoordinatorService};
use clap::{Arg, ArgAction, Command};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn build_cli() -> Command {
    Command::new("basalt-coordinator")
        .about("Basalt coordinator: timestamps, validation, write fan-out")
        .arg(
            Arg::new("listen")
                .long("listen")
                .value_name("ADDR")
                .required(true)
                .help("Address to listen on, e.g. 127.0.0.1:7100"),
        )
        .arg(
            Arg::new("node")
                .long("node")
                .value_name("ADDR")
                .required(true)
                .action(ArgAction::Append)
                .help("Data node endpoint; repeat once per node, in shard order"),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let matches = build_cli().get_matches();
    let listen: SocketAddr = matches
        .get_one::<String>("listen")
        .expect("--listen is required")
        .parse()?;
    let nodes: Vec<SocketAddr> = matches
        .get_many::<String>("node")
        .expect("--node is required")
        .map(|addr| addr.parse())
        .collect::<Result<_, _>>()?;

    let listener = TcpListener::bind(listen).await?;
    tracing::info!(%listen, nodes = nodes.len(), "basalt coordinator listening");
    let service = CoordinatorService::new(nodes, Default::default());
    serve_coordinator(listener, Arc::new(service)).await?;
    Ok(())
}
