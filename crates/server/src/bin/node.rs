//! Basalt data node process
//!
//! Serves one shard of the key space. In-memory only: restart discards
//! all state.

use basalt_server::{serve_node, NodeService};
use clap::{Arg, Command};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn build_cli() -> Command {
    Command::new("basalt-node")
        .about("Basalt data node: serves one shard of the key space")
        .arg(
            Arg::new("listen")
                .long("listen")
                .value_name("ADDR")
                .required(true)
                .help("Address to listen on, e.g. 127.0.0.1:7101"),
        )
        .arg(
            Arg::new("index")
                .long("index")
                .value_name("N")
                .required(true)
                .value_parser(clap::value_parser!(usize))
                .help("Shard index this node owns"),
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
    let index = *matches.get_one::<usize>("index").expect("--index is required");

    let listener = TcpListener::bind(listen).await?;
    tracing::info!(%listen, index, "basalt node listening");
    serve_node(listener, Arc::new(NodeService::new(index))).await?;
    Ok(())
}
