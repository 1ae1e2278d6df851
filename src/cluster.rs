//! In-process cluster harness
//!
//! Runs a full cluster — data nodes and coordinator — as tasks inside the
//! caller's tokio runtime, on ephemeral loopback ports. The transport is
//! real TCP, so anything proven here holds for separate processes too.
//! Used by the integration tests and the benchmark driver.

use basalt_client::{Client, ClientConfig};
use basalt_core::{Result, ShardMap};
use basalt_server::{serve_coordinator, serve_node, CoordinatorConfig, CoordinatorService, NodeService};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A whole cluster inside one process.
///
/// Servers are aborted when the cluster is dropped.
pub struct LocalCluster {
    coordinator_addr: SocketAddr,
    node_addrs: Vec<SocketAddr>,
    tasks: Vec<JoinHandle<std::io::Result<()>>>,
}

impl LocalCluster {
    /// Start `node_count` data nodes and a coordinator with defaults
    pub async fn start(node_count: usize) -> Result<Self> {
        Self::start_with(node_count, CoordinatorConfig::default()).await
    }

    /// Start with a custom coordinator configuration
    pub async fn start_with(node_count: usize, config: CoordinatorConfig) -> Result<Self> {
        let mut node_addrs = Vec::with_capacity(node_count);
        let mut tasks = Vec::with_capacity(node_count + 1);

        for index in 0..node_count {
            let listener = TcpListener::bind("127.0.0.1:0").await?;
            node_addrs.push(listener.local_addr()?);
            tasks.push(tokio::spawn(serve_node(
                listener,
                Arc::new(NodeService::new(index)),
            )));
        }

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let coordinator_addr = listener.local_addr()?;
        let service = CoordinatorService::new(node_addrs.clone(), config);
        tasks.push(tokio::spawn(serve_coordinator(listener, Arc::new(service))));

        tracing::debug!(%coordinator_addr, nodes = node_addrs.len(), "local cluster up");
        Ok(Self {
            coordinator_addr,
            node_addrs,
            tasks,
        })
    }

    /// A client for this cluster with default timeouts
    pub fn client(&self) -> Client {
        Client::new(self.client_config())
    }

    /// The client configuration, for callers that tune timeouts
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(self.coordinator_addr, self.node_addrs.clone())
    }

    /// The placement map every participant derives from the node list
    pub fn shard_map(&self) -> ShardMap {
        ShardMap::new(self.node_addrs.len())
    }

    /// The coordinator's address
    pub fn coordinator_addr(&self) -> SocketAddr {
        self.coordinator_addr
    }

    /// Data node addresses, in shard order
    pub fn node_addrs(&self) -> &[SocketAddr] {
        &self.node_addrs
    }
}

impl Drop for LocalCluster {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
