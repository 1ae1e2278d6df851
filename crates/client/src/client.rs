//! Client entry point and configuration

use crate::conn::CoordConn;
use crate::transaction::Transaction;
use basalt_core::{Mode, Result, ShardMap};
use std::net::SocketAddr;
use std::time::Duration;

/// Endpoints and timeouts for a [`Client`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// The coordinator's address
    pub coordinator: SocketAddr,
    /// Data node addresses, indexed by shard. Order must match the node
    /// `--index` assignment; every participant derives placement from it.
    pub nodes: Vec<SocketAddr>,
    /// Bound on each S2PL lock acquisition
    pub lock_timeout: Duration,
    /// Bound on establishing any connection
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// Configuration with default timeouts
    pub fn new(coordinator: SocketAddr, nodes: Vec<SocketAddr>) -> Self {
        Self {
            coordinator,
            nodes,
            lock_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Handle to a Basalt cluster.
///
/// Cheap to clone conceptually but deliberately not shared: each
/// [`begin`](Self::begin) opens the transaction's own connections, so
/// distinct transactions never contend on a socket. A transaction is
/// single-threaded; run transactions in parallel by calling `begin`
/// from parallel tasks.
#[derive(Debug, Clone)]
pub struct Client {
    config: ClientConfig,
    shard_map: ShardMap,
}

impl Client {
    /// Create a client for the given cluster layout.
    ///
    /// # Panics
    ///
    /// Panics if `config.nodes` is empty (no shard can be placed).
    pub fn new(config: ClientConfig) -> Self {
        let shard_map = ShardMap::new(config.nodes.len());
        Self { config, shard_map }
    }

    /// Start a transaction in the given discipline.
    ///
    /// Calls the coordinator's `begin` to obtain the transaction id (its
    /// start timestamp, and its deadlock priority under S2PL).
    pub async fn begin(&self, mode: Mode) -> Result<Transaction> {
        let mut coord =
            CoordConn::connect(self.config.coordinator, self.config.connect_timeout).await?;
        let tid = coord.begin().await?;
        tracing::debug!(tid, %mode, "transaction started");
        Ok(Transaction::new(
            tid,
            mode,
            coord,
            self.config.clone(),
            self.shard_map,
        ))
    }
}
