//! Basalt: a distributed in-memory key-value store built to compare
//! concurrency-control disciplines.
//!
//! Two disciplines share one transactional client API:
//! - **OCC** — optimistic concurrency control with backward validation at
//!   a central coordinator
//! - **S2PL** — strict two-phase locking arbitrated by per-node lock
//!   tables, with wound-wait deadlock prevention
//!
//! The cluster is a coordinator process plus a fixed set of data nodes,
//! each owning one hash shard of the key space. Everything is in memory;
//! durability is explicitly out of scope.
//!
//! # Quick start
//!
//! ```no_run
//! use basalt::cluster::LocalCluster;
//! use basalt::{Key, Mode, Value};
//!
//! # async fn demo() -> basalt::Result<()> {
//! let cluster = LocalCluster::start(2).await?;
//! let client = cluster.client();
//!
//! let mut txn = client.begin(Mode::Occ).await?;
//! txn.write(Key::from("answer"), Value::from("42")).await?;
//! let ts_commit = txn.commit().await?;
//! assert!(ts_commit > txn.tid());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cluster;

pub use basalt_client::{Client, ClientConfig, Transaction};
pub use basalt_core::{AbortReason, Error, Key, LockMode, Mode, Result, ShardMap, TxnId, Value};
pub use basalt_server::{CoordinatorConfig, CoordinatorService, NodeService};
