//! Node configuration and the cluster-wide port convention.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("node id must not be empty")]
    EmptyNodeId,
    #[error("invalid listen address '{0}'")]
    InvalidAddr(String),
}

/// Per-node configuration, assembled from the CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier within the cluster.
    pub id: String,
    /// TCP address of the raft transport.
    pub raft_addr: String,
    /// TCP address of the public HTTP API.
    pub http_addr: String,
    /// Parent directory for per-node persistence.
    pub data_dir: PathBuf,
    /// Declare a single-node initial cluster on first start.
    pub bootstrap: bool,
}

impl NodeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::EmptyNodeId);
        }
        for addr in [&self.raft_addr, &self.http_addr] {
            if addr.parse::<SocketAddr>().is_err() {
                return Err(ConfigError::InvalidAddr(addr.clone()));
            }
        }
        Ok(())
    }

    /// Root of this node's on-disk state: `<data_dir>/<node_id>/`.
    pub fn node_dir(&self) -> PathBuf {
        self.data_dir.join(&self.id)
    }

    pub fn log_db_path(&self) -> PathBuf {
        self.node_dir().join("raft-log.db")
    }

    pub fn stable_db_path(&self) -> PathBuf {
        self.node_dir().join("raft-stable.db")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.node_dir().join("snapshots")
    }
}

/// Every node serves its public API on its raft port + this offset. Leader
/// redirection depends on all nodes honoring the convention.
pub const HTTP_PORT_OFFSET: u16 = 1000;

/// Derive a peer's HTTP address from its raft-transport address.
///
/// Returns `None` when the address has no parseable port or the offset would
/// overflow the port range.
pub fn http_addr_for_raft_addr(raft_addr: &str) -> Option<String> {
    let (host, port) = raft_addr.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    let http_port = port.checked_add(HTTP_PORT_OFFSET)?;
    Some(format!("{host}:{http_port}"))
}
