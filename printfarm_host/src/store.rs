//! Replicated store façade.
//!
//! Owns the consensus handle and the state-machine store, and is the only
//! surface the HTTP layer talks to: writes go through [`Store::propose`],
//! membership through [`Store::join`], reads come straight from the local
//! FSM.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use openraft::error::{InitializeError, RaftError};
use openraft::{BasicNode, ServerState};
use thiserror::Error;

use printfarm_shared::command::{Command, CommandOutcome};
use printfarm_shared::config::{ConfigError, NodeConfig};
use printfarm_shared::models::{Filament, PrintJob, Printer};

use crate::raft::log_store::LogStore;
use crate::raft::network::HttpNetworkFactory;
use crate::raft::state_machine::StateMachineStore;
use crate::raft::{NodeId, Raft};

/// How long a proposed command may wait for replication and apply.
pub const APPLY_TIMEOUT: Duration = Duration::from_millis(500);

/// The local node's view of its consensus role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
    Candidate,
    Shutdown,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Leader => "Leader",
            Role::Follower => "Follower",
            Role::Candidate => "Candidate",
            Role::Shutdown => "Shutdown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not the leader, cannot apply command")]
    NotLeaderApply,
    #[error("not the leader, cannot join")]
    NotLeaderJoin,
    #[error("apply timed out after {0:?}")]
    ApplyTimeout(Duration),
    #[error("consensus error: {0}")]
    Consensus(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Store {
    config: NodeConfig,
    raft: Raft,
    sm: Arc<StateMachineStore>,
    log_store: LogStore,
}

impl Store {
    /// Open the per-node stores under `<data_dir>/<node_id>/`, start the
    /// consensus core, and, when `bootstrap` is set, declare a single-node
    /// cluster containing only this node.
    pub async fn open(config: NodeConfig) -> Result<Store, StoreError> {
        config.validate()?;
        fs::create_dir_all(config.node_dir())?;

        tracing::info!(
            node_id = %config.id,
            dir = %config.node_dir().display(),
            "opening replicated store"
        );

        let log_store = LogStore::open(&config.log_db_path(), &config.stable_db_path())
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        let sm = StateMachineStore::open(config.snapshot_dir())
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        let raft_config = openraft::Config {
            cluster_name: "printfarm".to_string(),
            heartbeat_interval: 100,
            election_timeout_min: 300,
            election_timeout_max: 600,
            ..Default::default()
        };
        let raft_config = Arc::new(
            raft_config
                .validate()
                .map_err(|e| StoreError::Consensus(e.to_string()))?,
        );

        let raft = Raft::new(
            config.id.clone(),
            raft_config,
            HttpNetworkFactory::new(),
            log_store.clone(),
            sm.clone(),
        )
        .await
        .map_err(|e| StoreError::Consensus(e.to_string()))?;

        if config.bootstrap {
            let mut members = BTreeMap::new();
            members.insert(config.id.clone(), BasicNode::new(config.raft_addr.clone()));
            match raft.initialize(members).await {
                Ok(()) => {
                    tracing::info!(node_id = %config.id, "bootstrapped single-node cluster")
                }
                Err(RaftError::APIError(InitializeError::NotAllowed(_))) => {
                    // Already initialized on a previous run; nothing to do.
                    tracing::info!("cluster already initialized, skipping bootstrap");
                }
                Err(e) => return Err(StoreError::Consensus(e.to_string())),
            }
        }

        Ok(Store {
            config,
            raft,
            sm,
            log_store,
        })
    }

    /// Handle for the raft transport server.
    pub fn raft_handle(&self) -> Raft {
        self.raft.clone()
    }

    pub fn node_id(&self) -> &str {
        &self.config.id
    }

    /// Add `node_id` as a voting member. Leader-only.
    pub async fn join(&self, node_id: &str, raft_addr: &str) -> Result<(), StoreError> {
        if self.role() != Role::Leader {
            return Err(StoreError::NotLeaderJoin);
        }
        tracing::info!(node_id, raft_addr, "adding voter to cluster");

        self.raft
            .add_learner(node_id.to_string(), BasicNode::new(raft_addr), true)
            .await
            .map_err(|e| StoreError::Consensus(e.to_string()))?;

        let metrics = self.raft.metrics().borrow().clone();
        let mut voters: BTreeSet<NodeId> = metrics
            .membership_config
            .membership()
            .voter_ids()
            .collect();
        voters.insert(node_id.to_string());

        self.raft
            .change_membership(voters, false)
            .await
            .map_err(|e| StoreError::Consensus(e.to_string()))?;
        Ok(())
    }

    /// Submit a command to the replicated log and wait for the local apply
    /// result. Leader-only.
    ///
    /// A timeout does not roll the entry back: if it commits later it still
    /// takes effect on every replica.
    pub async fn propose(&self, cmd: Command) -> Result<CommandOutcome, StoreError> {
        if self.role() != Role::Leader {
            return Err(StoreError::NotLeaderApply);
        }
        match tokio::time::timeout(APPLY_TIMEOUT, self.raft.client_write(cmd)).await {
            Err(_) => Err(StoreError::ApplyTimeout(APPLY_TIMEOUT)),
            Ok(Ok(resp)) => Ok(resp.data),
            Ok(Err(e)) => {
                // Leadership can be lost between the role check and the write.
                if e.forward_to_leader().is_some() {
                    Err(StoreError::NotLeaderApply)
                } else {
                    Err(StoreError::Consensus(e.to_string()))
                }
            }
        }
    }

    pub fn role(&self) -> Role {
        match self.raft.metrics().borrow().state {
            ServerState::Leader => Role::Leader,
            ServerState::Candidate => Role::Candidate,
            ServerState::Shutdown => Role::Shutdown,
            ServerState::Follower | ServerState::Learner => Role::Follower,
        }
    }

    /// Raft-transport address of the current leader, if one is known.
    pub fn leader_address(&self) -> Option<String> {
        let metrics = self.raft.metrics().borrow().clone();
        let leader = metrics.current_leader?;
        metrics
            .membership_config
            .membership()
            .get_node(&leader)
            .map(|node| node.addr.clone())
    }

    /// Flat stats map for the status surface.
    pub fn stats(&self) -> BTreeMap<String, String> {
        let metrics = self.raft.metrics().borrow().clone();
        let mut stats = BTreeMap::new();
        stats.insert("state".to_string(), self.role().to_string());
        stats.insert("node_id".to_string(), self.config.id.clone());
        stats.insert(
            "leader_addr".to_string(),
            self.leader_address().unwrap_or_default(),
        );
        stats.insert(
            "commit_index".to_string(),
            self.log_store
                .committed_index()
                .map(|i| i.to_string())
                .unwrap_or_default(),
        );
        stats.insert(
            "last_applied".to_string(),
            metrics
                .last_applied
                .map(|l| l.index.to_string())
                .unwrap_or_default(),
        );
        stats.insert(
            "last_log_index".to_string(),
            metrics
                .last_log_index
                .map(|i| i.to_string())
                .unwrap_or_default(),
        );
        stats.insert(
            "current_term".to_string(),
            metrics.current_term.to_string(),
        );
        stats
    }

    pub fn printers(&self) -> Vec<Printer> {
        self.sm.fsm.printers()
    }

    pub fn filaments(&self) -> Vec<Filament> {
        self.sm.fsm.filaments()
    }

    pub fn print_jobs(&self) -> Vec<PrintJob> {
        self.sm.fsm.print_jobs()
    }

    /// Block until this node observes itself as leader. Used after bootstrap
    /// and by tests.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Result<(), StoreError> {
        self.raft
            .wait(Some(timeout))
            .state(ServerState::Leader, "become leader")
            .await
            .map_err(|e| StoreError::Consensus(e.to_string()))?;
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<(), StoreError> {
        self.raft
            .shutdown()
            .await
            .map_err(|e| StoreError::Consensus(e.to_string()))
    }
}
