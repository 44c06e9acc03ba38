//! Consensus integration.
//!
//! The protocol itself comes from `openraft`; this module supplies what the
//! library leaves to the application: the type bindings, persistent log
//! storage, the state-machine adapter around [`crate::fsm::WorkshopFsm`], and
//! the HTTP transport (client in `network`, server router in `server`).

pub mod log_store;
pub mod network;
pub mod server;
pub mod state_machine;

use std::io::Cursor;

use openraft::BasicNode;

use printfarm_shared::command::{Command, CommandOutcome};

/// Cluster-unique node identifier, supplied by the operator.
pub type NodeId = String;

openraft::declare_raft_types!(
    /// Raft type bindings for the workshop log.
    pub TypeConfig:
        D = Command,
        R = CommandOutcome,
        NodeId = NodeId,
        Node = BasicNode,
        Entry = openraft::Entry<TypeConfig>,
        SnapshotData = Cursor<Vec<u8>>,
        AsyncRuntime = openraft::TokioRuntime,
);

pub type Raft = openraft::Raft<TypeConfig>;
