//! State-machine adapter between the consensus library and the domain FSM.
//!
//! Snapshots are self-describing JSON documents persisted under the node's
//! `snapshots/` directory. Only the latest snapshot is kept; it is loaded at
//! startup so the library replays just the log tail.

use std::fs;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use openraft::storage::{RaftSnapshotBuilder, RaftStateMachine, Snapshot};
use openraft::{
    AnyError, BasicNode, Entry, EntryPayload, LogId, OptionalSend, SnapshotMeta, StorageError,
    StorageIOError, StoredMembership,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fsm::{WorkshopFsm, WorkshopState};
use printfarm_shared::command::CommandOutcome;

use super::{NodeId, TypeConfig};

const SNAPSHOT_FILE: &str = "current.snap";

#[derive(Debug, Error)]
pub enum SnapshotFileError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot decode error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// A snapshot as persisted on disk: the meta plus the serialized
/// [`WorkshopState`] document.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoredSnapshot {
    pub meta: SnapshotMeta<NodeId, BasicNode>,
    pub data: Vec<u8>,
}

#[derive(Debug, Default, Clone)]
struct Applied {
    last_applied: Option<LogId<NodeId>>,
    last_membership: StoredMembership<NodeId, BasicNode>,
}

/// Owns the domain FSM on behalf of the consensus library. Shared as an
/// `Arc`: the raft core drives it mutably through the storage traits while
/// the store façade reads entity lists from the same instance.
#[derive(Debug)]
pub struct StateMachineStore {
    pub fsm: WorkshopFsm,
    applied: Mutex<Applied>,
    snapshot_idx: AtomicU64,
    current_snapshot: Mutex<Option<StoredSnapshot>>,
    snapshot_dir: PathBuf,
}

impl StateMachineStore {
    /// Open the snapshot directory and restore the latest snapshot, if any.
    pub fn open(snapshot_dir: PathBuf) -> Result<Arc<Self>, SnapshotFileError> {
        fs::create_dir_all(&snapshot_dir)?;
        let store = StateMachineStore {
            fsm: WorkshopFsm::new(),
            applied: Mutex::new(Applied::default()),
            snapshot_idx: AtomicU64::new(0),
            current_snapshot: Mutex::new(None),
            snapshot_dir,
        };

        let path = store.snapshot_dir.join(SNAPSHOT_FILE);
        if path.exists() {
            let bytes = fs::read(&path)?;
            let stored: StoredSnapshot = serde_json::from_slice(&bytes)?;
            let state: WorkshopState = serde_json::from_slice(&stored.data)?;
            store.fsm.restore(state);
            *store.applied.lock().expect("applied mutex poisoned") = Applied {
                last_applied: stored.meta.last_log_id.clone(),
                last_membership: stored.meta.last_membership.clone(),
            };
            *store
                .current_snapshot
                .lock()
                .expect("snapshot mutex poisoned") = Some(stored);
        }

        Ok(Arc::new(store))
    }

    fn applied(&self) -> Applied {
        self.applied.lock().expect("applied mutex poisoned").clone()
    }

    fn set_applied(&self, applied: Applied) {
        *self.applied.lock().expect("applied mutex poisoned") = applied;
    }

    /// Write the snapshot document, temp-file-then-rename so a crash cannot
    /// leave a torn current snapshot.
    fn persist_snapshot(&self, stored: &StoredSnapshot) -> Result<(), SnapshotFileError> {
        let bytes = serde_json::to_vec(stored)?;
        let tmp = self.snapshot_dir.join(format!("{SNAPSHOT_FILE}.tmp"));
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, self.snapshot_dir.join(SNAPSHOT_FILE))?;
        Ok(())
    }
}

fn sm_read_err(e: impl std::error::Error + 'static) -> StorageError<NodeId> {
    StorageIOError::read_state_machine(AnyError::new(&e)).into()
}

fn sm_write_err(e: impl std::error::Error + 'static) -> StorageError<NodeId> {
    StorageIOError::write_state_machine(AnyError::new(&e)).into()
}

impl RaftSnapshotBuilder<TypeConfig> for Arc<StateMachineStore> {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<NodeId>> {
        // Clone under the FSM lock, serialize after releasing it.
        let state = self.fsm.snapshot();
        let data = serde_json::to_vec(&state).map_err(sm_write_err)?;

        let applied = self.applied();
        let idx = self.snapshot_idx.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot_id = match &applied.last_applied {
            Some(last) => format!("{}-{}-{}", last.leader_id, last.index, idx),
            None => format!("--{idx}"),
        };
        let meta = SnapshotMeta {
            last_log_id: applied.last_applied.clone(),
            last_membership: applied.last_membership.clone(),
            snapshot_id,
        };

        let stored = StoredSnapshot {
            meta: meta.clone(),
            data: data.clone(),
        };
        self.persist_snapshot(&stored).map_err(sm_write_err)?;
        *self
            .current_snapshot
            .lock()
            .expect("snapshot mutex poisoned") = Some(stored);

        tracing::debug!(snapshot_id = %meta.snapshot_id, "built state machine snapshot");
        Ok(Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        })
    }
}

impl RaftStateMachine<TypeConfig> for Arc<StateMachineStore> {
    type SnapshotBuilder = Self;

    async fn applied_state(
        &mut self,
    ) -> Result<(Option<LogId<NodeId>>, StoredMembership<NodeId, BasicNode>), StorageError<NodeId>>
    {
        let applied = self.applied();
        Ok((applied.last_applied, applied.last_membership))
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<CommandOutcome>, StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
        I::IntoIter: OptionalSend,
    {
        let mut replies = Vec::new();
        for entry in entries {
            let Entry { log_id, payload } = entry;
            let mut applied = self.applied();
            applied.last_applied = Some(log_id.clone());
            let outcome = match payload {
                EntryPayload::Blank => CommandOutcome::ok(),
                EntryPayload::Normal(ref cmd) => {
                    let outcome = self.fsm.apply(cmd);
                    if let Some(msg) = &outcome.error {
                        tracing::debug!(op = %cmd.op, error = %msg, "command rejected");
                    }
                    outcome
                }
                EntryPayload::Membership(membership) => {
                    applied.last_membership =
                        StoredMembership::new(Some(log_id.clone()), membership);
                    CommandOutcome::ok()
                }
            };
            self.set_applied(applied);
            replies.push(outcome);
        }
        Ok(replies)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        self.clone()
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<Cursor<Vec<u8>>>, StorageError<NodeId>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<NodeId, BasicNode>,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<NodeId>> {
        let data = snapshot.into_inner();
        let state: WorkshopState = serde_json::from_slice(&data).map_err(sm_read_err)?;
        self.fsm.restore(state);
        self.set_applied(Applied {
            last_applied: meta.last_log_id.clone(),
            last_membership: meta.last_membership.clone(),
        });

        let stored = StoredSnapshot {
            meta: meta.clone(),
            data,
        };
        self.persist_snapshot(&stored).map_err(sm_write_err)?;
        *self
            .current_snapshot
            .lock()
            .expect("snapshot mutex poisoned") = Some(stored);

        tracing::info!(snapshot_id = %meta.snapshot_id, "installed snapshot from leader");
        Ok(())
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<TypeConfig>>, StorageError<NodeId>> {
        let current = self
            .current_snapshot
            .lock()
            .expect("snapshot mutex poisoned")
            .clone();
        Ok(current.map(|stored| Snapshot {
            meta: stored.meta,
            snapshot: Box::new(Cursor::new(stored.data)),
        }))
    }
}
