//! Persistent raft log and stable store on redb.
//!
//! Two single-file B-tree databases per node: `raft-log.db` holds the log
//! entries and the purge watermark, `raft-stable.db` holds the vote and the
//! committed pointer. Both live under `<data_dir>/<node_id>/`.

use std::fmt::Debug;
use std::ops::RangeBounds;
use std::path::Path;
use std::sync::Arc;

use openraft::storage::{LogFlushed, LogState, RaftLogStorage};
use openraft::{AnyError, Entry, LogId, OptionalSend, RaftLogReader, StorageError, StorageIOError, Vote};
use redb::{Database, ReadableTable, TableDefinition};

use super::{NodeId, TypeConfig};

const LOG_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("raft_log");
const LOG_META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("raft_log_meta");
const STABLE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("raft_stable");

const KEY_LAST_PURGED: &str = "last_purged";
const KEY_VOTE: &str = "vote";
const KEY_COMMITTED: &str = "committed";

/// Handle to the two on-disk stores. Cheap to clone; clones share the
/// underlying databases.
#[derive(Debug, Clone)]
pub struct LogStore {
    log: Arc<Database>,
    stable: Arc<Database>,
}

impl LogStore {
    /// Open (or create) the log and stable databases, creating all tables so
    /// later read transactions never observe a missing table.
    pub fn open(log_path: &Path, stable_path: &Path) -> Result<Self, redb::Error> {
        let log = Database::create(log_path)?;
        let stable = Database::create(stable_path)?;

        let txn = log.begin_write()?;
        txn.open_table(LOG_TABLE)?;
        txn.open_table(LOG_META_TABLE)?;
        txn.commit()?;

        let txn = stable.begin_write()?;
        txn.open_table(STABLE_TABLE)?;
        txn.commit()?;

        Ok(LogStore {
            log: Arc::new(log),
            stable: Arc::new(stable),
        })
    }

    /// Committed pointer as last persisted by the consensus library. Used by
    /// the stats surface; `None` until the first commit is recorded.
    pub fn committed_index(&self) -> Option<u64> {
        self.log_committed().ok().flatten().map(|log_id| log_id.index)
    }

    fn log_committed(&self) -> Result<Option<LogId<NodeId>>, redb::Error> {
        let txn = self.stable.begin_read()?;
        let table = txn.open_table(STABLE_TABLE)?;
        let Some(guard) = table.get(KEY_COMMITTED)? else {
            return Ok(None);
        };
        // A committed pointer that fails to decode degrades to None; it is a
        // hint, not required for correctness.
        Ok(serde_json::from_slice(guard.value()).unwrap_or(None))
    }
}

fn read_logs_err(e: impl std::error::Error + 'static) -> StorageError<NodeId> {
    StorageIOError::read_logs(AnyError::new(&e)).into()
}

fn write_logs_err(e: impl std::error::Error + 'static) -> StorageError<NodeId> {
    StorageIOError::write_logs(AnyError::new(&e)).into()
}

fn read_vote_err(e: impl std::error::Error + 'static) -> StorageError<NodeId> {
    StorageIOError::read_vote(AnyError::new(&e)).into()
}

fn write_vote_err(e: impl std::error::Error + 'static) -> StorageError<NodeId> {
    StorageIOError::write_vote(AnyError::new(&e)).into()
}

impl RaftLogReader<TypeConfig> for LogStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + OptionalSend>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<NodeId>> {
        let txn = self.log.begin_read().map_err(read_logs_err)?;
        let table = txn.open_table(LOG_TABLE).map_err(read_logs_err)?;
        let mut entries = Vec::new();
        for item in table.range(range).map_err(read_logs_err)? {
            let (_, value) = item.map_err(read_logs_err)?;
            let entry: Entry<TypeConfig> =
                serde_json::from_slice(value.value()).map_err(read_logs_err)?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

impl RaftLogStorage<TypeConfig> for LogStore {
    type LogReader = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<NodeId>> {
        let txn = self.log.begin_read().map_err(read_logs_err)?;

        let last_purged: Option<LogId<NodeId>> = {
            let table = txn.open_table(LOG_META_TABLE).map_err(read_logs_err)?;
            match table.get(KEY_LAST_PURGED).map_err(read_logs_err)? {
                Some(guard) => serde_json::from_slice(guard.value()).map_err(read_logs_err)?,
                None => None,
            }
        };

        let last_log_id = {
            let table = txn.open_table(LOG_TABLE).map_err(read_logs_err)?;
            match table.last().map_err(read_logs_err)? {
                Some((_, value)) => {
                    let entry: Entry<TypeConfig> =
                        serde_json::from_slice(value.value()).map_err(read_logs_err)?;
                    Some(entry.log_id)
                }
                None => None,
            }
        };

        Ok(LogState {
            last_purged_log_id: last_purged.clone(),
            last_log_id: last_log_id.or(last_purged),
        })
    }

    async fn save_vote(&mut self, vote: &Vote<NodeId>) -> Result<(), StorageError<NodeId>> {
        let bytes = serde_json::to_vec(vote).map_err(write_vote_err)?;
        let txn = self.stable.begin_write().map_err(write_vote_err)?;
        {
            let mut table = txn.open_table(STABLE_TABLE).map_err(write_vote_err)?;
            table
                .insert(KEY_VOTE, bytes.as_slice())
                .map_err(write_vote_err)?;
        }
        txn.commit().map_err(write_vote_err)?;
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<NodeId>>, StorageError<NodeId>> {
        let txn = self.stable.begin_read().map_err(read_vote_err)?;
        let table = txn.open_table(STABLE_TABLE).map_err(read_vote_err)?;
        match table.get(KEY_VOTE).map_err(read_vote_err)? {
            Some(guard) => Ok(Some(
                serde_json::from_slice(guard.value()).map_err(read_vote_err)?,
            )),
            None => Ok(None),
        }
    }

    async fn save_committed(
        &mut self,
        committed: Option<LogId<NodeId>>,
    ) -> Result<(), StorageError<NodeId>> {
        let bytes = serde_json::to_vec(&committed).map_err(write_logs_err)?;
        let txn = self.stable.begin_write().map_err(write_logs_err)?;
        {
            let mut table = txn.open_table(STABLE_TABLE).map_err(write_logs_err)?;
            table
                .insert(KEY_COMMITTED, bytes.as_slice())
                .map_err(write_logs_err)?;
        }
        txn.commit().map_err(write_logs_err)?;
        Ok(())
    }

    async fn read_committed(&mut self) -> Result<Option<LogId<NodeId>>, StorageError<NodeId>> {
        self.log_committed().map_err(read_logs_err)
    }

    async fn append<I>(
        &mut self,
        entries: I,
        callback: LogFlushed<TypeConfig>,
    ) -> Result<(), StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
    {
        let txn = self.log.begin_write().map_err(write_logs_err)?;
        {
            let mut table = txn.open_table(LOG_TABLE).map_err(write_logs_err)?;
            for entry in entries {
                let bytes = serde_json::to_vec(&entry).map_err(write_logs_err)?;
                table
                    .insert(entry.log_id.index, bytes.as_slice())
                    .map_err(write_logs_err)?;
            }
        }
        // redb commits are durable, so the flush can be acknowledged here.
        txn.commit().map_err(write_logs_err)?;
        callback.log_io_completed(Ok(()));
        Ok(())
    }

    async fn truncate(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        let txn = self.log.begin_write().map_err(write_logs_err)?;
        {
            let mut table = txn.open_table(LOG_TABLE).map_err(write_logs_err)?;
            let doomed: Vec<u64> = {
                let mut keys = Vec::new();
                for item in table.range(log_id.index..).map_err(write_logs_err)? {
                    let (key, _) = item.map_err(write_logs_err)?;
                    keys.push(key.value());
                }
                keys
            };
            for key in doomed {
                table.remove(key).map_err(write_logs_err)?;
            }
        }
        txn.commit().map_err(write_logs_err)?;
        Ok(())
    }

    async fn purge(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        let watermark = serde_json::to_vec(&Some(log_id.clone())).map_err(write_logs_err)?;
        let txn = self.log.begin_write().map_err(write_logs_err)?;
        {
            let mut meta = txn.open_table(LOG_META_TABLE).map_err(write_logs_err)?;
            meta.insert(KEY_LAST_PURGED, watermark.as_slice())
                .map_err(write_logs_err)?;

            let mut table = txn.open_table(LOG_TABLE).map_err(write_logs_err)?;
            let doomed: Vec<u64> = {
                let mut keys = Vec::new();
                for item in table.range(..=log_id.index).map_err(write_logs_err)? {
                    let (key, _) = item.map_err(write_logs_err)?;
                    keys.push(key.value());
                }
                keys
            };
            for key in doomed {
                table.remove(key).map_err(write_logs_err)?;
            }
        }
        txn.commit().map_err(write_logs_err)?;
        Ok(())
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_both_database_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(&dir.path().join("raft-log.db"), &dir.path().join("raft-stable.db"))
            .unwrap();
        assert!(dir.path().join("raft-log.db").exists());
        assert!(dir.path().join("raft-stable.db").exists());
        assert_eq!(store.committed_index(), None);
    }

    #[tokio::test]
    async fn vote_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("raft-log.db");
        let stable_path = dir.path().join("raft-stable.db");

        let vote = Vote::new(7, "node1".to_string());
        {
            let mut store = LogStore::open(&log_path, &stable_path).unwrap();
            store.save_vote(&vote).await.unwrap();
        }
        let mut reopened = LogStore::open(&log_path, &stable_path).unwrap();
        assert_eq!(reopened.read_vote().await.unwrap(), Some(vote));
    }
}
