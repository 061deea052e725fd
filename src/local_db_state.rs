//! LMDB-backed local persistent store.
//!
//! One environment directory holds three named databases:
//!
//! - `collections`: one JSON array per [`Table`], overwritten wholesale
//! - `mutation_queue`: [`QueuedMutation`] values keyed by big-endian sequence
//!   number, so cursor order is enqueue order
//! - `meta`: the queue sequence counter and the active-visit marker
//!
//! Every operation is a single LMDB transaction. Readers therefore see a
//! collection either entirely before or entirely after an overwrite, and a
//! requeue (delete original + append copy) is never half applied.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use lmdb::{Cursor, Database, DatabaseFlags, Environment, RwTransaction, Transaction, WriteFlags};
use lmdb_sys::{MDB_NEXT, MDB_SET_RANGE};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::{AppError, AppResult};
use crate::local_db_model::{ActiveVisit, Record, Table};
use crate::mutation::{PendingWrite, QueuedMutation};

const COLLECTIONS_DB: &str = "collections";
const QUEUE_DB: &str = "mutation_queue";
const META_DB: &str = "meta";

const QUEUE_SEQ_KEY: &[u8] = b"queue_seq";
const ACTIVE_VISIT_KEY: &[u8] = b"active_visit";

const DEFAULT_MAP_SIZE: usize = 64 * 1024 * 1024;

/// Async storage contract the sync engine runs against.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Replaces the whole cached collection.
    async fn set_collection(&self, table: Table, records: &[Record]) -> AppResult<()>;

    /// Full cached collection, empty if never written.
    async fn get_collection(&self, table: Table) -> AppResult<Vec<Record>>;

    /// Stores the marker, or deletes it when given `None`.
    async fn set_active_visit(&self, visit: Option<&ActiveVisit>) -> AppResult<()>;

    async fn get_active_visit(&self) -> AppResult<Option<ActiveVisit>>;

    /// Appends a write at the tail of the queue.
    async fn enqueue(&self, write: PendingWrite) -> AppResult<QueuedMutation>;

    /// Oldest entry not yet marked synced, looking only past `after` when
    /// given a sequence number.
    async fn next_pending(&self, after: Option<u64>) -> AppResult<Option<QueuedMutation>>;

    /// Every queued entry in FIFO order, synced ones included.
    async fn queued(&self) -> AppResult<Vec<QueuedMutation>>;

    /// Returns `false` if the entry is no longer queued.
    async fn mark_synced(&self, entry: &QueuedMutation) -> AppResult<bool>;

    /// Drops `entry` and appends a fresh copy (new id, seq and timestamp).
    async fn requeue(&self, entry: &QueuedMutation) -> AppResult<QueuedMutation>;

    /// Removes all synced entries, returning how many were removed.
    async fn purge_synced(&self) -> AppResult<usize>;
}

pub struct LocalDbState {
    env: Environment,
    collections: Database,
    queue: Database,
    meta: Database,
    path: PathBuf,
}

impl LocalDbState {
    /// Opens (or creates) the environment at `<name>.lmdb`.
    pub fn init(name: impl AsRef<Path>) -> AppResult<Self> {
        Self::init_with_map_size(name, DEFAULT_MAP_SIZE)
    }

    pub fn open(config: &SyncConfig) -> AppResult<Self> {
        Self::init_with_map_size(&config.db_path, config.map_size)
    }

    pub fn init_with_map_size(name: impl AsRef<Path>, map_size: usize) -> AppResult<Self> {
        let path = lmdb_dir(name.as_ref());
        fs::create_dir_all(&path)?;

        let env = Environment::new()
            .set_max_dbs(3)
            .set_map_size(map_size)
            .open(&path)?;

        let collections = env.create_db(Some(COLLECTIONS_DB), DatabaseFlags::empty())?;
        let queue = env.create_db(Some(QUEUE_DB), DatabaseFlags::empty())?;
        let meta = env.create_db(Some(META_DB), DatabaseFlags::empty())?;

        info!("Local store opened at {}", path.display());

        Ok(Self {
            env,
            collections,
            queue,
            meta,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_collection(&self, table: Table, records: &[Record]) -> AppResult<()> {
        let json = serde_json::to_vec(records)?;
        let mut txn = self.env.begin_rw_txn()?;
        txn.put(self.collections, &table.as_str(), &json, WriteFlags::empty())?;
        txn.commit()?;
        debug!("Collection '{}' overwritten with {} records", table, records.len());
        Ok(())
    }

    pub fn get_collection(&self, table: Table) -> AppResult<Vec<Record>> {
        let txn = self.env.begin_ro_txn()?;
        match txn.get(self.collections, &table.as_str()) {
            Ok(bytes) => Ok(serde_json::from_slice(bytes)?),
            Err(lmdb::Error::NotFound) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_active_visit(&self, visit: Option<&ActiveVisit>) -> AppResult<()> {
        let mut txn = self.env.begin_rw_txn()?;
        match visit {
            Some(visit) => {
                let json = serde_json::to_vec(visit)?;
                txn.put(self.meta, &ACTIVE_VISIT_KEY, &json, WriteFlags::empty())?;
            }
            None => match txn.del(self.meta, &ACTIVE_VISIT_KEY, None) {
                Ok(()) | Err(lmdb::Error::NotFound) => {}
                Err(e) => return Err(e.into()),
            },
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_active_visit(&self) -> AppResult<Option<ActiveVisit>> {
        let txn = self.env.begin_ro_txn()?;
        match txn.get(self.meta, &ACTIVE_VISIT_KEY) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn enqueue(&self, write: PendingWrite) -> AppResult<QueuedMutation> {
        let mut txn = self.env.begin_rw_txn()?;
        let entry = self.append(&mut txn, write)?;
        txn.commit()?;
        debug!("Queued {} on '{}' as #{}", entry.mutation.kind(), entry.table, entry.seq);
        Ok(entry)
    }

    pub fn queued(&self) -> AppResult<Vec<QueuedMutation>> {
        let txn = self.env.begin_ro_txn()?;
        let mut entries = Vec::new();
        {
            let mut cursor = txn.open_ro_cursor(self.queue)?;
            for (_key, value) in cursor.iter() {
                entries.push(serde_json::from_slice::<QueuedMutation>(value)?);
            }
        }
        Ok(entries)
    }

    pub fn next_pending(&self, after: Option<u64>) -> AppResult<Option<QueuedMutation>> {
        let start = match after {
            Some(seq) => match seq.checked_add(1) {
                Some(next) => next,
                None => return Ok(None),
            },
            None => 0,
        }
        .to_be_bytes();

        let txn = self.env.begin_ro_txn()?;
        let cursor = txn.open_ro_cursor(self.queue)?;
        let mut found = cursor.get(Some(&start[..]), None, MDB_SET_RANGE);
        loop {
            let value = match found {
                Ok((_, value)) => value,
                Err(lmdb::Error::NotFound) => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            let entry: QueuedMutation = serde_json::from_slice(value)?;
            if !entry.synced {
                return Ok(Some(entry));
            }
            found = cursor.get(None, None, MDB_NEXT);
        }
    }

    pub fn pending_count(&self) -> AppResult<usize> {
        Ok(self.queued()?.iter().filter(|entry| !entry.synced).count())
    }

    pub fn mark_synced(&self, entry: &QueuedMutation) -> AppResult<bool> {
        let key = entry.seq.to_be_bytes();
        let mut txn = self.env.begin_rw_txn()?;
        let mut stored: QueuedMutation = match txn.get(self.queue, &key) {
            Ok(bytes) => serde_json::from_slice(bytes)?,
            Err(lmdb::Error::NotFound) => {
                warn!("Entry #{} vanished before it could be marked synced", entry.seq);
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        stored.synced = true;
        let json = serde_json::to_vec(&stored)?;
        txn.put(self.queue, &key, &json, WriteFlags::empty())?;
        txn.commit()?;
        Ok(true)
    }

    pub fn requeue(&self, entry: &QueuedMutation) -> AppResult<QueuedMutation> {
        let mut txn = self.env.begin_rw_txn()?;
        match txn.del(self.queue, &entry.seq.to_be_bytes(), None) {
            Ok(()) | Err(lmdb::Error::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        let fresh = self.append(&mut txn, PendingWrite::from(entry))?;
        txn.commit()?;
        info!("Re-queued {} on '{}': #{} -> #{}", entry.mutation.kind(), entry.table, entry.seq, fresh.seq);
        Ok(fresh)
    }

    pub fn purge_synced(&self) -> AppResult<usize> {
        let mut txn = self.env.begin_rw_txn()?;
        let mut synced_keys = Vec::new();
        {
            let mut cursor = txn.open_ro_cursor(self.queue)?;
            for (key, value) in cursor.iter() {
                let entry: QueuedMutation = serde_json::from_slice(value)?;
                if entry.synced {
                    synced_keys.push(key.to_vec());
                }
            }
        }
        for key in &synced_keys {
            txn.del(self.queue, key, None)?;
        }
        txn.commit()?;
        Ok(synced_keys.len())
    }

    /// Empties every collection, the queue and the marker. The sequence
    /// counter is kept so positions never repeat.
    pub fn clear_all_records(&self) -> AppResult<()> {
        let mut txn = self.env.begin_rw_txn()?;
        txn.clear_db(self.collections)?;
        txn.clear_db(self.queue)?;
        match txn.del(self.meta, &ACTIVE_VISIT_KEY, None) {
            Ok(()) | Err(lmdb::Error::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        txn.commit()?;
        info!("Local store cleared");
        Ok(())
    }

    /// Forces buffered writes to disk. The environment itself closes on drop.
    pub fn flush(&self) -> AppResult<()> {
        self.env.sync(true)?;
        Ok(())
    }

    fn append(&self, txn: &mut RwTransaction<'_>, write: PendingWrite) -> AppResult<QueuedMutation> {
        let current = match txn.get(self.meta, &QUEUE_SEQ_KEY) {
            Ok(bytes) => decode_seq(bytes)?,
            Err(lmdb::Error::NotFound) => 0,
            Err(e) => return Err(e.into()),
        };
        let seq = current + 1;
        txn.put(self.meta, &QUEUE_SEQ_KEY, &seq.to_be_bytes(), WriteFlags::empty())?;

        let entry = QueuedMutation {
            id: Uuid::new_v4(),
            seq,
            table: write.table,
            mutation: write.mutation,
            idempotency_key: write.idempotency_key,
            enqueued_at: Utc::now(),
            synced: false,
        };
        let json = serde_json::to_vec(&entry)?;
        txn.put(self.queue, &seq.to_be_bytes(), &json, WriteFlags::empty())?;
        Ok(entry)
    }
}

fn lmdb_dir(name: &Path) -> PathBuf {
    let mut dir = name.as_os_str().to_owned();
    dir.push(".lmdb");
    PathBuf::from(dir)
}

fn decode_seq(bytes: &[u8]) -> AppResult<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| AppError::Storage(format!("Corrupt queue sequence ({} bytes)", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

#[async_trait]
impl LocalStore for LocalDbState {
    async fn set_collection(&self, table: Table, records: &[Record]) -> AppResult<()> {
        LocalDbState::set_collection(self, table, records)
    }

    async fn get_collection(&self, table: Table) -> AppResult<Vec<Record>> {
        LocalDbState::get_collection(self, table)
    }

    async fn set_active_visit(&self, visit: Option<&ActiveVisit>) -> AppResult<()> {
        LocalDbState::set_active_visit(self, visit)
    }

    async fn get_active_visit(&self) -> AppResult<Option<ActiveVisit>> {
        LocalDbState::get_active_visit(self)
    }

    async fn enqueue(&self, write: PendingWrite) -> AppResult<QueuedMutation> {
        LocalDbState::enqueue(self, write)
    }

    async fn next_pending(&self, after: Option<u64>) -> AppResult<Option<QueuedMutation>> {
        LocalDbState::next_pending(self, after)
    }

    async fn queued(&self) -> AppResult<Vec<QueuedMutation>> {
        LocalDbState::queued(self)
    }

    async fn mark_synced(&self, entry: &QueuedMutation) -> AppResult<bool> {
        LocalDbState::mark_synced(self, entry)
    }

    async fn requeue(&self, entry: &QueuedMutation) -> AppResult<QueuedMutation> {
        LocalDbState::requeue(self, entry)
    }

    async fn purge_synced(&self) -> AppResult<usize> {
        LocalDbState::purge_synced(self)
    }
}
