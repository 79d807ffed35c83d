//! The storage engine.
//!
//! [`Db`] owns the active (writable) data file, the sealed read-only
//! files, the in-memory index, the directory lock, and the transaction
//! sequence counter. Writers serialize on the engine's write lock, which
//! covers the append, the index update, and the reclaim accounting;
//! readers share the read side for positioned reads.
//!
//! # Invariants
//!
//! - Every index entry points at a CRC-valid Normal record on disk
//! - File ids strictly increase; the active file has the maximum id and
//!   sealed files are never written again
//! - Batch mutations reach the index only after their commit record is
//!   durably appended; recovery mirrors the same rule
//! - The reclaim counter holds the byte count of records superseded
//!   (overwritten or tombstoned) since open

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use basalt_io::IoKind;
use bytes::Bytes;
use fs4::FileExt;
use parking_lot::RwLock;

use crate::data_file::{
    DATA_FILE_SUFFIX, DataFile, HINT_FILE_NAME, SEQ_NO_FILE_NAME,
};
use crate::error::{Error, Result};
use crate::index::{BPTREE_INDEX_FILE_NAME, Indexer, new_indexer};
use crate::merge;
use crate::options::{IndexKind, Options};
use crate::record::{self, LogRecord, NON_TXN_SEQ_NO, Position, RecordKind};
use crate::util;

pub(crate) const FLOCK_FILE_NAME: &str = "flock";
const SEQ_NO_KEY: &[u8] = b"seq-no";

/// Point-in-time statistics returned by [`Db::stat`].
#[derive(Debug, Clone)]
pub struct Stat {
    /// Number of live keys in the index.
    pub key_count: usize,
    /// Number of data files, active file included.
    pub data_file_count: usize,
    /// Bytes owned by superseded records, reclaimable by a merge.
    pub reclaimable_bytes: u64,
    /// Total size of the database directory on disk.
    pub disk_size: u64,
}

/// A Bitcask-model store: append-only log plus in-memory index.
///
/// All operations take `&self`; the engine is safe to share across
/// threads. Dropping the handle closes the store.
pub struct Db {
    pub(crate) opts: Options,
    pub(crate) state: RwLock<EngineState>,
    pub(crate) index: Box<dyn Indexer>,
    lock_file: File,
    /// Highest transaction sequence number ever observed or allocated.
    pub(crate) seq_no: AtomicU64,
    pub(crate) merging: AtomicBool,
    seq_file_exists: bool,
    is_initial: bool,
    closed: AtomicBool,
}

/// Mutable engine state guarded by the engine lock.
pub(crate) struct EngineState {
    pub(crate) active: DataFile,
    pub(crate) older: HashMap<u32, DataFile>,
    bytes_since_sync: u64,
    pub(crate) reclaimable: u64,
}

impl Db {
    /// Opens a store, creating the directory if needed, and rebuilds the
    /// in-memory index from the hint file and the log.
    pub fn open(opts: Options) -> Result<Db> {
        opts.validate()?;
        let dir = opts.dir_path.clone();
        fs::create_dir_all(&dir)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(dir.join(FLOCK_FILE_NAME))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| Error::DirInUse)?;

        let had_data = !enumerate_data_files(&dir)?.is_empty();
        let installed = merge::install_merge_dir(&dir)?;

        let file_ids = enumerate_data_files(&dir)?;
        let startup_io = if opts.mmap_at_startup {
            IoKind::Mmap
        } else {
            IoKind::File
        };

        let mut older = HashMap::new();
        let mut active = None;
        for (i, &id) in file_ids.iter().enumerate() {
            let file = DataFile::open(&dir, id, startup_io)?;
            if i == file_ids.len() - 1 {
                active = Some(file);
            } else {
                older.insert(id, file);
            }
        }
        let mut active = match active {
            Some(file) => file,
            None => DataFile::open(&dir, 0, IoKind::File)?,
        };

        // A freshly installed merge leaves a persistent index stale:
        // entries still name the deleted pre-merge files. Discard it and
        // rebuild through the hint-file + scan path for this open.
        let rebuild_persistent = installed && opts.index_kind == IndexKind::BPlusTree;
        if rebuild_persistent {
            let stale = dir.join(BPTREE_INDEX_FILE_NAME);
            if stale.is_file() {
                fs::remove_file(&stale)?;
            }
            tracing::warn!(
                path = %dir.display(),
                "merge installed; rebuilding persistent index from hint file and log"
            );
        }
        let index = new_indexer(opts.index_kind, &dir)?;

        let mut max_seq_no = NON_TXN_SEQ_NO;
        let mut reclaimable = 0;
        if opts.index_kind != IndexKind::BPlusTree || rebuild_persistent {
            load_index_from_hint_file(index.as_ref(), &dir)?;
            let cutoff = merge::merge_cutoff(&dir)?;
            (max_seq_no, reclaimable) =
                load_index_from_data_files(index.as_ref(), &mut active, &older, &file_ids, cutoff)?;
        } else {
            active.set_write_offset(active.size()?);
        }

        let mut seq_file_exists = false;
        if let Some(persisted) = read_seq_no_file(&dir)? {
            max_seq_no = max_seq_no.max(persisted);
            seq_file_exists = true;
        }

        if opts.mmap_at_startup {
            active.set_io_kind(IoKind::File)?;
            for file in older.values_mut() {
                file.set_io_kind(IoKind::File)?;
            }
        }

        let data_file_count = older.len() + 1;
        let db = Db {
            opts,
            state: RwLock::new(EngineState {
                active,
                older,
                bytes_since_sync: 0,
                reclaimable,
            }),
            index,
            lock_file,
            seq_no: AtomicU64::new(max_seq_no),
            merging: AtomicBool::new(false),
            seq_file_exists,
            is_initial: !had_data,
            closed: AtomicBool::new(false),
        };
        tracing::info!(
            path = %db.opts.dir_path.display(),
            data_files = data_file_count,
            keys = db.index.len(),
            seq_no = max_seq_no,
            "opened store"
        );
        Ok(db)
    }

    /// Stores a key/value pair. The key must be non-empty.
    pub fn put(&self, key: Bytes, value: Bytes) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyEmpty);
        }

        let record = LogRecord {
            key: record::key_with_seq_no(&key, NON_TXN_SEQ_NO),
            value: value.to_vec(),
            kind: RecordKind::Normal,
        };

        let mut state = self.state.write();
        let pos = self.append_record_locked(&mut state, &record)?;
        if let Some(old) = self.index.put(key.to_vec(), pos) {
            state.reclaimable += u64::from(old.size);
        }
        Ok(())
    }

    /// Removes a key. A missing key is a no-op.
    pub fn delete(&self, key: Bytes) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyEmpty);
        }
        if self.index.get(&key).is_none() {
            return Ok(());
        }

        let record = LogRecord {
            key: record::key_with_seq_no(&key, NON_TXN_SEQ_NO),
            value: Vec::new(),
            kind: RecordKind::Tombstone,
        };

        let mut state = self.state.write();
        let pos = self.append_record_locked(&mut state, &record)?;
        // The tombstone itself is garbage the moment it lands
        state.reclaimable += u64::from(pos.size);
        match self.index.delete(&key) {
            Some(old) => state.reclaimable += u64::from(old.size),
            None => return Err(Error::IndexUpdateFailed),
        }
        Ok(())
    }

    /// Returns the value stored for `key`.
    pub fn get(&self, key: Bytes) -> Result<Bytes> {
        if key.is_empty() {
            return Err(Error::KeyEmpty);
        }
        let Some(pos) = self.index.get(&key) else {
            return Err(Error::KeyNotFound);
        };
        let state = self.state.read();
        self.read_value_at(&state, pos)
    }

    /// Fsyncs the active data file.
    pub fn sync(&self) -> Result<()> {
        self.state.read().active.sync()
    }

    /// Point-in-time statistics.
    pub fn stat(&self) -> Result<Stat> {
        let state = self.state.read();
        Ok(Stat {
            key_count: self.index.len(),
            data_file_count: state.older.len() + 1,
            reclaimable_bytes: state.reclaimable,
            disk_size: util::dir_size(&self.opts.dir_path)?,
        })
    }

    /// Copies the whole database directory (minus the lock file) into
    /// `dest`.
    pub fn backup(&self, dest: impl AsRef<Path>) -> Result<()> {
        let _state = self.state.read();
        util::copy_dir(&self.opts.dir_path, dest.as_ref(), &[FLOCK_FILE_NAME])
    }

    /// Closes the store: persists the sequence counter when the index is
    /// the on-disk B+tree, syncs the active file, and releases the
    /// directory lock.
    ///
    /// # Panics
    ///
    /// Panics if the directory lock cannot be released; the process
    /// cannot safely continue sharing the directory.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // The lock release and index close run no matter how the flush
        // went; the directory must not stay locked behind a failed sync.
        let flush_result = self.flush_on_close();
        let index_result = self.index.close();
        if let Err(error) = self.lock_file.unlock() {
            panic!("failed to release directory lock: {error}");
        }
        tracing::info!(path = %self.opts.dir_path.display(), "closed store");
        flush_result.and(index_result)
    }

    fn flush_on_close(&self) -> Result<()> {
        let state = self.state.write();
        if self.opts.index_kind == IndexKind::BPlusTree {
            let mut seq_no_file = DataFile::seq_no_file(&self.opts.dir_path)?;
            let record = LogRecord {
                key: SEQ_NO_KEY.to_vec(),
                value: self.seq_no.load(Ordering::SeqCst).to_string().into_bytes(),
                kind: RecordKind::Normal,
            };
            seq_no_file.append(&record.encode())?;
            seq_no_file.sync()?;
        }
        state.active.sync()
    }

    /// Whether this open created the store (no data files existed).
    pub(crate) fn is_initial(&self) -> bool {
        self.is_initial
    }

    pub(crate) fn seq_file_exists(&self) -> bool {
        self.seq_file_exists
    }

    /// Appends a record under a freshly taken engine lock. Used by the
    /// merge rewriter, which owns the transient engine exclusively.
    pub(crate) fn append_record(&self, record: &LogRecord) -> Result<Position> {
        let mut state = self.state.write();
        self.append_record_locked(&mut state, record)
    }

    /// Appends a record while the engine lock is held, rolling the
    /// active file over when it would exceed `data_file_size`.
    pub(crate) fn append_record_locked(
        &self,
        state: &mut EngineState,
        record: &LogRecord,
    ) -> Result<Position> {
        let encoded = record.encode();
        let size = encoded.len() as u64;

        if state.active.write_offset() + size > self.opts.data_file_size {
            state.active.sync()?;
            let sealed_id = state.active.file_id();
            let new_active = DataFile::open(&self.opts.dir_path, sealed_id + 1, IoKind::File)?;
            let sealed = std::mem::replace(&mut state.active, new_active);
            state.older.insert(sealed_id, sealed);
            tracing::info!(
                sealed_file = sealed_id,
                active_file = sealed_id + 1,
                "rolled over data file"
            );
        }

        let offset = state.active.write_offset();
        state.active.append(&encoded)?;

        state.bytes_since_sync += size;
        let need_sync = self.opts.sync_writes
            || (self.opts.bytes_per_sync > 0
                && state.bytes_since_sync >= u64::from(self.opts.bytes_per_sync));
        if need_sync {
            state.active.sync()?;
            state.bytes_since_sync = 0;
        }

        Ok(Position {
            file_id: state.active.file_id(),
            offset,
            size: size as u32,
        })
    }

    /// Reads the record at `pos` and returns its value.
    pub(crate) fn read_value_at(&self, state: &EngineState, pos: Position) -> Result<Bytes> {
        let file = if state.active.file_id() == pos.file_id {
            &state.active
        } else {
            state
                .older
                .get(&pos.file_id)
                .ok_or(Error::DataFileNotFound {
                    file_id: pos.file_id,
                })?
        };

        let Some((record, _)) = file.read_record(pos.offset)? else {
            return Err(Error::CorruptRecord {
                reason: format!(
                    "index points past the end of data file {:09} (offset {})",
                    pos.file_id, pos.offset
                ),
            });
        };
        if record.kind == RecordKind::Tombstone {
            return Err(Error::KeyNotFound);
        }
        Ok(Bytes::from(record.value))
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            tracing::error!(error = %error, "failed to close store cleanly");
        }
    }
}

/// Numeric ids of all `%09d.data` files in `dir`, ascending.
fn enumerate_data_files(dir: &Path) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(stem) = name.strip_suffix(DATA_FILE_SUFFIX) {
            let id = stem.parse::<u32>().map_err(|_| Error::DirCorrupted {
                reason: format!("unparseable data file name {name}"),
            })?;
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Loads index entries from the hint file, if one exists.
fn load_index_from_hint_file(index: &dyn Indexer, dir: &Path) -> Result<()> {
    if !dir.join(HINT_FILE_NAME).is_file() {
        return Ok(());
    }
    let hint = DataFile::hint_file(dir)?;
    let mut offset = 0;
    let mut loaded = 0usize;
    while let Some((record, size)) = hint.read_record(offset)? {
        index.put(record.key, record::decode_position(&record.value)?);
        offset += size;
        loaded += 1;
    }
    tracing::debug!(entries = loaded, "loaded index entries from hint file");
    Ok(())
}

struct PendingTxn {
    record: LogRecord,
    pos: Position,
}

/// Scans the data files in id order, replaying records into the index.
///
/// Files below the merge cutoff are covered by the hint file and
/// skipped. Transactional records are buffered under their sequence
/// number and applied only when the matching commit marker is read;
/// whatever is still buffered at the end of the scan is discarded.
///
/// Returns the highest sequence number seen and the reclaimable bytes
/// discovered.
fn load_index_from_data_files(
    index: &dyn Indexer,
    active: &mut DataFile,
    older: &HashMap<u32, DataFile>,
    file_ids: &[u32],
    cutoff: Option<u32>,
) -> Result<(u64, u64)> {
    let mut max_seq_no = NON_TXN_SEQ_NO;
    let mut reclaimable = 0u64;
    if file_ids.is_empty() {
        return Ok((max_seq_no, reclaimable));
    }

    let mut pending: HashMap<u64, Vec<PendingTxn>> = HashMap::new();
    let mut active_offset = 0;

    for (i, &file_id) in file_ids.iter().enumerate() {
        if cutoff.is_some_and(|c| file_id < c) {
            continue;
        }
        let file: &DataFile = if file_id == active.file_id() {
            active
        } else {
            older.get(&file_id).ok_or(Error::DataFileNotFound { file_id })?
        };

        let mut offset = 0u64;
        while let Some((record, size)) = file.read_record(offset)? {
            let pos = Position {
                file_id,
                offset,
                size: size as u32,
            };
            let (seq_no, real_key) = record::parse_seq_no_key(&record.key)?;

            if record.kind == RecordKind::TxnCommit {
                if let Some(records) = pending.remove(&seq_no) {
                    for txn in records {
                        reclaimable +=
                            apply_to_index(index, txn.record.kind, txn.record.key, txn.pos);
                    }
                }
            } else if seq_no == NON_TXN_SEQ_NO {
                reclaimable += apply_to_index(index, record.kind, real_key, pos);
            } else {
                pending.entry(seq_no).or_default().push(PendingTxn {
                    record: LogRecord {
                        key: real_key,
                        value: record.value,
                        kind: record.kind,
                    },
                    pos,
                });
            }

            max_seq_no = max_seq_no.max(seq_no);
            offset += size;
        }

        if i == file_ids.len() - 1 {
            active_offset = offset;
        }
    }

    if !pending.is_empty() {
        tracing::warn!(
            transactions = pending.len(),
            "discarding uncommitted transactions found during recovery"
        );
    }
    active.set_write_offset(active_offset);
    Ok((max_seq_no, reclaimable))
}

/// Replays one committed record into the index, returning the bytes it
/// made reclaimable.
fn apply_to_index(index: &dyn Indexer, kind: RecordKind, key: Vec<u8>, pos: Position) -> u64 {
    match kind {
        RecordKind::Normal => index.put(key, pos).map_or(0, |old| u64::from(old.size)),
        RecordKind::Tombstone => {
            let mut reclaimed = u64::from(pos.size);
            if let Some(old) = index.delete(&key) {
                reclaimed += u64::from(old.size);
            }
            reclaimed
        }
        RecordKind::TxnCommit => 0,
    }
}

/// Reads and deletes the persisted sequence counter, if present.
fn read_seq_no_file(dir: &Path) -> Result<Option<u64>> {
    let path = dir.join(SEQ_NO_FILE_NAME);
    if !path.is_file() {
        return Ok(None);
    }
    let file = DataFile::seq_no_file(dir)?;
    let Some((record, _)) = file.read_record(0)? else {
        return Err(Error::DirCorrupted {
            reason: "seq-no file holds no record".to_string(),
        });
    };
    let seq_no = String::from_utf8(record.value)
        .ok()
        .and_then(|text| text.parse::<u64>().ok())
        .ok_or_else(|| Error::DirCorrupted {
            reason: "unparseable seq-no value".to_string(),
        })?;
    fs::remove_file(path)?;
    Ok(Some(seq_no))
}
