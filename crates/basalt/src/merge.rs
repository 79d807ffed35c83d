//! Compaction: rewrites live records into a sibling merge directory.
//!
//! A merge never mutates the live directory. Live records from sealed
//! files are appended into a transient store at `<dir>-merge` together
//! with a hint file, then a `merge-finished` marker carrying the cutoff
//! file id commits the pass. The next open installs the rewritten files:
//! it deletes every data file below the cutoff and moves the merge
//! output in. A crashed merge leaves no marker, and its directory is
//! discarded wholesale.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use basalt_io::IoKind;

use crate::data_file::{self, DataFile, MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME};
use crate::db::{Db, FLOCK_FILE_NAME};
use crate::error::{Error, Result};
use crate::index::BPTREE_INDEX_FILE_NAME;
use crate::options::IndexKind;
use crate::record::{self, LogRecord, NON_TXN_SEQ_NO, RecordKind};
use crate::util;

const MERGE_DIR_SUFFIX: &str = "-merge";
const MERGE_FINISHED_KEY: &[u8] = b"merge-finished";

impl Db {
    /// Compacts the store.
    ///
    /// Fails fast when a merge is already running, when the reclaimable
    /// fraction of the directory has not reached
    /// `data_file_merge_ratio`, or when the filesystem cannot hold a
    /// second copy of the live data. On success the rewritten files sit
    /// in `<dir>-merge` and are installed by the next open.
    pub fn merge(&self) -> Result<()> {
        if self.merging.swap(true, Ordering::SeqCst) {
            return Err(Error::MergeInProgress);
        }
        let result = self.merge_inner();
        self.merging.store(false, Ordering::SeqCst);
        result
    }

    fn merge_inner(&self) -> Result<()> {
        let (cutoff, merge_ids) = {
            let mut state = self.state.write();

            let total_size = util::dir_size(&self.opts.dir_path)?;
            let ratio = if total_size == 0 {
                0.0
            } else {
                state.reclaimable as f32 / total_size as f32
            };
            if ratio < self.opts.data_file_merge_ratio {
                return Err(Error::MergeRatioUnreached {
                    ratio,
                    threshold: self.opts.data_file_merge_ratio,
                });
            }

            let required = total_size - state.reclaimable;
            let available = util::available_disk_size(&self.opts.dir_path)?;
            if required >= available {
                return Err(Error::MergeNoSpace {
                    required,
                    available,
                });
            }

            // Seal the active file; everything below the new active id
            // participates in this merge.
            state.active.sync()?;
            let sealed_id = state.active.file_id();
            let new_active = DataFile::open(&self.opts.dir_path, sealed_id + 1, IoKind::File)?;
            let sealed = std::mem::replace(&mut state.active, new_active);
            state.older.insert(sealed_id, sealed);

            let cutoff = state.active.file_id();
            let mut ids: Vec<u32> = state
                .older
                .keys()
                .copied()
                .filter(|id| *id < cutoff)
                .collect();
            ids.sort_unstable();
            (cutoff, ids)
        };

        tracing::info!(cutoff, files = merge_ids.len(), "merge started");
        self.rewrite_live_records(cutoff, &merge_ids)
    }

    /// Scans each sealed file through a fresh read-only handle (sealed
    /// files are immutable, so the view matches the live handles) and
    /// re-appends every record the index still points at.
    fn rewrite_live_records(&self, cutoff: u32, merge_ids: &[u32]) -> Result<()> {
        let merge_dir = merge_path(&self.opts.dir_path);
        if merge_dir.exists() {
            fs::remove_dir_all(&merge_dir)?;
        }
        fs::create_dir_all(&merge_dir)?;

        let mut merge_opts = self.opts.clone();
        merge_opts.dir_path = merge_dir.clone();
        merge_opts.sync_writes = false;
        merge_opts.mmap_at_startup = false;
        // The transient store always indexes in memory, so the merge
        // directory never contains an on-disk index to install by
        // accident.
        merge_opts.index_kind = IndexKind::BTree;
        let merge_db = Db::open(merge_opts)?;
        let mut hint_file = DataFile::hint_file(&merge_dir)?;

        let mut rewritten = 0usize;
        for &file_id in merge_ids {
            let file = DataFile::open(&self.opts.dir_path, file_id, IoKind::File)?;
            let mut offset = 0u64;
            while let Some((record, size)) = file.read_record(offset)? {
                let (_, real_key) = record::parse_seq_no_key(&record.key)?;
                let live = self
                    .index
                    .get(&real_key)
                    .is_some_and(|pos| pos.file_id == file_id && pos.offset == offset);
                if live {
                    let clean = LogRecord {
                        key: record::key_with_seq_no(&real_key, NON_TXN_SEQ_NO),
                        value: record.value,
                        kind: RecordKind::Normal,
                    };
                    let new_pos = merge_db.append_record(&clean)?;
                    hint_file.write_hint(&real_key, new_pos)?;
                    rewritten += 1;
                }
                offset += size;
            }
        }

        hint_file.sync()?;
        merge_db.sync()?;
        merge_db.close()?;

        let mut finished = DataFile::merge_finished_file(&merge_dir)?;
        let marker = LogRecord {
            key: MERGE_FINISHED_KEY.to_vec(),
            value: cutoff.to_string().into_bytes(),
            kind: RecordKind::Normal,
        };
        finished.append(&marker.encode())?;
        finished.sync()?;

        tracing::info!(cutoff, rewritten, "merge finished");
        Ok(())
    }
}

/// Installs a completed merge into `dir`, if one is waiting.
///
/// Without a `merge-finished` marker the merge directory is a crash
/// leftover and is discarded. Otherwise every data file below the cutoff
/// is deleted and the merge output moved in. Returns whether an install
/// happened.
pub(crate) fn install_merge_dir(dir: &Path) -> Result<bool> {
    let merge_dir = merge_path(dir);
    if !merge_dir.is_dir() {
        return Ok(false);
    }

    if !merge_dir.join(MERGE_FINISHED_FILE_NAME).is_file() {
        tracing::warn!(path = %merge_dir.display(), "discarding unfinished merge directory");
        fs::remove_dir_all(&merge_dir)?;
        return Ok(false);
    }

    let cutoff = read_cutoff(&merge_dir)?;
    for file_id in 0..cutoff {
        let path = data_file::data_file_path(dir, file_id);
        if path.is_file() {
            fs::remove_file(path)?;
        }
    }
    for entry in fs::read_dir(&merge_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == SEQ_NO_FILE_NAME || name == FLOCK_FILE_NAME || name == BPTREE_INDEX_FILE_NAME {
            continue;
        }
        fs::rename(entry.path(), dir.join(&name))?;
    }
    fs::remove_dir_all(&merge_dir)?;

    tracing::info!(path = %dir.display(), cutoff, "installed merge results");
    Ok(true)
}

/// The cutoff recorded by the last installed merge, if any.
pub(crate) fn merge_cutoff(dir: &Path) -> Result<Option<u32>> {
    if !dir.join(MERGE_FINISHED_FILE_NAME).is_file() {
        return Ok(None);
    }
    Ok(Some(read_cutoff(dir)?))
}

/// Reads the smallest file id that did not participate in the merge.
fn read_cutoff(dir: &Path) -> Result<u32> {
    let file = DataFile::merge_finished_file(dir)?;
    let Some((record, _)) = file.read_record(0)? else {
        return Err(Error::DirCorrupted {
            reason: "merge-finished file holds no record".to_string(),
        });
    };
    String::from_utf8(record.value)
        .ok()
        .and_then(|text| text.parse::<u32>().ok())
        .ok_or_else(|| Error::DirCorrupted {
            reason: "unparseable merge cutoff".to_string(),
        })
}

/// `<dir>-merge`, sibling of the data directory.
fn merge_path(dir: &Path) -> PathBuf {
    let mut name = dir.file_name().map_or_else(Default::default, ToOwned::to_owned);
    name.push(MERGE_DIR_SUFFIX);
    dir.parent().unwrap_or_else(|| Path::new("")).join(name)
}
