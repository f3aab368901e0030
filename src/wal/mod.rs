//! Write-ahead log for index mutations (`spec.md` §4.4).
//!
//! An index mutation touches two files at once (the routed data bucket and
//! the parity bucket) and must survive a crash between the two writes.
//! Before touching either bucket, the intended action is recorded to a WAL
//! file in the `READY` state; once both bucket writes have landed the
//! record flips to `COMMIT`; once the WAL file itself is no longer needed it
//! is removed. On startup, `replay_all` finds every leftover WAL file and
//! finishes or discards it:
//!
//! ```text
//! READY   -> action not known to be applied; replay must redo it
//! COMMIT  -> action already applied; replay only needs to remove the file
//! absent  -> nothing to do
//! ```
//!
//! One file per user, named after that user's bucket-0 path suffixed
//! `_WAL` (`storage::Layout::wal_path_for`), holding exactly one pending
//! record at a time — a user has at most one in-flight mutation because
//! `IndexStore` serializes all mutations for a user behind its per-user
//! lock.

use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{FoxyError, Result};
use crate::hash::Digest;
use crate::index::IndexStore;
use crate::storage::{self, Layout};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WalState {
    Ready,
    Commit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalOp {
    Insert { size: u64, digest: Digest },
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalAction {
    pub user: String,
    pub filename: String,
    pub op: WalOp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WalRecord {
    state: WalState,
    action: WalAction,
}

fn wal_path(layout: &Layout, user: &str) -> PathBuf {
    Layout::wal_path_for(&layout.index_bucket_path(0, user))
}

/// Write `record` to `path` and fsync before returning, so the state
/// transition (`READY` or `COMMIT`) is durable even if the process crashes
/// immediately after this call (`spec.md` §4.4, §2's "`fsync` equivalent").
fn write_record(path: &PathBuf, record: &WalRecord) -> Result<()> {
    let bytes = serde_json::to_vec(record)
        .map_err(|e| FoxyError::input(format!("failed to serialize WAL record: {e}")))?;
    let mut file = File::create(path).map_err(|e| FoxyError::io(path.clone(), e))?;
    file.write_all(&bytes).map_err(|e| FoxyError::io(path.clone(), e))?;
    file.sync_all().map_err(|e| FoxyError::io(path.clone(), e))
}

/// Record `action` as `READY` before touching any bucket file.
pub fn begin(layout: &Layout, action: &WalAction) -> Result<()> {
    let path = wal_path(layout, &action.user);
    write_record(&path, &WalRecord { state: WalState::Ready, action: action.clone() })
}

/// Flip the record to `COMMIT` once every bucket write for `action` has
/// landed.
pub fn commit(layout: &Layout, action: &WalAction) -> Result<()> {
    let path = wal_path(layout, &action.user);
    write_record(&path, &WalRecord { state: WalState::Commit, action: action.clone() })
}

/// Remove the WAL record entirely; the action is fully durable and no
/// longer needs tracking.
pub fn clear(layout: &Layout, user: &str) -> Result<()> {
    storage::remove_if_exists(&wal_path(layout, user))
}

fn apply(index: &IndexStore, action: &WalAction) -> Result<()> {
    match &action.op {
        WalOp::Insert { size, digest } => {
            index.insert(&action.user, &action.filename, *size, *digest)?;
        }
        WalOp::Delete => {
            index.delete(&action.user, &action.filename)?;
        }
    }
    Ok(())
}

/// Scan every known dbdisk-0 directory for leftover WAL files and replay
/// them: `READY` records are re-applied (index mutations are idempotent, so
/// redoing a partially-applied one is safe) and then cleared; `COMMIT`
/// records are simply cleared.
pub fn replay_all(layout: &Layout, index: &IndexStore) -> Result<usize> {
    let anchor_dir = match layout.dbdisks().first() {
        Some(d) => d.clone(),
        None => return Ok(0),
    };
    if !anchor_dir.exists() {
        return Ok(0);
    }

    let mut replayed = 0;
    for entry in fs::read_dir(&anchor_dir).map_err(|e| FoxyError::io(anchor_dir.clone(), e))? {
        let entry = entry.map_err(|e| FoxyError::io(anchor_dir.clone(), e))?;
        let path = entry.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => continue,
        };
        if !name.ends_with("_0_WAL") {
            continue;
        }

        let bytes = fs::read(&path).map_err(|e| FoxyError::io(path.clone(), e))?;
        let record: WalRecord = match serde_json::from_slice(&bytes) {
            Ok(r) => r,
            Err(_) => continue, // truncated mid-write; nothing trustworthy to replay
        };

        tracing::info!(user = %record.action.user, state = ?record.state, "replaying write-ahead log entry");
        if record.state == WalState::Ready {
            apply(index, &record.action)?;
        }
        clear(layout, &record.action.user)?;
        replayed += 1;
    }
    Ok(replayed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::tempdir;

    fn test_layout(dir: &std::path::Path) -> Layout {
        let mut cfg = Config::default_local();
        cfg.datadisks = (0..=3).map(|i| dir.join(format!("drive{i}"))).collect();
        cfg.dbdisks = (0..=3).map(|i| dir.join(format!("dbdrive{i}"))).collect();
        Layout::new(&cfg)
    }

    #[test]
    fn begin_then_clear_round_trips() {
        let dir = tempdir().unwrap();
        let layout = test_layout(dir.path());
        let action = WalAction {
            user: "alice".into(),
            filename: "f.txt".into(),
            op: WalOp::Insert { size: 10, digest: [1u8; 16] },
        };
        begin(&layout, &action).unwrap();
        assert!(wal_path(&layout, "alice").exists());
        clear(&layout, "alice").unwrap();
        assert!(!wal_path(&layout, "alice").exists());
    }

    #[test]
    fn replay_applies_ready_records() {
        let dir = tempdir().unwrap();
        let layout = test_layout(dir.path());
        let index = IndexStore::new(layout.clone());
        let action = WalAction {
            user: "alice".into(),
            filename: "f.txt".into(),
            op: WalOp::Insert { size: 10, digest: [1u8; 16] },
        };
        begin(&layout, &action).unwrap();
        let n = replay_all(&layout, &index).unwrap();
        assert_eq!(n, 1);
        assert!(index.get("alice", "f.txt").unwrap().is_some());
        assert!(!wal_path(&layout, "alice").exists());
    }
}
