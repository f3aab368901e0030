//! Top-level engine facade: wires striping, the metadata index, and the
//! write-ahead log into the three operations `spec.md` §2 exposes —
//! `add`, `get`, `delete`.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{FoxyError, Result};
use crate::hash::{Digest, Hasher};
use crate::index::{Entry, IndexStore};
use crate::names;
use crate::storage::{self, Layout};
use crate::striping;
use crate::wal::{self, WalAction, WalOp};

pub struct System {
    layout: Layout,
    index: Arc<IndexStore>,
}

impl System {
    /// Open the engine against `config`, replaying any write-ahead log
    /// entries left behind by a prior crash before returning.
    pub fn open(config: &Config) -> Result<Self> {
        let layout = Layout::new(config);
        let index = Arc::new(IndexStore::new(layout.clone()));
        let replayed = wal::replay_all(&layout, &index)?;
        if replayed > 0 {
            tracing::info!(replayed, "replayed pending write-ahead log entries on startup");
        }
        Ok(System { layout, index })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn index(&self) -> &IndexStore {
        &self.index
    }

    pub fn index_arc(&self) -> &Arc<IndexStore> {
        &self.index
    }

    fn whole_file_digest(source: &mut File) -> Result<(u64, Digest)> {
        source.seek(SeekFrom::Start(0)).map_err(|e| FoxyError::io("source", e))?;
        let mut hasher = Hasher::new();
        let mut buf = [0u8; 65536];
        let mut size = 0u64;
        loop {
            let n = source.read(&mut buf).map_err(|e| FoxyError::io("source", e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }
        source.seek(SeekFrom::Start(0)).map_err(|e| FoxyError::io("source", e))?;
        Ok((size, hasher.finalize()))
    }

    /// Store `source`'s full contents as `(user, filename)`: stripe it
    /// across data and parity locations, then durably record it in the
    /// index under write-ahead-log protection.
    pub fn add(&self, user: &str, filename: &str, mut source: File) -> Result<()> {
        names::validate_username(user)?;
        names::validate_filename(filename)?;

        let (size, digest) = Self::whole_file_digest(&mut source)?;
        striping::write_file(&self.layout, user, filename, source, striping::DEFAULT_BUF_SIZE)?;

        let action =
            WalAction { user: user.to_string(), filename: filename.to_string(), op: WalOp::Insert { size, digest } };
        wal::begin(&self.layout, &action)?;
        self.index.insert(user, filename, size, digest)?;
        wal::commit(&self.layout, &action)?;
        wal::clear(&self.layout, user)?;
        Ok(())
    }

    /// Reconstruct `(user, filename)` into `dest`, verifying and
    /// transparently recovering a single faulty strip along the way.
    pub fn get(&self, user: &str, filename: &str, dest: &Path) -> Result<Entry> {
        names::validate_username(user)?;
        names::validate_filename(filename)?;

        let entry = self
            .index
            .get(user, filename)?
            .ok_or_else(|| FoxyError::not_found(format!("{user}/{filename}")))?;
        striping::read_file_default(&self.layout, user, filename, dest)?;
        Ok(entry)
    }

    /// Remove `(user, filename)` from the index (under write-ahead-log
    /// protection) and delete its strip files.
    pub fn delete(&self, user: &str, filename: &str) -> Result<Option<Entry>> {
        names::validate_username(user)?;
        names::validate_filename(filename)?;

        let action = WalAction { user: user.to_string(), filename: filename.to_string(), op: WalOp::Delete };
        wal::begin(&self.layout, &action)?;
        let removed = self.index.delete(user, filename)?;
        wal::commit(&self.layout, &action)?;
        wal::clear(&self.layout, user)?;

        for i in 0..=self.layout.n() {
            let path = self.layout.data_strip_path(i, user, filename);
            storage::remove_if_exists(&path)?;
        }
        Ok(removed)
    }

    /// List every file stored for `user`.
    pub fn list(&self, user: &str) -> Result<Vec<Entry>> {
        names::validate_username(user)?;
        self.index.list(user)
    }
}
