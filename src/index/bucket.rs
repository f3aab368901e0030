//! Single on-disk index bucket: a BST over fixed-width slots (`spec.md`
//! §4.3). All buckets belonging to the same user (the `N` data buckets plus
//! the parity bucket) are kept at an identical byte length so the parity
//! bucket can always be recomputed as their bytewise XOR, the same
//! invariant the striping engine keeps over data strips.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{FoxyError, Result};
use crate::hash::{Digest, DIGEST_LEN};
use crate::storage;

use super::entry::{verify_entry_hash, Entry, Header, ENTRY_LEN, HEADER_LEN, NIL};

/// Slots added each time a bucket runs out of free space.
pub const GROWTH_SLOTS: u32 = 64;

pub struct Bucket {
    path: PathBuf,
    file: File,
    header: Header,
    capacity: u32,
}

impl Bucket {
    pub fn open(path: &Path) -> Result<Self> {
        let is_new = !path.exists();
        let mut file = storage::open_rw(path)?;
        if is_new {
            let header = Header::empty();
            let mut buf = [0u8; HEADER_LEN];
            header.write_to(&mut buf).expect("fixed-size header write cannot fail");
            file.write_all(&buf).map_err(|e| FoxyError::io(path, e))?;
            return Ok(Bucket { path: path.to_path_buf(), file, header, capacity: 0 });
        }
        let len = file.metadata().map_err(|e| FoxyError::io(path, e))?.len();
        if len < HEADER_LEN as u64 {
            return Err(FoxyError::unrecoverable(format!(
                "{} is shorter than an index header",
                path.display()
            )));
        }
        let mut hbuf = [0u8; HEADER_LEN];
        file.seek(SeekFrom::Start(0)).map_err(|e| FoxyError::io(path, e))?;
        file.read_exact(&mut hbuf).map_err(|e| FoxyError::io(path, e))?;
        let header = Header::read_from(&hbuf).map_err(|e| FoxyError::io(path, e))?;
        let capacity = ((len - HEADER_LEN as u64) / ENTRY_LEN as u64) as u32;
        Ok(Bucket { path: path.to_path_buf(), file, header, capacity })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn byte_len(&self) -> u64 {
        HEADER_LEN as u64 + self.capacity as u64 * ENTRY_LEN as u64
    }

    fn slot_offset(&self, slot: u32) -> u64 {
        HEADER_LEN as u64 + slot as u64 * ENTRY_LEN as u64
    }

    /// Read slot `slot` and verify its trailing entry hash, signaling
    /// `IndexCorruption` on mismatch rather than returning a silently
    /// corrupted node to a tree descent.
    fn read_slot(&mut self, slot: u32) -> Result<Entry> {
        let off = self.slot_offset(slot);
        let mut buf = vec![0u8; ENTRY_LEN];
        self.file
            .seek(SeekFrom::Start(off))
            .and_then(|_| self.file.read_exact(&mut buf))
            .map_err(|e| FoxyError::io(&self.path, e))?;
        if !verify_entry_hash(&buf) {
            return Err(FoxyError::index_corruption(format!(
                "entry hash mismatch at slot {slot} in {}",
                self.path.display()
            )));
        }
        Entry::read_from(&buf).map_err(|e| FoxyError::io(&self.path, e))
    }

    fn write_slot(&mut self, slot: u32, entry: &Entry) -> Result<()> {
        let off = self.slot_offset(slot);
        let mut buf = vec![0u8; ENTRY_LEN];
        entry.write_to(&mut buf).map_err(|e| FoxyError::io(&self.path, e))?;
        self.file
            .seek(SeekFrom::Start(off))
            .and_then(|_| self.file.write_all(&buf))
            .map_err(|e| FoxyError::io(&self.path, e))?;
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        let mut buf = [0u8; HEADER_LEN];
        self.header.write_to(&mut buf).expect("fixed-size header write cannot fail");
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.write_all(&buf))
            .map_err(|e| FoxyError::io(&self.path, e))
    }

    /// Append `GROWTH_SLOTS` free slots, threading them onto the free list.
    pub fn grow(&mut self) -> Result<()> {
        let base = self.capacity;
        let new_cap = base + GROWTH_SLOTS;
        self.file
            .set_len(HEADER_LEN as u64 + new_cap as u64 * ENTRY_LEN as u64)
            .map_err(|e| FoxyError::io(&self.path, e))?;
        for i in (base..new_cap).rev() {
            let next = if i + 1 == new_cap { self.header.free_head } else { i + 1 };
            self.write_slot(i, &Entry::free_with_next(next))?;
        }
        self.header.free_head = base;
        self.capacity = new_cap;
        self.write_header()?;
        Ok(())
    }

    fn alloc_slot(&mut self) -> Result<u32> {
        if self.header.free_head == NIL {
            self.grow()?;
        }
        let slot = self.header.free_head;
        let free_entry = self.read_slot(slot)?;
        self.header.free_head = free_entry.left;
        self.header.slot_count += 1;
        self.write_header()?;
        Ok(slot)
    }

    fn free_slot(&mut self, slot: u32) -> Result<()> {
        self.write_slot(slot, &Entry::free_with_next(self.header.free_head))?;
        self.header.free_head = slot;
        self.header.slot_count -= 1;
        self.write_header()
    }

    pub fn lookup(&mut self, filename: &str) -> Result<Option<Entry>> {
        let mut cur = self.header.root;
        while cur != NIL {
            let entry = self.read_slot(cur)?;
            match filename.cmp(entry.filename.as_str()) {
                std::cmp::Ordering::Equal => return Ok(Some(entry)),
                std::cmp::Ordering::Less => cur = entry.left,
                std::cmp::Ordering::Greater => cur = entry.right,
            }
        }
        Ok(None)
    }

    /// Insert or overwrite the entry for `filename`.
    pub fn insert(&mut self, filename: &str, size: u64, digest: Digest) -> Result<()> {
        if self.header.root == NIL {
            let slot = self.alloc_slot()?;
            self.write_slot(
                slot,
                &Entry { occupied: true, filename: filename.to_string(), size, digest, left: NIL, right: NIL },
            )?;
            self.header.root = slot;
            return self.write_header();
        }

        let mut cur = self.header.root;
        loop {
            let mut entry = self.read_slot(cur)?;
            match filename.cmp(entry.filename.as_str()) {
                std::cmp::Ordering::Equal => {
                    entry.size = size;
                    entry.digest = digest;
                    return self.write_slot(cur, &entry);
                }
                std::cmp::Ordering::Less => {
                    if entry.left == NIL {
                        let slot = self.alloc_slot()?;
                        self.write_slot(
                            slot,
                            &Entry {
                                occupied: true,
                                filename: filename.to_string(),
                                size,
                                digest,
                                left: NIL,
                                right: NIL,
                            },
                        )?;
                        entry.left = slot;
                        return self.write_slot(cur, &entry);
                    }
                    cur = entry.left;
                }
                std::cmp::Ordering::Greater => {
                    if entry.right == NIL {
                        let slot = self.alloc_slot()?;
                        self.write_slot(
                            slot,
                            &Entry {
                                occupied: true,
                                filename: filename.to_string(),
                                size,
                                digest,
                                left: NIL,
                                right: NIL,
                            },
                        )?;
                        entry.right = slot;
                        return self.write_slot(cur, &entry);
                    }
                    cur = entry.right;
                }
            }
        }
    }

    /// Remove the entry for `filename`, returning it if present.
    pub fn delete(&mut self, filename: &str) -> Result<Option<Entry>> {
        let mut parent: Option<(u32, bool)> = None; // (slot, is_left_child)
        let mut cur = self.header.root;
        while cur != NIL {
            let entry = self.read_slot(cur)?;
            match filename.cmp(entry.filename.as_str()) {
                std::cmp::Ordering::Equal => {
                    let removed = self.remove_node(cur, parent)?;
                    return Ok(Some(removed));
                }
                std::cmp::Ordering::Less => {
                    parent = Some((cur, true));
                    cur = entry.left;
                }
                std::cmp::Ordering::Greater => {
                    parent = Some((cur, false));
                    cur = entry.right;
                }
            }
        }
        Ok(None)
    }

    fn set_child(&mut self, parent: Option<(u32, bool)>, child: u32) -> Result<()> {
        match parent {
            None => {
                self.header.root = child;
                self.write_header()
            }
            Some((p, is_left)) => {
                let mut pe = self.read_slot(p)?;
                if is_left {
                    pe.left = child;
                } else {
                    pe.right = child;
                }
                self.write_slot(p, &pe)
            }
        }
    }

    fn remove_node(&mut self, slot: u32, parent: Option<(u32, bool)>) -> Result<Entry> {
        let node = self.read_slot(slot)?;
        match (node.left, node.right) {
            (NIL, NIL) => {
                self.set_child(parent, NIL)?;
                self.free_slot(slot)?;
            }
            (only, NIL) | (NIL, only) => {
                self.set_child(parent, only)?;
                self.free_slot(slot)?;
            }
            (_, right) => {
                // Replace with the in-order successor (leftmost of the right subtree).
                let mut succ_parent = (slot, false);
                let mut succ = right;
                loop {
                    let succ_entry = self.read_slot(succ)?;
                    if succ_entry.left == NIL {
                        break;
                    }
                    succ_parent = (succ, true);
                    succ = succ_entry.left;
                }
                let succ_entry = self.read_slot(succ)?;
                let mut replacement = node.clone();
                replacement.filename = succ_entry.filename.clone();
                replacement.size = succ_entry.size;
                replacement.digest = succ_entry.digest;
                self.write_slot(slot, &replacement)?;
                self.set_child(Some(succ_parent), succ_entry.right)?;
                self.free_slot(succ)?;
            }
        }
        Ok(node)
    }

    /// In-order traversal of every live entry; used by audit and rebuild.
    pub fn all_entries(&mut self) -> Result<Vec<Entry>> {
        let mut out = Vec::new();
        self.collect_inorder(self.header.root, &mut out)?;
        Ok(out)
    }

    fn collect_inorder(&mut self, slot: u32, out: &mut Vec<Entry>) -> Result<()> {
        if slot == NIL {
            return Ok(());
        }
        let entry = self.read_slot(slot)?;
        self.collect_inorder(entry.left, out)?;
        let (left, right) = (entry.left, entry.right);
        out.push(entry);
        self.collect_inorder(right, out)?;
        let _ = left;
        Ok(())
    }

    /// Read the whole bucket file's bytes (header + every slot, free or
    /// not) for parity computation/verification.
    pub fn read_raw(&mut self) -> Result<Vec<u8>> {
        let len = self.byte_len();
        let mut buf = vec![0u8; len as usize];
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_exact(&mut buf))
            .map_err(|e| FoxyError::io(&self.path, e))?;
        Ok(buf)
    }

    /// Overwrite the whole bucket file's bytes (used to rebuild a bucket
    /// from parity plus its peers). Truncates away any trailing digest;
    /// callers must [`reseal`](Self::reseal) afterward.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.set_len(bytes.len() as u64).map_err(|e| FoxyError::io(&self.path, e))?;
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.write_all(bytes))
            .map_err(|e| FoxyError::io(&self.path, e))?;
        let mut hbuf = [0u8; HEADER_LEN];
        hbuf.copy_from_slice(&bytes[..HEADER_LEN]);
        self.header = Header::read_from(&hbuf).map_err(|e| FoxyError::io(&self.path, e))?;
        self.capacity = ((bytes.len() - HEADER_LEN) / ENTRY_LEN) as u32;
        Ok(())
    }

    /// Recompute and persist the trailing content digest covering the
    /// header and every slot. Call after any mutation is complete.
    pub fn reseal(&mut self) -> Result<()> {
        let raw = self.read_raw()?;
        let digest = crate::hash::digest(&raw);
        let len = self.byte_len();
        self.file
            .seek(SeekFrom::Start(len))
            .and_then(|_| self.file.write_all(&digest))
            .map_err(|e| FoxyError::io(&self.path, e))?;
        self.file
            .set_len(len + DIGEST_LEN as u64)
            .map_err(|e| FoxyError::io(&self.path, e))?;
        Ok(())
    }

    /// Flush this bucket's writes to durable storage.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all().map_err(|e| FoxyError::io(&self.path, e))
    }

    /// Verify the trailing content digest, if one is present. A bucket
    /// whose file is exactly `byte_len()` long (no trailer yet written)
    /// verifies as `true`.
    pub fn verify_seal(&mut self) -> Result<bool> {
        let len = self.byte_len();
        let total = self.file.metadata().map_err(|e| FoxyError::io(&self.path, e))?.len();
        if total < len + DIGEST_LEN as u64 {
            return Ok(true);
        }
        let mut stored = [0u8; DIGEST_LEN];
        self.file
            .seek(SeekFrom::Start(len))
            .and_then(|_| self.file.read_exact(&mut stored))
            .map_err(|e| FoxyError::io(&self.path, e))?;
        let raw = self.read_raw()?;
        Ok(crate::hash::digest(&raw) == stored)
    }
}
