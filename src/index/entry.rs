//! Fixed-width on-disk entry format for one index bucket (`spec.md` §4.3).
//!
//! Each bucket file is a flat array of fixed-size slots forming a binary
//! search tree keyed by filename, plus a small header. Free slots are
//! threaded into a singly-linked free list through the same `left` field a
//! live entry uses for its left child.
//!
//! ```text
//! header (offset 0, 12 bytes):
//!   0   4   root slot index (NIL = 0xFFFF_FFFF if empty)
//!   4   4   free-list head slot index (NIL if no free slots)
//!   8   4   slot count currently allocated in the file
//!
//! entry slot (HEADER_LEN + i * ENTRY_LEN, ENTRY_LEN bytes):
//!   0     1    occupied flag (0 = free, 1 = live)
//!   1     256  filename, ASCII, NUL-padded
//!   257   8    file size in bytes (LE)
//!   265   16   content digest of the *whole* stored file
//!   281   4    left child slot index / free-list next (LE)
//!   285   4    right child slot index (LE)
//!   289   16   entry hash: digest of bytes [0, 289) of this same slot
//! ```
//!
//! The trailing `hash[16]` lets a reader detect a corrupted node the moment
//! it's read during a tree descent, rather than only at whole-bucket audit
//! time: every slot (free or live) gets one, computed over everything that
//! precedes it in the slot.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

use crate::hash::{Digest, DIGEST_LEN};
use crate::names::MAX_FILENAME_LEN;

pub const NIL: u32 = u32::MAX;
pub const HEADER_LEN: usize = 12;
/// Length of everything in a slot that precedes the trailing entry hash.
const ENTRY_BODY_LEN: usize = 1 + MAX_FILENAME_LEN + 8 + DIGEST_LEN + 4 + 4;
pub const ENTRY_LEN: usize = ENTRY_BODY_LEN + DIGEST_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub root: u32,
    pub free_head: u32,
    pub slot_count: u32,
}

impl Header {
    pub fn empty() -> Self {
        Header { root: NIL, free_head: NIL, slot_count: 0 }
    }

    pub fn read_from(buf: &[u8]) -> io::Result<Self> {
        let mut c = Cursor::new(buf);
        Ok(Header {
            root: c.read_u32::<LittleEndian>()?,
            free_head: c.read_u32::<LittleEndian>()?,
            slot_count: c.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write_to(&self, buf: &mut [u8]) -> io::Result<()> {
        let mut c = Cursor::new(buf);
        c.write_u32::<LittleEndian>(self.root)?;
        c.write_u32::<LittleEndian>(self.free_head)?;
        c.write_u32::<LittleEndian>(self.slot_count)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub occupied: bool,
    pub filename: String,
    pub size: u64,
    pub digest: Digest,
    pub left: u32,
    pub right: u32,
}

impl Entry {
    pub fn free_with_next(next: u32) -> Self {
        Entry {
            occupied: false,
            filename: String::new(),
            size: 0,
            digest: [0u8; DIGEST_LEN],
            left: next,
            right: NIL,
        }
    }

    pub fn read_from(buf: &[u8]) -> io::Result<Self> {
        let mut c = Cursor::new(&buf[..ENTRY_BODY_LEN]);
        let occupied = c.read_u8()? == 1;
        let mut name_buf = [0u8; MAX_FILENAME_LEN];
        c.read_exact(&mut name_buf)?;
        let name_len = name_buf.iter().position(|&b| b == 0).unwrap_or(MAX_FILENAME_LEN);
        let filename = String::from_utf8_lossy(&name_buf[..name_len]).into_owned();
        let size = c.read_u64::<LittleEndian>()?;
        let mut digest = [0u8; DIGEST_LEN];
        c.read_exact(&mut digest)?;
        let left = c.read_u32::<LittleEndian>()?;
        let right = c.read_u32::<LittleEndian>()?;
        Ok(Entry { occupied, filename, size, digest, left, right })
    }

    /// Write this entry's body into `buf[..ENTRY_LEN]`, then append the
    /// trailing hash covering everything just written.
    pub fn write_to(&self, buf: &mut [u8]) -> io::Result<()> {
        assert!(self.filename.len() <= MAX_FILENAME_LEN);
        {
            let mut c = Cursor::new(&mut buf[..ENTRY_BODY_LEN]);
            c.write_u8(if self.occupied { 1 } else { 0 })?;
            let mut name_buf = [0u8; MAX_FILENAME_LEN];
            name_buf[..self.filename.len()].copy_from_slice(self.filename.as_bytes());
            c.write_all(&name_buf)?;
            c.write_u64::<LittleEndian>(self.size)?;
            c.write_all(&self.digest)?;
            c.write_u32::<LittleEndian>(self.left)?;
            c.write_u32::<LittleEndian>(self.right)?;
        }
        let hash = crate::hash::digest(&buf[..ENTRY_BODY_LEN]);
        buf[ENTRY_BODY_LEN..ENTRY_LEN].copy_from_slice(&hash);
        Ok(())
    }
}

/// `true` if `buf`'s trailing hash matches the digest of its body — called
/// on every slot read during a tree descent.
pub fn verify_entry_hash(buf: &[u8]) -> bool {
    let expected = crate::hash::digest(&buf[..ENTRY_BODY_LEN]);
    let mut stored = [0u8; DIGEST_LEN];
    stored.copy_from_slice(&buf[ENTRY_BODY_LEN..ENTRY_LEN]);
    stored == expected
}
