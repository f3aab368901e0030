//! Per-user metadata index (`spec.md` §4.3): one BST-structured bucket per
//! data location plus a parity bucket, routed by the filename's first byte.
//!
//! `spec.md` §4.3 fixes the routing boundaries at the closed intervals
//! `[0, 85]`, `[86, 112]`, `[113, 255]` for the default `N == 3` case and
//! §9 calls this a frozen contract to be preserved exactly rather than
//! re-balanced — `bucket_for` hard-codes that three-way split rather than
//! deriving it from `n`. See DESIGN.md.

pub mod bucket;
pub mod entry;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::hash::Digest;
use crate::storage::Layout;

pub use entry::Entry;

use bucket::Bucket;

pub struct IndexStore {
    layout: Layout,
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Result of [`IndexStore::audit_and_repair`].
#[derive(Debug, Clone, Copy)]
pub struct IndexAuditReport {
    pub checked: usize,
    pub repaired: Option<usize>,
}

impl IndexStore {
    pub fn new(layout: Layout) -> Self {
        IndexStore { layout, user_locks: Mutex::new(HashMap::new()) }
    }

    fn user_lock(&self, user: &str) -> Arc<Mutex<()>> {
        let mut map = self.user_locks.lock().expect("user lock registry poisoned");
        map.entry(user.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Which of the `n` data buckets a filename routes to.
    ///
    /// For the default `n == 3` this is the frozen `[0,85]/[86,112]/
    /// [113,255]` boundary set named by `spec.md` §4.3/§9 — preserved
    /// exactly rather than re-derived, since the spec explicitly forbids
    /// re-balancing it. For any other configured `n` (`DataDiskCount`
    /// changed from its default), no boundary set is specified, so routing
    /// falls back to an even split of the byte range; this deviation is
    /// recorded in DESIGN.md.
    pub fn bucket_for(filename: &str, n: usize) -> usize {
        let first = filename.as_bytes().first().copied().unwrap_or(0) as usize;
        if n == 3 {
            return match first {
                0..=85 => 0,
                86..=112 => 1,
                _ => 2,
            };
        }
        std::cmp::min(first * n / 256, n.saturating_sub(1))
    }

    fn open_all_buckets(&self, user: &str) -> Result<Vec<Bucket>> {
        let n = self.layout.n();
        (0..=n).map(|i| Bucket::open(&self.layout.index_bucket_path(i, user))).collect()
    }

    fn ensure_uniform_capacity(buckets: &mut [Bucket]) -> Result<()> {
        let max_cap = buckets.iter().map(|b| b.capacity()).max().unwrap_or(0);
        for b in buckets.iter_mut() {
            while b.capacity() < max_cap {
                b.grow()?;
            }
        }
        Ok(())
    }

    /// Recompute the parity bucket as the bytewise XOR of every data
    /// bucket, reseal every touched bucket's trailing digest, then fsync
    /// every bucket file so the mutation is durable before the caller's
    /// write-ahead log record flips to `COMMIT` (`spec.md` §4.4).
    fn reseal_and_reparity(buckets: &mut [Bucket]) -> Result<()> {
        let n = buckets.len() - 1;
        for b in buckets.iter_mut().take(n) {
            b.reseal()?;
        }
        let mut acc: Option<Vec<u8>> = None;
        for b in buckets.iter_mut().take(n) {
            let raw = b.read_raw()?;
            acc = Some(match acc {
                None => raw,
                Some(mut a) => {
                    for (x, y) in a.iter_mut().zip(raw.iter()) {
                        *x ^= y;
                    }
                    a
                }
            });
        }
        let parity_raw = acc.expect("n >= 1");
        buckets[n].write_raw(&parity_raw)?;
        buckets[n].reseal()?;
        for b in buckets.iter() {
            b.sync()?;
        }
        Ok(())
    }

    pub fn insert(&self, user: &str, filename: &str, size: u64, digest: Digest) -> Result<()> {
        let lock = self.user_lock(user);
        let _guard = lock.lock().expect("user lock poisoned");
        let mut buckets = self.open_all_buckets(user)?;
        Self::ensure_uniform_capacity(&mut buckets)?;
        let n = self.layout.n();
        let idx = Self::bucket_for(filename, n);
        buckets[idx].insert(filename, size, digest)?;
        Self::ensure_uniform_capacity(&mut buckets)?;
        Self::reseal_and_reparity(&mut buckets)
    }

    pub fn get(&self, user: &str, filename: &str) -> Result<Option<Entry>> {
        let lock = self.user_lock(user);
        let _guard = lock.lock().expect("user lock poisoned");
        let n = self.layout.n();
        let idx = Self::bucket_for(filename, n);
        let mut bucket = Bucket::open(&self.layout.index_bucket_path(idx, user))?;
        bucket.lookup(filename)
    }

    pub fn delete(&self, user: &str, filename: &str) -> Result<Option<Entry>> {
        let lock = self.user_lock(user);
        let _guard = lock.lock().expect("user lock poisoned");
        let mut buckets = self.open_all_buckets(user)?;
        Self::ensure_uniform_capacity(&mut buckets)?;
        let n = self.layout.n();
        let idx = Self::bucket_for(filename, n);
        let removed = buckets[idx].delete(filename)?;
        Self::reseal_and_reparity(&mut buckets)?;
        Ok(removed)
    }

    /// Verify every bucket's trailing digest and the cross-bucket parity
    /// relationship for `user`, repairing a single faulty bucket by
    /// reconstructing it from its peers. Two or more faulty buckets is
    /// `UnrecoverableCorruption` (`spec.md` §4.5).
    pub fn audit_and_repair(&self, user: &str) -> Result<IndexAuditReport> {
        let lock = self.user_lock(user);
        let _guard = lock.lock().expect("user lock poisoned");
        let mut buckets = self.open_all_buckets(user)?;
        let n = buckets.len() - 1;

        let mut faulty = Vec::new();
        for (i, b) in buckets.iter_mut().enumerate() {
            if !b.verify_seal()? {
                faulty.push(i);
            }
        }

        if faulty.len() > 1 {
            return Err(crate::error::FoxyError::unrecoverable(format!(
                "{} of {} index buckets failed verification for user {user}",
                faulty.len(),
                n + 1
            )));
        }

        if let Some(&bad) = faulty.first() {
            tracing::warn!(user, bucket = bad, "reconstructing index bucket from parity");
            let mut acc: Option<Vec<u8>> = None;
            for (i, b) in buckets.iter_mut().enumerate() {
                if i == bad {
                    continue;
                }
                let raw = b.read_raw()?;
                acc = Some(match acc {
                    None => raw,
                    Some(mut a) => {
                        for (x, y) in a.iter_mut().zip(raw.iter()) {
                            *x ^= y;
                        }
                        a
                    }
                });
            }
            let rebuilt = acc.expect("n >= 1");
            buckets[bad].write_raw(&rebuilt)?;
            buckets[bad].reseal()?;
        }

        Ok(IndexAuditReport { checked: n + 1, repaired: faulty.into_iter().next() })
    }

    /// Every live entry across every data bucket for `user`.
    pub fn list(&self, user: &str) -> Result<Vec<Entry>> {
        let lock = self.user_lock(user);
        let _guard = lock.lock().expect("user lock poisoned");
        let mut buckets = self.open_all_buckets(user)?;
        let n = self.layout.n();
        let mut out = Vec::new();
        for b in buckets.iter_mut().take(n) {
            out.extend(b.all_entries()?);
        }
        Ok(out)
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }
}
