//! 16-byte content digest.
//!
//! `spec.md` §6 calls for "a 16-byte digest (MD5-compatible width, though any
//! 16-byte digest with collision resistance against incidental corruption is
//! acceptable)". We take the first 16 bytes of BLAKE3 rather than MD5 itself
//! — BLAKE3 is the hash the teacher crate already uses everywhere
//! (`block.rs`, `index.rs`) for content identity, and truncating it costs
//! nothing in collision resistance for this use case (detecting accidental
//! corruption, not defending against a chosen-prefix adversary). See
//! DESIGN.md for the resolved Open Question.

pub const DIGEST_LEN: usize = 16;

pub type Digest = [u8; DIGEST_LEN];

/// One-shot digest of a full buffer.
pub fn digest(data: &[u8]) -> Digest {
    let full = blake3::hash(data);
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&full.as_bytes()[..DIGEST_LEN]);
    out
}

/// Incremental digest accumulator, fed one chunk at a time as a strip is
/// written or read, mirroring the per-writer/per-reader incremental digest
/// the striping engine maintains across rounds (`spec.md` §4.1 step 6,
/// §4.2 step 2).
#[derive(Clone)]
pub struct Hasher(blake3::Hasher);

impl Hasher {
    pub fn new() -> Self {
        Hasher(blake3::Hasher::new())
    }

    pub fn update(&mut self, chunk: &[u8]) -> &mut Self {
        self.0.update(chunk);
        self
    }

    pub fn finalize(&self) -> Digest {
        let full = self.0.finalize();
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(&full.as_bytes()[..DIGEST_LEN]);
        out
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_matches_one_shot() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let mut h = Hasher::new();
        h.update(&data[..10]);
        h.update(&data[10..]);
        assert_eq!(h.finalize(), digest(data));
    }

    #[test]
    fn different_input_different_digest() {
        assert_ne!(digest(b"a"), digest(b"b"));
    }
}
