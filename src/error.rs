//! Crate-wide error type.
//!
//! One enum covers every subsystem, following the teacher crate's pattern of
//! a single `thiserror`-derived enum per concern (`CodecError`,
//! `SuperblockError`). Here the whole engine shares one enum because the
//! kinds are the ones `spec.md` §7 enumerates directly, and the facade is the
//! only place that needs to discriminate between them.
//!
//! # Propagation rules (see `spec.md` §7)
//! - A `HashMismatch` on a single data or index location is never returned to
//!   a caller — it triggers recovery (`§4.2`/`§4.3`) and is resolved
//!   silently. It only appears here because the recovery path itself needs a
//!   typed value to log and to distinguish from `UnrecoverableCorruption`.
//! - `LogReplayNeeded` is handled entirely inside WAL startup scanning and
//!   never escapes `wal::replay_all`.
//! - Only `UnrecoverableCorruption` and `NotFound` are expected to reach a
//!   CLI or HTTP caller under normal operation.

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum FoxyError {
    #[error("invalid input: {0}")]
    InputInvalid(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O failure at {path}: {source}")]
    IoFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("hash mismatch for {what}")]
    HashMismatch { what: String },

    #[error("index corruption: {0}")]
    IndexCorruption(String),

    #[error("unrecoverable corruption: {0}")]
    UnrecoverableCorruption(String),

    #[error("a committed write-ahead log was found and must be replayed before use")]
    LogReplayNeeded,
}

impl FoxyError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        FoxyError::IoFailure { path: path.into(), source }
    }

    pub fn input(msg: impl Into<String>) -> Self {
        FoxyError::InputInvalid(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        FoxyError::NotFound(msg.into())
    }

    pub fn unrecoverable(msg: impl Into<String>) -> Self {
        FoxyError::UnrecoverableCorruption(msg.into())
    }

    pub fn index_corruption(msg: impl Into<String>) -> Self {
        FoxyError::IndexCorruption(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, FoxyError>;
