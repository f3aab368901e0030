//! foxyblox: a RAID-4-style content-redundant file storage engine.
//!
//! A file is split into `N` data strips plus one parity strip, each
//! carrying its own content digest (`striping`); a per-user metadata index
//! (`index`) tracks every stored file's size and whole-file digest, itself
//! mirrored across `N` data buckets plus a parity bucket; a write-ahead log
//! (`wal`) protects index mutations against a crash between the data-bucket
//! and parity-bucket writes; and a background audit (`audit`) periodically
//! re-verifies and repairs the index's parity relationship. `facade` wires
//! all of this into the three operations client code actually calls.

pub mod audit;
pub mod config;
pub mod error;
pub mod facade;
pub mod hash;
pub mod index;
pub mod names;
pub mod storage;
pub mod striping;
pub mod wal;

pub use config::Config;
pub use error::{FoxyError, Result};
pub use facade::System;
