//! Engine configuration — JSON file, default path `config.txt`.
//!
//! On-disk shape (unchanged from `spec.md` §6):
//!
//! ```json
//! {
//!   "Sys": 0,
//!   "Dbdisks": ["storage/dbdrive0", "storage/dbdrive1", "storage/dbdrivep"],
//!   "Datadisks": ["storage/drive0", "storage/drive1", "storage/drive2", "storage/drive3"],
//!   "DataDiskCount": 3,
//!   "ParityDiskCount": 1
//! }
//! ```
//!
//! `Dbdisks`/`Datadisks` are ordered lists whose last element is the parity
//! location, matching the teacher's convention of keeping on-disk field
//! ordering identical to the struct field ordering (`superblock.rs`).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FoxyError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "config.txt";

/// Where the data and index locations physically live.
///
/// Only `Localhost` is exercised by the core; `Ebs` is accepted and
/// round-trips through the config file but any non-local transport is, per
/// `spec.md` §1, an external collaborator outside the core's scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Sys {
    Localhost = 0,
    Ebs = 1,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "Sys")]
    pub sys: SysField,
    #[serde(rename = "Dbdisks")]
    pub dbdisks: Vec<PathBuf>,
    #[serde(rename = "Datadisks")]
    pub datadisks: Vec<PathBuf>,
    #[serde(rename = "DataDiskCount")]
    pub data_disk_count: u8,
    #[serde(rename = "ParityDiskCount")]
    pub parity_disk_count: u8,
}

// `Sys` is renamed through a newtype so `Config`'s derive can keep the exact
// field name casing the spec's JSON shape requires while still storing a
// typed enum rather than a bare integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SysField(pub Sys);

impl From<Sys> for SysField {
    fn from(s: Sys) -> Self {
        SysField(s)
    }
}

impl Config {
    /// Default configuration: localhost, N=3 data disks + 1 parity,
    /// M=1 parity disk (the only supported value per `spec.md` §6).
    pub fn default_local() -> Self {
        let n = 3u8;
        let mut datadisks: Vec<PathBuf> = (0..n)
            .map(|i| PathBuf::from(format!("storage/drive{i}")))
            .collect();
        datadisks.push(PathBuf::from(format!("storage/drive{n}")));

        let mut dbdisks: Vec<PathBuf> = (0..n)
            .map(|i| PathBuf::from(format!("storage/dbdrive{i}")))
            .collect();
        dbdisks.push(PathBuf::from("storage/dbdrivep"));

        Config {
            sys: SysField(Sys::Localhost),
            dbdisks,
            datadisks,
            data_disk_count: n,
            parity_disk_count: 1,
        }
    }

    /// Load from `path`, creating it with defaults first if absent.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let cfg = Config::default_local();
            cfg.save(path)?;
            return Ok(cfg);
        }
        Self::load(path)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| FoxyError::io(path, e))?;
        let cfg: Config = serde_json::from_slice(&bytes)
            .map_err(|e| FoxyError::input(format!("malformed config {}: {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| FoxyError::input(format!("failed to serialize config: {e}")))?;
        fs::write(path, bytes).map_err(|e| FoxyError::io(path, e))
    }

    fn validate(&self) -> Result<()> {
        // disk_count <= 255 keeps the 0x80 padding sentinel locatable within
        // the last N bytes of the last strip (spec.md §9 REDESIGN FLAGS).
        if self.data_disk_count == 0 {
            return Err(FoxyError::input("DataDiskCount must be >= 1"));
        }
        if self.parity_disk_count != 1 {
            return Err(FoxyError::input(
                "ParityDiskCount: only a single parity disk is supported",
            ));
        }
        if self.datadisks.len() != self.data_disk_count as usize + 1 {
            return Err(FoxyError::input(
                "Datadisks must list DataDiskCount entries plus one parity entry",
            ));
        }
        if self.dbdisks.len() != self.data_disk_count as usize + 1 {
            return Err(FoxyError::input(
                "Dbdisks must list DataDiskCount entries plus one parity entry",
            ));
        }
        Ok(())
    }

    /// `N`: number of data locations (striping) / data index buckets.
    pub fn n(&self) -> usize {
        self.data_disk_count as usize
    }

    /// Create the default on-disk directory skeleton (`initLocal`).
    pub fn init_local_dirs(&self) -> Result<()> {
        for dir in self.datadisks.iter().chain(self.dbdisks.iter()) {
            fs::create_dir_all(dir).map_err(|e| FoxyError::io(dir.clone(), e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_round_trips_through_json() {
        let cfg = Config::default_local();
        let bytes = serde_json::to_vec(&cfg).unwrap();
        let back: Config = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.data_disk_count, cfg.data_disk_count);
        assert_eq!(back.datadisks, cfg.datadisks);
    }

    #[test]
    fn rejects_mismatched_disk_lists() {
        let mut cfg = Config::default_local();
        cfg.datadisks.pop();
        assert!(cfg.validate().is_err());
    }
}
