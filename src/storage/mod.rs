//! Filesystem layout — uniform random-access locations for strips and index
//! buckets (`spec.md` §6 "Filesystem layout").
//!
//! ```text
//! storage/drive<i>/<user>/<filename>_<i>     i in [0, N)   data strip
//! storage/drive<N>/<user>/<filename>_p                     parity strip
//! storage/dbdrive<i>/<user>_<i>               i in [0, N)   index bucket
//! storage/dbdrivep/<user>_p                                 index parity
//! <bucket-basename>_WAL                                     WAL, alongside its bucket
//! ```
//!
//! Every location is a local file opened for random-access read/write; this
//! is the "local file-like abstraction" `spec.md` §1 assumes per storage
//! location. Non-local transports (the `Ebs` `Sys` variant) are out of
//! scope for the core and are not implemented here.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{FoxyError, Result};

/// Resolved physical layout for one user's data, derived from `Config`.
#[derive(Debug, Clone)]
pub struct Layout {
    datadisks: Vec<PathBuf>,
    dbdisks: Vec<PathBuf>,
    n: usize,
}

impl Layout {
    pub fn new(config: &Config) -> Self {
        Layout {
            datadisks: config.datadisks.clone(),
            dbdisks: config.dbdisks.clone(),
            n: config.n(),
        }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    /// Path to data location `i` for `(user, filename)`. `i == n()` is the
    /// parity location.
    pub fn data_strip_path(&self, i: usize, user: &str, filename: &str) -> PathBuf {
        let suffix = if i == self.n {
            "p".to_string()
        } else {
            i.to_string()
        };
        self.datadisks[i].join(user).join(format!("{filename}_{suffix}"))
    }

    /// Path to index bucket `i` for `user`. `i == n()` is the parity bucket.
    pub fn index_bucket_path(&self, i: usize, user: &str) -> PathBuf {
        let suffix = if i == self.n {
            "p".to_string()
        } else {
            i.to_string()
        };
        self.dbdisks[i].join(format!("{user}_{suffix}"))
    }

    /// WAL path for a given data-bucket file: alongside it, suffixed `_WAL`.
    pub fn wal_path_for(bucket_path: &Path) -> PathBuf {
        let mut s = bucket_path.as_os_str().to_owned();
        s.push("_WAL");
        PathBuf::from(s)
    }

    /// Ensure the per-user directory exists at every data location.
    pub fn ensure_user_dirs(&self, user: &str) -> Result<()> {
        for disk in &self.datadisks {
            let dir = disk.join(user);
            fs::create_dir_all(&dir).map_err(|e| FoxyError::io(dir, e))?;
        }
        Ok(())
    }

    pub fn datadisks(&self) -> &[PathBuf] {
        &self.datadisks
    }

    pub fn dbdisks(&self) -> &[PathBuf] {
        &self.dbdisks
    }
}

/// Open (creating if necessary) a file for random-access read/write.
pub fn open_rw(path: &Path) -> Result<File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| FoxyError::io(dir, e))?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)
        .map_err(|e| FoxyError::io(path, e))
}

/// Remove a file if present; absence is not an error.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FoxyError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn paths_follow_spec_layout() {
        let cfg = Config::default_local();
        let layout = Layout::new(&cfg);
        assert_eq!(
            layout.data_strip_path(0, "alice", "photo.png"),
            PathBuf::from("storage/drive0/alice/photo.png_0")
        );
        assert_eq!(
            layout.data_strip_path(layout.n(), "alice", "photo.png"),
            PathBuf::from("storage/drive3/alice/photo.png_p")
        );
        assert_eq!(
            layout.index_bucket_path(0, "alice"),
            PathBuf::from("storage/dbdrive0/alice_0")
        );
        assert_eq!(
            layout.index_bucket_path(layout.n(), "alice"),
            PathBuf::from("storage/dbdrivep/alice_p")
        );
    }

    #[test]
    fn wal_path_is_suffixed() {
        let p = PathBuf::from("storage/dbdrive0/alice_0");
        assert_eq!(
            Layout::wal_path_for(&p),
            PathBuf::from("storage/dbdrive0/alice_0_WAL")
        );
    }
}
