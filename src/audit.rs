//! Background index-parity audit (`spec.md` §4.5 plus the periodic-runner
//! ambient addition from SPEC_FULL.md).
//!
//! Users are discovered by listing bucket-0 files on the first dbdisk
//! (the same anchor directory the write-ahead log scans) rather than kept
//! in a separate registry — the filesystem is already the source of truth
//! for who has data.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::index::{IndexAuditReport, IndexStore};
use crate::storage::Layout;

/// List every username with at least one index bucket, derived from the
/// `<user>_0` files on the first dbdisk.
pub fn known_users(layout: &Layout) -> Result<Vec<String>> {
    let anchor = match layout.dbdisks().first() {
        Some(d) => d.clone(),
        None => return Ok(Vec::new()),
    };
    if !anchor.exists() {
        return Ok(Vec::new());
    }
    let mut users = Vec::new();
    for entry in fs::read_dir(&anchor).map_err(|e| crate::error::FoxyError::io(anchor.clone(), e))? {
        let entry = entry.map_err(|e| crate::error::FoxyError::io(anchor.clone(), e))?;
        let name = match entry.file_name().into_string() {
            Ok(n) => n,
            Err(_) => continue,
        };
        if let Some(user) = name.strip_suffix("_0") {
            users.push(user.to_string());
        }
    }
    Ok(users)
}

/// Audit and, where needed, repair every known user's index in one pass.
pub fn run_once(layout: &Layout, index: &IndexStore) -> Result<Vec<(String, IndexAuditReport)>> {
    let mut reports = Vec::new();
    for user in known_users(layout)? {
        let report = index.audit_and_repair(&user)?;
        if report.repaired.is_some() {
            tracing::info!(user = %user, "index audit repaired a bucket");
        }
        reports.push((user, report));
    }
    Ok(reports)
}

/// Run [`run_once`] on a fixed interval until the process exits, logging
/// (but not propagating) any per-user audit failure so one corrupt user
/// doesn't stop the sweep over the rest.
pub fn run_periodic(layout: Layout, index: Arc<IndexStore>, interval: Duration) -> ! {
    loop {
        match known_users(&layout) {
            Ok(users) => {
                for user in users {
                    if let Err(e) = index.audit_and_repair(&user) {
                        tracing::error!(user = %user, error = %e, "index audit failed");
                    }
                }
            }
            Err(e) => tracing::error!(error = %e, "index audit sweep failed to list users"),
        }
        std::thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::tempdir;

    #[test]
    fn known_users_reads_bucket_zero_files() {
        let dir = tempdir().unwrap();
        let mut cfg = Config::default_local();
        cfg.datadisks = (0..=3).map(|i| dir.path().join(format!("drive{i}"))).collect();
        cfg.dbdisks = (0..=3).map(|i| dir.path().join(format!("dbdrive{i}"))).collect();
        let layout = Layout::new(&cfg);

        let index = IndexStore::new(layout.clone());
        index.insert("alice", "f.txt", 4, [0u8; 16]).unwrap();

        let users = known_users(&layout).unwrap();
        assert_eq!(users, vec!["alice".to_string()]);
    }

    #[test]
    fn run_once_repairs_nothing_when_healthy() {
        let dir = tempdir().unwrap();
        let mut cfg = Config::default_local();
        cfg.datadisks = (0..=3).map(|i| dir.path().join(format!("drive{i}"))).collect();
        cfg.dbdisks = (0..=3).map(|i| dir.path().join(format!("dbdrive{i}"))).collect();
        let layout = Layout::new(&cfg);

        let index = IndexStore::new(layout.clone());
        index.insert("alice", "f.txt", 4, [0u8; 16]).unwrap();

        let reports = run_once(&layout, &index).unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].1.repaired.is_none());
    }
}
