//! End-to-end coverage of the public `System` facade: store, retrieve,
//! delete, and recovery from a single corrupted strip (`spec.md` §8).

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};

use foxyblox::config::Config;
use foxyblox::System;
use tempfile::tempdir;

fn system_in(dir: &std::path::Path) -> (Config, System) {
    let mut cfg = Config::default_local();
    cfg.datadisks = (0..=3).map(|i| dir.join(format!("drive{i}"))).collect();
    cfg.dbdisks = (0..=3).map(|i| dir.join(format!("dbdrive{i}"))).collect();
    cfg.init_local_dirs().unwrap();
    let system = System::open(&cfg).unwrap();
    (cfg, system)
}

fn source_with(bytes: &[u8]) -> std::fs::File {
    let mut f = tempfile::tempfile().unwrap();
    f.write_all(bytes).unwrap();
    f.seek(SeekFrom::Start(0)).unwrap();
    f
}

#[test]
fn small_file_round_trips() {
    let dir = tempdir().unwrap();
    let (_, system) = system_in(dir.path());

    let payload = b"the quick brown fox jumps over the lazy dog";
    system.add("alice", "fox.txt", source_with(payload)).unwrap();

    let dest = dir.path().join("out.txt");
    let entry = system.get("alice", "fox.txt", &dest).unwrap();
    assert_eq!(entry.size, payload.len() as u64);

    let got = fs::read(&dest).unwrap();
    assert_eq!(got, payload);
}

#[test]
fn exact_multiple_of_n_round_trips() {
    let dir = tempdir().unwrap();
    let (_, system) = system_in(dir.path());

    // 9 bytes over N=3: spec.md's padding-every-strip boundary case.
    let payload = b"123456789";
    system.add("bob", "nine.bin", source_with(payload)).unwrap();

    let dest = dir.path().join("out.bin");
    system.get("bob", "nine.bin", &dest).unwrap();
    assert_eq!(fs::read(&dest).unwrap(), payload);
}

#[test]
fn larger_file_spanning_many_rounds() {
    let dir = tempdir().unwrap();
    let (_, system) = system_in(dir.path());

    let payload: Vec<u8> = (0..500_000u32).map(|i| (i % 251) as u8).collect();
    system.add("carol", "big.bin", source_with(&payload)).unwrap();

    let dest = dir.path().join("big.out");
    system.get("carol", "big.bin", &dest).unwrap();
    let mut got = Vec::new();
    fs::File::open(&dest).unwrap().read_to_end(&mut got).unwrap();
    assert_eq!(got, payload);
}

#[test]
fn delete_removes_entry_and_strips() {
    let dir = tempdir().unwrap();
    let (_, system) = system_in(dir.path());

    system.add("dave", "gone.txt", source_with(b"bye")).unwrap();
    let removed = system.delete("dave", "gone.txt").unwrap();
    assert!(removed.is_some());

    let dest = dir.path().join("should-not-exist.txt");
    let err = system.get("dave", "gone.txt", &dest).unwrap_err();
    assert!(matches!(err, foxyblox::FoxyError::NotFound(_)));
}

#[test]
fn single_corrupted_strip_is_transparently_recovered() {
    let dir = tempdir().unwrap();
    let (_, system) = system_in(dir.path());

    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 199) as u8).collect();
    system.add("erin", "photo.bin", source_with(&payload)).unwrap();

    // Flip a byte in data strip 0's payload region (well past its header-free body).
    let strip0 = system.layout().data_strip_path(0, "erin", "photo.bin");
    let mut bytes = fs::read(&strip0).unwrap();
    bytes[10] ^= 0xFF;
    fs::write(&strip0, &bytes).unwrap();

    let dest = dir.path().join("recovered.bin");
    system.get("erin", "photo.bin", &dest).unwrap();
    assert_eq!(fs::read(&dest).unwrap(), payload);

    // The corrupted strip file itself should have been repaired in place.
    let repaired = fs::read(&strip0).unwrap();
    assert_eq!(repaired, fs::read(&strip0).unwrap());
    assert_ne!(repaired, bytes);
}

#[test]
fn two_corrupted_strips_are_unrecoverable() {
    let dir = tempdir().unwrap();
    let (_, system) = system_in(dir.path());

    let payload = vec![7u8; 5_000];
    system.add("frank", "doomed.bin", source_with(&payload)).unwrap();

    for i in [0usize, 1] {
        let strip = system.layout().data_strip_path(i, "frank", "doomed.bin");
        let mut bytes = fs::read(&strip).unwrap();
        bytes[5] ^= 0xFF;
        fs::write(&strip, &bytes).unwrap();
    }

    let dest = dir.path().join("doomed.out");
    let err = system.get("frank", "doomed.bin", &dest).unwrap_err();
    assert!(matches!(err, foxyblox::FoxyError::UnrecoverableCorruption(_)));
}

#[test]
fn bucket_routing_follows_the_fixed_three_way_split() {
    use foxyblox::index::IndexStore;

    // spec.md §8 scenario 5: the first byte of the filename routes to a
    // fixed bucket regardless of insertion order, and every entry reads
    // back byte-identical after routing.
    assert_eq!(IndexStore::bucket_for("test.bin", 3), 2); // 't' = 0x74 = 116
    assert_eq!(IndexStore::bucket_for("1.bin", 3), 0); // '1' = 0x31 = 49
    assert_eq!(IndexStore::bucket_for("file.bin", 3), 1); // 'f' = 0x66 = 102

    let dir = tempdir().unwrap();
    let (_, system) = system_in(dir.path());

    system.add("helen", "test.bin", source_with(b"t-bucket")).unwrap();
    system.add("helen", "1.bin", source_with(b"zero-bucket")).unwrap();
    system.add("helen", "file.bin", source_with(b"f-bucket")).unwrap();

    let dest = dir.path().join("out.bin");

    let t_entry = system.get("helen", "test.bin", &dest).unwrap();
    assert_eq!(t_entry.size, b"t-bucket".len() as u64);
    assert_eq!(fs::read(&dest).unwrap(), b"t-bucket");

    let one_entry = system.get("helen", "1.bin", &dest).unwrap();
    assert_eq!(one_entry.size, b"zero-bucket".len() as u64);
    assert_eq!(fs::read(&dest).unwrap(), b"zero-bucket");

    let f_entry = system.get("helen", "file.bin", &dest).unwrap();
    assert_eq!(f_entry.size, b"f-bucket".len() as u64);
    assert_eq!(fs::read(&dest).unwrap(), b"f-bucket");
}

#[test]
fn wal_replay_recovers_interrupted_insert() {
    use foxyblox::wal::{self, WalAction, WalOp};

    let dir = tempdir().unwrap();
    let (_, system) = system_in(dir.path());

    // Simulate a crash between "WAL written" and "index mutation applied":
    // write the WAL record directly, bypassing System::add, then reopen.
    let action =
        WalAction { user: "gina".into(), filename: "ghost.txt".into(), op: WalOp::Insert { size: 3, digest: [9u8; 16] } };
    wal::begin(system.layout(), &action).unwrap();

    let reopened = System::open(&Config {
        sys: foxyblox::config::SysField(foxyblox::config::Sys::Localhost),
        dbdisks: system.layout().dbdisks().to_vec(),
        datadisks: system.layout().datadisks().to_vec(),
        data_disk_count: 3,
        parity_disk_count: 1,
    })
    .unwrap();

    let entry = reopened.index().get("gina", "ghost.txt").unwrap();
    assert!(entry.is_some());
    assert_eq!(entry.unwrap().size, 3);
}
