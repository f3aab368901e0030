//! Striping engine — write path (`spec.md` §4.1).
//!
//! One reader task owns the source file and answers `(offset, length)`
//! read requests. `N` writer tasks each own one data strip file and pull
//! bytes from the reader in up to `B`-byte rounds. One parity task owns the
//! parity strip file and accumulates the bytewise XOR of each round's `N`
//! buffers before releasing every writer's "allowance" to proceed to the
//! next round — the ordering guarantee from `spec.md` §4.1/§5 that parity
//! byte `o` always equals the XOR of every data strip's byte `o`.
//!
//! Implemented with `std::thread::scope` and `std::sync::mpsc` channels:
//! the stdlib's realization of "parallel tasks with message passing"
//! (`spec.md` §9). The per-writer "allowance" is one unbounded channel per
//! writer (`spec.md` §9 explicitly replaces condition-variable allowance
//! flags with per-writer channels/semaphores); the parity task sends one
//! unit down each after finishing a round.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::thread;

use crate::error::{FoxyError, Result};
use crate::hash::{Digest, Hasher};
use crate::storage::{self, Layout};

use super::layout::{self, payload_len, strip_len_and_padding};

/// Default maximum buffer size per round (`spec.md` §4.1).
pub const DEFAULT_BUF_SIZE: usize = 65536;

struct ReadRequest {
    offset: u64,
    len: usize,
    reply: Sender<std::io::Result<Vec<u8>>>,
}

fn reader_task(mut source: File, rx: Receiver<ReadRequest>) {
    while let Ok(req) = rx.recv() {
        let mut buf = vec![0u8; req.len];
        let result = source
            .seek(SeekFrom::Start(req.offset))
            .and_then(|_| source.read_exact(&mut buf))
            .map(|_| buf);
        // The writer may have already failed and stopped listening; a
        // failed send just means this reply is moot.
        let _ = req.reply.send(result);
    }
}

fn xor_into(acc: &mut [u8], other: &[u8]) {
    for (a, b) in acc.iter_mut().zip(other.iter()) {
        *a ^= b;
    }
}

#[allow(clippy::too_many_arguments)]
fn writer_task(
    out_path: PathBuf,
    strip_len: u64,
    payload_len_here: u64,
    padding: u64,
    is_last: bool,
    src_base: u64,
    buf_size: usize,
    read_tx: Sender<ReadRequest>,
    parity_tx: SyncSender<Vec<u8>>,
    allowance_rx: Receiver<()>,
) -> Result<Digest> {
    let mut out = storage::open_rw(&out_path)?;
    let mut hasher = Hasher::new();
    let (reply_tx, reply_rx) = mpsc::channel::<std::io::Result<Vec<u8>>>();
    let padding_buf = if is_last { layout::padding_bytes(padding) } else { Vec::new() };

    let mut local_pos: u64 = 0;
    while local_pos < strip_len {
        let round_len = std::cmp::min(buf_size as u64, strip_len - local_pos) as usize;
        let mut buf = vec![0u8; round_len];

        let payload_take: usize = if is_last {
            std::cmp::min(payload_len_here.saturating_sub(local_pos), round_len as u64) as usize
        } else {
            round_len
        };

        if payload_take > 0 {
            read_tx
                .send(ReadRequest {
                    offset: src_base + local_pos,
                    len: payload_take,
                    reply: reply_tx.clone(),
                })
                .map_err(|_| FoxyError::io(out_path.clone(), broken_pipe("reader task gone")))?;
            let data = reply_rx
                .recv()
                .map_err(|_| FoxyError::io(out_path.clone(), broken_pipe("reader task gone")))?
                .map_err(|e| FoxyError::io(out_path.clone(), e))?;
            buf[..payload_take].copy_from_slice(&data);
        }
        if payload_take < round_len {
            let pad_offset = (local_pos + payload_take as u64) - payload_len_here;
            let pad_end = pad_offset as usize + (round_len - payload_take);
            buf[payload_take..].copy_from_slice(&padding_buf[pad_offset as usize..pad_end]);
        }

        parity_tx
            .send(buf.clone())
            .map_err(|_| FoxyError::io(out_path.clone(), broken_pipe("parity task gone")))?;
        allowance_rx
            .recv()
            .map_err(|_| FoxyError::io(out_path.clone(), broken_pipe("parity task gone")))?;

        out.write_all(&buf).map_err(|e| FoxyError::io(out_path.clone(), e))?;
        hasher.update(&buf);
        local_pos += round_len as u64;
    }

    let digest = hasher.finalize();
    out.write_all(&digest).map_err(|e| FoxyError::io(out_path.clone(), e))?;
    Ok(digest)
}

fn parity_task(
    out_path: PathBuf,
    n: usize,
    strip_len: u64,
    rx: Receiver<Vec<u8>>,
    allowances: Vec<Sender<()>>,
) -> Result<Digest> {
    let mut out = storage::open_rw(&out_path)?;
    let mut hasher = Hasher::new();
    let mut pos: u64 = 0;

    while pos < strip_len {
        let mut acc: Option<Vec<u8>> = None;
        for _ in 0..n {
            let buf = rx
                .recv()
                .map_err(|_| FoxyError::io(out_path.clone(), broken_pipe("writer task gone")))?;
            acc = Some(match acc {
                None => buf,
                Some(mut a) => {
                    xor_into(&mut a, &buf);
                    a
                }
            });
        }
        let xored = acc.expect("n >= 1 guarantees at least one buffer per round");
        out.write_all(&xored).map_err(|e| FoxyError::io(out_path.clone(), e))?;
        hasher.update(&xored);
        pos += xored.len() as u64;

        for tx in &allowances {
            // A writer that already failed won't be listening; that
            // failure will surface when its own handle is joined.
            let _ = tx.send(());
        }
    }

    let digest = hasher.finalize();
    out.write_all(&digest).map_err(|e| FoxyError::io(out_path.clone(), e))?;
    Ok(digest)
}

fn broken_pipe(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::BrokenPipe, msg)
}

/// Split a source file of `size` bytes into `layout.n()` data strips plus
/// one parity strip for `(user, filename)`, per `spec.md` §4.1.
///
/// On any I/O failure, all strip files created by this call are removed
/// before the error is returned.
pub fn write_file(
    layout: &Layout,
    user: &str,
    filename: &str,
    mut source: File,
    buf_size: usize,
) -> Result<()> {
    crate::names::validate_filename(filename)?;
    layout.ensure_user_dirs(user)?;

    let size = source
        .seek(SeekFrom::End(0))
        .and_then(|_| source.seek(SeekFrom::Start(0)))
        .map_err(|e| FoxyError::io(filename, e))?;

    let n = layout.n();
    let (strip_len, padding) = strip_len_and_padding(size, n);

    let strip_paths: Vec<PathBuf> =
        (0..=n).map(|i| layout.data_strip_path(i, user, filename)).collect();

    let outcome = run_write_rounds(&strip_paths, n, strip_len, padding, source, buf_size);

    match outcome {
        Ok(()) => Ok(()),
        Err(e) => {
            for p in &strip_paths {
                let _ = storage::remove_if_exists(p);
            }
            Err(e)
        }
    }
}

fn run_write_rounds(
    strip_paths: &[PathBuf],
    n: usize,
    strip_len: u64,
    padding: u64,
    source: File,
    buf_size: usize,
) -> Result<()> {
    let (read_tx, read_rx) = mpsc::channel::<ReadRequest>();
    let (parity_tx, parity_rx) = mpsc::sync_channel::<Vec<u8>>(n);
    let mut allowance_senders = Vec::with_capacity(n);
    let mut allowance_receivers = Vec::with_capacity(n);
    for _ in 0..n {
        let (tx, rx) = mpsc::channel::<()>();
        allowance_senders.push(tx);
        allowance_receivers.push(rx);
    }

    thread::scope(|scope| {
        let reader_handle = scope.spawn(move || reader_task(source, read_rx));

        let mut writer_handles = Vec::with_capacity(n);
        for (i, allowance_rx) in allowance_receivers.into_iter().enumerate() {
            let out_path = strip_paths[i].clone();
            let payload_len_here = payload_len(i, n, strip_len, padding);
            let is_last = i + 1 == n;
            let src_base = i as u64 * strip_len;
            let read_tx = read_tx.clone();
            let parity_tx = parity_tx.clone();
            writer_handles.push(scope.spawn(move || {
                writer_task(
                    out_path,
                    strip_len,
                    payload_len_here,
                    padding,
                    is_last,
                    src_base,
                    buf_size,
                    read_tx,
                    parity_tx,
                    allowance_rx,
                )
            }));
        }

        // Drop the coordinator's own channel ends so the reader/parity
        // tasks can observe "all senders gone" once every writer finishes.
        drop(read_tx);
        drop(parity_tx);

        let parity_path = strip_paths[n].clone();
        let parity_handle =
            scope.spawn(move || parity_task(parity_path, n, strip_len, parity_rx, allowance_senders));

        let mut first_err: Option<FoxyError> = None;
        for h in writer_handles {
            if let Err(e) = join_or_err(h, strip_paths[0].as_path()) {
                first_err.get_or_insert(e);
            }
        }
        if let Err(e) = join_or_err(parity_handle, strip_paths[n].as_path()) {
            first_err.get_or_insert(e);
        }
        reader_handle.join().ok();

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    })
}

fn join_or_err<T>(
    handle: thread::ScopedJoinHandle<'_, Result<T>>,
    path: &Path,
) -> Result<()> {
    match handle.join() {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(FoxyError::io(path, broken_pipe("striping task panicked"))),
    }
}
