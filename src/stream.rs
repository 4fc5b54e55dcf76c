//! Per-stream state: the `Stream` itself, its background worker, and the
//! WRITE-mode `IndexAllocator`.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use derive_more::Display;
use tracing::{debug, warn};

use crate::buffer::BoundedByteBuffer;
use crate::config::AllocatorConfig;

/// WRITE streams get a generous buffer since the producer (the transport)
/// is typically far faster than disk; READ streams get a smaller one since
/// the file is the producer and the network is usually the bottleneck.
pub const WRITE_BUFFER_CAPACITY: usize = 100 * 1024 * 1024;
pub const READ_BUFFER_CAPACITY: usize = 10 * 1024 * 1024;

const WRITE_CHUNK: usize = 64 * 1024;
const READ_CHUNK: usize = 128 * 1024;
const BUFFER_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
}

impl Mode {
    pub fn from_wire(v: u32) -> Option<Mode> {
        match v {
            0 => Some(Mode::Read),
            1 => Some(Mode::Write),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            Mode::Read => 0,
            Mode::Write => 1,
        }
    }
}

/// Characters forbidden in a stream name: any byte < 0x20, 0x7F, and
/// `" * / : < > ? \ |`.
fn is_forbidden(byte: u8) -> bool {
    byte < 0x20 || byte == 0x7F || b"\"*/:<>?\\|".contains(&byte)
}

/// Validates a stream name against the forbidden-character rule. Names may
/// not be empty and may not contain a NUL (already excluded by `< 0x20`).
pub fn validate_name(name: &str) -> bool {
    !name.is_empty() && !name.bytes().any(is_forbidden)
}

/// Draws the on-disk index for a WRITE-mode stream.
pub struct IndexAllocator<'a> {
    config: &'a AllocatorConfig,
}

impl<'a> IndexAllocator<'a> {
    pub fn new(config: &'a AllocatorConfig) -> Self {
        Self { config }
    }

    /// Smallest index for which `<dir>/<name>.<idx>.sds` doesn't yet exist,
    /// drawn from the configured range or explicit list. Returns `None` if
    /// the allocator is exhausted.
    pub fn next(&self, dir: &Path, name: &str) -> Option<u32> {
        match self.config {
            AllocatorConfig::Range { start, end } => {
                let mut idx = *start;
                loop {
                    if idx > *end {
                        return None;
                    }
                    if !path_for(dir, name, idx).exists() {
                        return Some(idx);
                    }
                    idx += 1;
                }
            }
            AllocatorConfig::List(list) => list
                .iter()
                .copied()
                .find(|&idx| !path_for(dir, name, idx).exists()),
        }
    }
}

pub fn path_for(dir: &Path, name: &str, idx: u32) -> PathBuf {
    dir.join(format!("{name}.{idx}.sds"))
}

fn cursor_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.index.txt"))
}

/// Reads the READ-mode cursor, resolves the source file, and advances the
/// cursor file: writes `idx+1` on a hit, `idx` on a miss.
pub fn resolve_read_index(dir: &Path, name: &str) -> (u32, PathBuf) {
    let cursor = cursor_path(dir, name);
    let idx = std::fs::read_to_string(&cursor)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .unwrap_or(0);
    let path = path_for(dir, name, idx);
    let exists = path.exists();
    let next = if exists { idx + 1 } else { idx };
    if let Err(err) = std::fs::write(&cursor, next.to_string()) {
        warn!(cursor = %cursor.display(), %err, "failed to advance read cursor");
    }
    (idx, path)
}

/// One open stream: its file, its buffer, and the background worker that
/// bridges the two. `close()` is the only sanctioned termination path.
pub struct Stream {
    pub name: String,
    pub mode: Mode,
    pub buffer: Arc<BoundedByteBuffer>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Stream {
    pub fn open_write(sid: u32, dir: &Path, name: &str, idx: u32) -> std::io::Result<Stream> {
        let path = path_for(dir, name, idx);
        let file = File::create(&path)?;
        let buffer = Arc::new(BoundedByteBuffer::new(WRITE_BUFFER_CAPACITY));
        let stop = Arc::new(AtomicBool::new(false));
        let worker = std::thread::Builder::new()
            .name(format!("sdsio-write-{sid}"))
            .spawn({
                let buffer = Arc::clone(&buffer);
                move || write_worker(sid, file, buffer)
            })
            .expect("failed to spawn write worker thread");
        Ok(Stream {
            name: name.to_string(),
            mode: Mode::Write,
            buffer,
            stop,
            worker: Some(worker),
        })
    }

    pub fn open_read(sid: u32, path: &Path, name: &str) -> std::io::Result<Stream> {
        let file = File::open(path)?;
        let buffer = Arc::new(BoundedByteBuffer::new(READ_BUFFER_CAPACITY));
        let stop = Arc::new(AtomicBool::new(false));
        let worker = std::thread::Builder::new()
            .name(format!("sdsio-read-{sid}"))
            .spawn({
                let buffer = Arc::clone(&buffer);
                let stop = Arc::clone(&stop);
                move || read_worker(sid, file, buffer, stop)
            })
            .expect("failed to spawn read worker thread");
        Ok(Stream {
            name: name.to_string(),
            mode: Mode::Read,
            buffer,
            stop,
            worker: Some(worker),
        })
    }

    /// Signals EOF (and, for READ streams, a stop flag) and joins the
    /// worker. Joining an already-finished worker (e.g. one that died on a
    /// file error) is a no-op, so this is always safe to call.
    pub fn close(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.buffer.set_eof();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(stream = %self.name, "stream worker thread panicked");
            }
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.close();
        }
    }
}

/// Drains the write buffer to disk in ~64 KiB chunks. On EOF, drains
/// whatever remains and exits; on file error, logs and exits early — the
/// manager observes this stream as degraded, not the process as crashed.
/// The file handle is closed here, on the worker's own exit path, never by
/// the op thread.
fn write_worker(sid: u32, mut file: File, buffer: Arc<BoundedByteBuffer>) {
    loop {
        let chunk = buffer.read(WRITE_CHUNK, BUFFER_POLL);
        if !chunk.is_empty() {
            if let Err(err) = file.write_all(&chunk) {
                warn!(sid, %err, "write worker: file error, terminating stream");
                return;
            }
            continue;
        }
        if buffer.is_eof() {
            loop {
                let rest = buffer.read(WRITE_CHUNK, Duration::ZERO);
                if rest.is_empty() {
                    break;
                }
                if let Err(err) = file.write_all(&rest) {
                    warn!(sid, %err, "write worker: file error draining tail");
                    return;
                }
            }
            debug!(sid, "write worker finished");
            return;
        }
    }
}

/// Pumps the source file into the read buffer in ~128 KiB chunks until EOF
/// or a stop request, then marks the buffer EOF and exits. The file handle
/// is closed here, on the worker's own exit path.
fn read_worker(sid: u32, mut file: File, buffer: Arc<BoundedByteBuffer>, stop: Arc<AtomicBool>) {
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        if stop.load(Ordering::SeqCst) {
            buffer.set_eof();
            return;
        }
        match file.read(&mut chunk) {
            Ok(0) => {
                buffer.set_eof();
                debug!(sid, "read worker reached file eof");
                return;
            }
            Ok(n) => buffer.write(&chunk[..n]),
            Err(err) => {
                warn!(sid, %err, "read worker: file error, terminating stream");
                buffer.set_eof();
                return;
            }
        }
    }
}
