//! `StreamManager` owns the `sid -> Stream` map, `sid` allocation, and the
//! five request ops. The manager mutex protects only `sid` allocation and
//! the name-uniqueness check — everything else (file I/O, buffer traffic)
//! happens outside the lock, on the stream's own worker or directly against
//! its buffer.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::Config;
use crate::stream::{self, Mode, Stream};

const READ_POLL: Duration = Duration::from_millis(50);

struct ManagerState {
    next_sid: u32,
    streams: HashMap<u32, Stream>,
}

pub struct StreamManager {
    dir: PathBuf,
    config: Config,
    state: Mutex<ManagerState>,
    /// Millis since `started_at` of the last WRITE/READ that moved data;
    /// polled by `supervisor::StatusReporter` to blink an activity dot.
    last_activity_millis: AtomicU64,
    started_at: Instant,
}

/// Outcome of an OPEN request, already shaped for the wire: `sid == 0`
/// signals failure regardless of the mode echoed back.
pub struct OpenOutcome {
    pub sid: u32,
    pub mode: u32,
}

/// Outcome of a READ request.
pub struct ReadOutcome {
    pub eof: bool,
    pub data: Vec<u8>,
}

impl StreamManager {
    pub fn new(config: Config) -> Self {
        let dir = config.dir.clone();
        Self {
            dir,
            config,
            state: Mutex::new(ManagerState {
                next_sid: 0,
                streams: HashMap::new(),
            }),
            last_activity_millis: AtomicU64::new(u64::MAX),
            started_at: Instant::now(),
        }
    }

    fn mark_active(&self) {
        let millis = self.started_at.elapsed().as_millis() as u64;
        self.last_activity_millis.store(millis, Ordering::Relaxed);
    }

    /// Whether a WRITE or READ moved data within the last `window`. Used by
    /// `supervisor::StatusReporter` to decide whether to print an activity
    /// dot this tick. Before the first WRITE/READ, `last_activity_millis`
    /// still holds its `u64::MAX` sentinel, which reads as "never".
    pub fn recently_active(&self, window: Duration) -> bool {
        let last = self.last_activity_millis.load(Ordering::Relaxed);
        if last == u64::MAX {
            return false;
        }
        let now = self.started_at.elapsed().as_millis() as u64;
        now.saturating_sub(last) <= window.as_millis() as u64
    }

    /// OPEN(mode, name).
    pub fn open(&self, mode: u32, name: &str) -> OpenOutcome {
        let Some(mode) = Mode::from_wire(mode) else {
            warn!(mode, "open: unsupported mode");
            return OpenOutcome { sid: 0, mode };
        };

        if !stream::validate_name(name) {
            warn!(name, "open: invalid stream name");
            return OpenOutcome { sid: 0, mode: mode.to_wire() };
        }

        let mut state = self.state.lock().unwrap();
        if state.streams.values().any(|s| s.name == name) {
            warn!(name, "open: stream already open");
            return OpenOutcome { sid: 0, mode: mode.to_wire() };
        }

        let opened = match mode {
            Mode::Write => {
                let alloc = stream::IndexAllocator::new(&self.config.allocator);
                match alloc.next(&self.dir, name) {
                    Some(idx) => stream::Stream::open_write(state.next_sid + 1, &self.dir, name, idx)
                        .map_err(|err| warn!(name, %err, "open: failed to create write file")),
                    None => {
                        warn!(name, "open: index allocator exhausted");
                        Err(())
                    }
                }
            }
            Mode::Read => {
                let (_idx, path) = stream::resolve_read_index(&self.dir, name);
                if !path.exists() {
                    warn!(name, path = %path.display(), "open: read source missing");
                    Err(())
                } else {
                    stream::Stream::open_read(state.next_sid + 1, &path, name)
                        .map_err(|err| warn!(name, %err, "open: failed to open read file"))
                }
            }
        };

        let Ok(stream) = opened else {
            return OpenOutcome { sid: 0, mode: mode.to_wire() };
        };

        state.next_sid += 1;
        let sid = state.next_sid;
        state.streams.insert(sid, stream);
        info!(sid, name, %mode, "stream opened");
        OpenOutcome { sid, mode: mode.to_wire() }
    }

    /// CLOSE(sid) — unknown sids are a no-op.
    pub fn close(&self, sid: u32) {
        let removed = {
            let mut state = self.state.lock().unwrap();
            state.streams.remove(&sid)
        };
        if let Some(mut stream) = removed {
            stream.close();
            info!(sid, name = %stream.name, "stream closed");
        }
    }

    /// WRITE(sid, data) — discarded silently if `sid` isn't open for write.
    pub fn write(&self, sid: u32, data: &[u8]) {
        let buffer = {
            let state = self.state.lock().unwrap();
            state
                .streams
                .get(&sid)
                .filter(|s| s.mode == Mode::Write)
                .map(|s| s.buffer.clone())
        };
        match buffer {
            Some(buffer) => {
                buffer.write(data);
                self.mark_active();
            }
            None => warn!(sid, "write: stream not open for write"),
        }
    }

    /// READ(sid, size) — pulls until `size` bytes gathered or the buffer
    /// runs dry; `eof` is set only when nothing at all was gathered and the
    /// buffer has reached EOF.
    pub fn read(&self, sid: u32, size: u32) -> ReadOutcome {
        let buffer = {
            let state = self.state.lock().unwrap();
            state
                .streams
                .get(&sid)
                .filter(|s| s.mode == Mode::Read)
                .map(|s| s.buffer.clone())
        };
        let Some(buffer) = buffer else {
            return ReadOutcome { eof: false, data: Vec::new() };
        };

        let size = size as usize;
        let mut data = Vec::with_capacity(size.min(1 << 20));
        while data.len() < size {
            let chunk = buffer.read(size - data.len(), READ_POLL);
            if chunk.is_empty() {
                break;
            }
            data.extend_from_slice(&chunk);
        }
        if !data.is_empty() {
            self.mark_active();
        }
        let eof = data.is_empty() && buffer.is_eof();
        ReadOutcome { eof, data }
    }

    /// PING(sid) — always succeeds.
    pub fn ping(&self, _sid: u32) {}

    /// Closes every open stream as if each had received CLOSE. Called on
    /// transport disconnect or fatal transport error.
    pub fn clean(&self) {
        let streams = {
            let mut state = self.state.lock().unwrap();
            std::mem::take(&mut state.streams)
        };
        for (sid, mut stream) in streams {
            stream.close();
            info!(sid, name = %stream.name, "stream closed during clean");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AllocatorConfig;

    fn manager_in(dir: &std::path::Path) -> StreamManager {
        StreamManager::new(Config {
            dir: dir.to_path_buf(),
            allocator: AllocatorConfig::default(),
        })
    }

    #[test]
    fn open_write_close_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_in(dir.path());
        let open = mgr.open(1, "sensor");
        assert_eq!(open.sid, 1);
        mgr.write(open.sid, b"hello");
        mgr.close(open.sid);
        let contents = std::fs::read(dir.path().join("sensor.0.sds")).unwrap();
        assert_eq!(contents, b"hello");
    }

    #[test]
    fn write_index_bumps_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_in(dir.path());
        for expected_idx in 0..3 {
            let open = mgr.open(1, "sensor");
            assert_ne!(open.sid, 0);
            mgr.close(open.sid);
            assert!(dir.path().join(format!("sensor.{expected_idx}.sds")).exists());
        }
    }

    #[test]
    fn duplicate_open_rejected_until_closed() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_in(dir.path());
        let first = mgr.open(1, "x");
        assert_eq!(first.sid, 1);
        let second = mgr.open(1, "x");
        assert_eq!(second.sid, 0);
        mgr.close(first.sid);
        let third = mgr.open(1, "x");
        assert_ne!(third.sid, 0);
    }

    #[test]
    fn bad_name_rejected_no_file_created() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_in(dir.path());
        let open = mgr.open(1, "a/b");
        assert_eq!(open.sid, 0);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn read_with_cursor_advance() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.0.sds"), b"A").unwrap();
        std::fs::write(dir.path().join("data.1.sds"), b"BB").unwrap();
        let mgr = manager_in(dir.path());

        let first = mgr.open(0, "data");
        assert_ne!(first.sid, 0);
        let mut collected = Vec::new();
        loop {
            let r = mgr.read(first.sid, 16);
            collected.extend(r.data);
            if r.eof {
                break;
            }
        }
        assert_eq!(collected, b"A");
        mgr.close(first.sid);

        let second = mgr.open(0, "data");
        assert_ne!(second.sid, 0);
        let mut collected = Vec::new();
        loop {
            let r = mgr.read(second.sid, 16);
            collected.extend(r.data);
            if r.eof {
                break;
            }
        }
        assert_eq!(collected, b"BB");
        mgr.close(second.sid);

        assert_eq!(
            std::fs::read_to_string(dir.path().join("data.index.txt")).unwrap(),
            "2"
        );
    }

    #[test]
    fn read_of_size_zero_reports_no_eof_when_not_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.0.sds"), b"payload").unwrap();
        let mgr = manager_in(dir.path());
        let open = mgr.open(0, "data");
        let r = mgr.read(open.sid, 0);
        assert!(!r.eof);
        assert!(r.data.is_empty());
        mgr.close(open.sid);
    }

    #[test]
    fn ping_always_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_in(dir.path());
        mgr.ping(0);
        mgr.ping(42);
    }

    #[test]
    fn clean_closes_every_open_stream() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager_in(dir.path());
        let a = mgr.open(1, "a");
        let b = mgr.open(1, "b");
        mgr.write(a.sid, b"x");
        mgr.write(b.sid, b"y");
        mgr.clean();
        assert!(dir.path().join("a.0.sds").exists());
        assert!(dir.path().join("b.0.sds").exists());
        // streams are gone, so re-opening the same names succeeds
        let reopened = mgr.open(1, "a");
        assert_ne!(reopened.sid, 0);
    }
}
