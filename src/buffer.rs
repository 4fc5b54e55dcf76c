//! `BoundedByteBuffer` — per-stream in-memory FIFO with blocking
//! backpressure and EOF signalling: a single lock, one condition for "room
//! available", one for "data available or EOF".

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use bytes::BytesMut;

struct State {
    buf: BytesMut,
    eof: bool,
}

/// A single-producer/single-consumer bounded byte FIFO.
///
/// `write` blocks while the buffer is full; `read` blocks while the buffer
/// is empty and EOF has not been set, up to the caller's timeout. Closing
/// the owning stream calls `set_eof`, which wakes every waiter — no
/// operation here can wedge the server on shutdown.
pub struct BoundedByteBuffer {
    capacity: usize,
    state: Mutex<State>,
    room_available: Condvar,
    data_available: Condvar,
}

impl BoundedByteBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(State {
                buf: BytesMut::new(),
                eof: false,
            }),
            room_available: Condvar::new(),
            data_available: Condvar::new(),
        }
    }

    /// Blocks until there is room for the whole payload, then appends it
    /// atomically. A payload larger than `capacity` eventually succeeds once
    /// the buffer has fully drained (capacity floors how long the block
    /// lasts, not what can ever be written). Cancelled by EOF: once another
    /// thread calls `set_eof`, a blocked writer wakes, drops the pending
    /// payload, and returns immediately rather than waiting for room that
    /// will never be read out.
    pub fn write(&self, bytes: &[u8]) {
        let mut state = self.state.lock().unwrap();
        while !state.eof && state.buf.len() + bytes.len() > self.capacity && !state.buf.is_empty() {
            state = self.room_available.wait(state).unwrap();
        }
        if state.eof {
            return;
        }
        state.buf.extend_from_slice(bytes);
        drop(state);
        self.data_available.notify_all();
    }

    /// Returns up to `n` bytes. If empty and not at EOF, waits up to
    /// `timeout` (zero means "don't wait") for data to arrive. A short read
    /// is not itself an error — the caller checks `is_eof` to decide
    /// finality.
    pub fn read(&self, n: usize, timeout: Duration) -> Vec<u8> {
        let mut state = self.state.lock().unwrap();
        if state.buf.is_empty() && !state.eof {
            if timeout.is_zero() {
                // no-op: fall through with nothing to take
            } else {
                let deadline = Instant::now() + timeout;
                while state.buf.is_empty() && !state.eof {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let (next, timed_out) = self
                        .data_available
                        .wait_timeout(state, deadline - now)
                        .unwrap();
                    state = next;
                    if timed_out.timed_out() {
                        break;
                    }
                }
            }
        }
        if state.buf.is_empty() {
            return Vec::new();
        }
        let take = n.min(state.buf.len());
        let chunk = state.buf.split_to(take);
        drop(state);
        self.room_available.notify_all();
        chunk.to_vec()
    }

    /// Marks the producer side as finished. Remaining buffered bytes still
    /// drain normally; once empty, readers observe empty reads forever.
    pub fn set_eof(&self) {
        let mut state = self.state.lock().unwrap();
        state.eof = true;
        drop(state);
        self.data_available.notify_all();
        self.room_available.notify_all();
    }

    pub fn is_eof(&self) -> bool {
        self.state.lock().unwrap().eof
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn read_returns_what_was_written() {
        let buf = BoundedByteBuffer::new(1024);
        buf.write(b"hello");
        assert_eq!(buf.read(5, Duration::ZERO), b"hello");
    }

    #[test]
    fn read_on_empty_buffer_without_eof_returns_empty_after_timeout() {
        let buf = BoundedByteBuffer::new(1024);
        let got = buf.read(10, Duration::from_millis(20));
        assert!(got.is_empty());
        assert!(!buf.is_eof());
    }

    #[test]
    fn zero_timeout_does_not_block() {
        let buf = BoundedByteBuffer::new(1024);
        let start = Instant::now();
        let got = buf.read(10, Duration::ZERO);
        assert!(got.is_empty());
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn set_eof_wakes_blocked_reader() {
        let buf = Arc::new(BoundedByteBuffer::new(1024));
        let reader = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || buf.read(10, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(30));
        buf.set_eof();
        let got = reader.join().unwrap();
        assert!(got.is_empty());
        assert!(buf.is_eof());
    }

    #[test]
    fn partial_read_is_not_an_error_and_remainder_survives() {
        let buf = BoundedByteBuffer::new(1024);
        buf.write(b"abcdef");
        let first = buf.read(3, Duration::ZERO);
        assert_eq!(first, b"abc");
        let second = buf.read(3, Duration::ZERO);
        assert_eq!(second, b"def");
    }

    #[test]
    fn write_blocks_until_consumer_drains() {
        let buf = Arc::new(BoundedByteBuffer::new(8));
        buf.write(b"12345678");
        let writer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || buf.write(b"more"))
        };
        thread::sleep(Duration::from_millis(30));
        assert!(!writer.is_finished());
        let _ = buf.read(8, Duration::ZERO);
        writer.join().unwrap();
        assert_eq!(buf.read(4, Duration::from_millis(200)), b"more");
    }

    #[test]
    fn set_eof_wakes_blocked_writer_instead_of_deadlocking() {
        let buf = Arc::new(BoundedByteBuffer::new(8));
        buf.write(b"12345678");
        let writer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || buf.write(b"more"))
        };
        thread::sleep(Duration::from_millis(30));
        assert!(!writer.is_finished());
        buf.set_eof();
        // the writer must return promptly, without the buffer ever draining
        writer.join().unwrap();
    }
}
