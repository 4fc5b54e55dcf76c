//! Frame codec and dispatcher: 16-byte little-endian headers, request
//! accumulation across arbitrarily fragmented reads, and response framing.

use bytes::{Buf, BufMut, BytesMut};
use tracing::warn;

use crate::manager::StreamManager;

pub const HEADER_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmd {
    Open,
    Close,
    Write,
    Read,
    Ping,
}

impl Cmd {
    fn from_wire(v: u32) -> Option<Cmd> {
        match v {
            1 => Some(Cmd::Open),
            2 => Some(Cmd::Close),
            3 => Some(Cmd::Write),
            4 => Some(Cmd::Read),
            5 => Some(Cmd::Ping),
            _ => None,
        }
    }

    fn to_wire(self) -> u32 {
        match self {
            Cmd::Open => 1,
            Cmd::Close => 2,
            Cmd::Write => 3,
            Cmd::Read => 4,
            Cmd::Ping => 5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub cmd_raw: u32,
    pub sid: u32,
    pub arg: u32,
    pub data_size: u32,
}

impl Header {
    fn parse(bytes: &[u8]) -> Header {
        debug_assert_eq!(bytes.len(), HEADER_SIZE);
        Header {
            cmd_raw: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            sid: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            arg: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            data_size: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
        }
    }
}

fn encode_header(buf: &mut BytesMut, cmd: u32, sid: u32, arg: u32, data_size: u32) {
    buf.put_u32_le(cmd);
    buf.put_u32_le(sid);
    buf.put_u32_le(arg);
    buf.put_u32_le(data_size);
}

/// Accumulates bytes from a transport, however fragmented, and yields
/// complete `(Header, payload)` requests. One request can span many reads;
/// one read can contain many requests plus a partial tail — no frame is
/// ever partially dispatched.
#[derive(Default)]
pub struct FrameAccumulator {
    buf: BytesMut,
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds newly-read bytes into the accumulator.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pops one complete request if the accumulator currently holds one.
    pub fn try_take(&mut self) -> Option<(Header, Vec<u8>)> {
        if self.buf.len() < HEADER_SIZE {
            return None;
        }
        let header = Header::parse(&self.buf[..HEADER_SIZE]);
        let total = HEADER_SIZE + header.data_size as usize;
        if self.buf.len() < total {
            return None;
        }
        self.buf.advance(HEADER_SIZE);
        let payload = self.buf.split_to(header.data_size as usize).to_vec();
        Some((header, payload))
    }
}

/// Invokes the matching `StreamManager` op and encodes the response frame,
/// if any. Returns `None` for ops that produce no acknowledgement (CLOSE,
/// WRITE) and for unknown commands.
pub fn dispatch(manager: &StreamManager, header: Header, payload: Vec<u8>) -> Option<Vec<u8>> {
    let Some(cmd) = Cmd::from_wire(header.cmd_raw) else {
        warn!(cmd = header.cmd_raw, "dispatch: unknown command");
        return None;
    };

    match cmd {
        Cmd::Open => {
            let name = String::from_utf8_lossy(&payload)
                .trim_end_matches('\0')
                .to_string();
            let outcome = manager.open(header.arg, &name);
            let mut resp = BytesMut::with_capacity(HEADER_SIZE);
            encode_header(&mut resp, Cmd::Open.to_wire(), outcome.sid, outcome.mode, 0);
            Some(resp.to_vec())
        }
        Cmd::Close => {
            manager.close(header.sid);
            None
        }
        Cmd::Write => {
            manager.write(header.sid, &payload);
            None
        }
        Cmd::Read => {
            let outcome = manager.read(header.sid, header.arg);
            let mut resp = BytesMut::with_capacity(HEADER_SIZE + outcome.data.len());
            encode_header(
                &mut resp,
                Cmd::Read.to_wire(),
                header.sid,
                outcome.eof as u32,
                outcome.data.len() as u32,
            );
            resp.extend_from_slice(&outcome.data);
            Some(resp.to_vec())
        }
        Cmd::Ping => {
            manager.ping(header.sid);
            let mut resp = BytesMut::with_capacity(HEADER_SIZE);
            encode_header(&mut resp, Cmd::Ping.to_wire(), header.sid, 1, 0);
            Some(resp.to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AllocatorConfig, Config};

    fn manager() -> (tempfile::TempDir, StreamManager) {
        let dir = tempfile::tempdir().unwrap();
        let mgr = StreamManager::new(Config {
            dir: dir.path().to_path_buf(),
            allocator: AllocatorConfig::default(),
        });
        (dir, mgr)
    }

    fn open_frame(mode: u32, name: &str) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_header(&mut buf, 1, 0, mode, name.len() as u32);
        buf.extend_from_slice(name.as_bytes());
        buf.to_vec()
    }

    #[test]
    fn byte_at_a_time_equals_whole_frame() {
        let (_dir, mgr) = manager();
        let frame = open_frame(1, "sensor");

        let mut acc = FrameAccumulator::new();
        let mut whole = FrameAccumulator::new();
        whole.feed(&frame);
        let (h_whole, p_whole) = whole.try_take().unwrap();

        for byte in &frame {
            assert!(acc.try_take().is_none());
            acc.feed(std::slice::from_ref(byte));
        }
        let (h_piecewise, p_piecewise) = acc.try_take().unwrap();

        assert_eq!(h_whole.cmd_raw, h_piecewise.cmd_raw);
        assert_eq!(h_whole.arg, h_piecewise.arg);
        assert_eq!(p_whole, p_piecewise);

        let resp_whole = dispatch(&mgr, h_whole, p_whole);
        assert!(resp_whole.is_some());
    }

    #[test]
    fn concatenated_frames_dispatch_in_order() {
        let (_dir, mgr) = manager();
        let mut combined = Vec::new();
        combined.extend(open_frame(1, "a"));
        combined.extend(open_frame(1, "b"));

        let mut acc = FrameAccumulator::new();
        acc.feed(&combined);

        let (h1, p1) = acc.try_take().unwrap();
        let (h2, p2) = acc.try_take().unwrap();
        assert!(acc.try_take().is_none());

        let r1 = dispatch(&mgr, h1, p1).unwrap();
        let r2 = dispatch(&mgr, h2, p2).unwrap();
        let sid1 = u32::from_le_bytes(r1[4..8].try_into().unwrap());
        let sid2 = u32::from_le_bytes(r2[4..8].try_into().unwrap());
        assert_eq!(sid1, 1);
        assert_eq!(sid2, 2);
    }

    #[test]
    fn open_success_echoes_cmd_sid_and_mode() {
        let (_dir, mgr) = manager();
        let (header, payload) = {
            let mut acc = FrameAccumulator::new();
            acc.feed(&open_frame(1, "sensor"));
            acc.try_take().unwrap()
        };
        let resp = dispatch(&mgr, header, payload).unwrap();
        let cmd = u32::from_le_bytes(resp[0..4].try_into().unwrap());
        let sid = u32::from_le_bytes(resp[4..8].try_into().unwrap());
        let mode = u32::from_le_bytes(resp[8..12].try_into().unwrap());
        assert_eq!(cmd, 1);
        assert_ne!(sid, 0);
        assert_eq!(mode, 1);
    }

    #[test]
    fn close_and_write_produce_no_response() {
        let (_dir, mgr) = manager();
        let mut buf = BytesMut::new();
        encode_header(&mut buf, 2, 1, 0, 0);
        let mut acc = FrameAccumulator::new();
        acc.feed(&buf);
        let (header, payload) = acc.try_take().unwrap();
        assert!(dispatch(&mgr, header, payload).is_none());
    }

    #[test]
    fn unknown_command_produces_no_response() {
        let (_dir, mgr) = manager();
        let mut buf = BytesMut::new();
        encode_header(&mut buf, 99, 0, 0, 0);
        let mut acc = FrameAccumulator::new();
        acc.feed(&buf);
        let (header, payload) = acc.try_take().unwrap();
        assert!(dispatch(&mgr, header, payload).is_none());
    }

    #[test]
    fn ping_returns_cmd_5_arg_1() {
        let (_dir, mgr) = manager();
        let mut buf = BytesMut::new();
        encode_header(&mut buf, 5, 0, 0, 0);
        let mut acc = FrameAccumulator::new();
        acc.feed(&buf);
        let (header, payload) = acc.try_take().unwrap();
        let resp = dispatch(&mgr, header, payload).unwrap();
        let cmd = u32::from_le_bytes(resp[0..4].try_into().unwrap());
        let arg = u32::from_le_bytes(resp[8..12].try_into().unwrap());
        assert_eq!(cmd, 5);
        assert_eq!(arg, 1);
    }
}
