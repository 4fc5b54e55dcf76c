//! Transport adapters and the shared capability they all implement: the
//! three transports share no common interface in the original
//! implementation but are used interchangeably, so this crate defines the
//! capability set explicitly and makes the dispatcher generic over it.

pub mod serial;
pub mod tcp;
pub mod usb;

use std::io;

use tracing::warn;

use crate::manager::StreamManager;
use crate::protocol::{self, FrameAccumulator};

/// The capability every transport provides to the dispatcher: read bytes
/// in, write bytes out, and an explicit close. Implemented for TCP, serial,
/// and (at the byte-queue level) USB.
pub trait Transport {
    fn read_bytes_into(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()>;
    fn close(&mut self) {}
}

/// Runs the shared dispatch loop over any `Transport`: read chunks, feed an
/// accumulator, dispatch every complete frame, flush the response before
/// reading again — response ordering matters for every transport, not just
/// TCP. Returns once the transport reports an error or EOF, at which point
/// the caller is expected to `clean()` the manager.
pub fn run_dispatch_loop<T: Transport>(
    transport: &mut T,
    manager: &StreamManager,
    read_chunk: usize,
) -> io::Result<()> {
    let mut acc = FrameAccumulator::new();
    let mut chunk = vec![0u8; read_chunk];
    loop {
        let n = transport.read_bytes_into(&mut chunk)?;
        if n == 0 {
            return Ok(());
        }
        acc.feed(&chunk[..n]);
        while let Some((header, payload)) = acc.try_take() {
            if let Some(response) = protocol::dispatch(manager, header, payload) {
                if let Err(err) = transport.write_bytes(&response) {
                    warn!(%err, "dispatch: failed to write response");
                    return Err(err);
                }
            }
        }
    }
}
