//! Serial (UART) transport: opens with retry, then feeds the shared
//! dispatcher from a persistent accumulator fed by short, timeout-bounded
//! reads.

use std::io;
use std::time::{Duration, Instant};

use serial2::{CharSize, Parity, SerialPort, StopBits};
use tracing::{info, warn};

use crate::manager::StreamManager;
use crate::protocol::FrameAccumulator;

use super::Transport;

const OPEN_RETRY_INTERVAL: Duration = Duration::from_millis(500);
const READ_CHUNK: usize = 16 * 1024;
const READ_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub parity: Parity,
    pub stop_bits: StopBits,
    /// `None` means retry forever.
    pub connect_timeout: Option<Duration>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115_200,
            parity: Parity::None,
            stop_bits: StopBits::One,
            connect_timeout: None,
        }
    }
}

struct SerialConnection(SerialPort);

impl Transport for SerialConnection {
    fn read_bytes_into(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0.read(buf) {
            Ok(n) => Ok(n),
            Err(err) if err.kind() == io::ErrorKind::TimedOut || err.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(err) => Err(err),
        }
    }

    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()> {
        self.0.write_all(buf)
    }

    fn close(&mut self) {
        let _ = self.0.discard_buffers();
    }
}

/// Opens the serial port, retrying every 500 ms until success or
/// `connect_timeout` elapses. `connect_timeout == None` retries forever.
fn open_with_retry(cfg: &SerialConfig) -> io::Result<SerialPort> {
    let start = Instant::now();
    loop {
        let opened = SerialPort::open(&cfg.port, |settings: &mut serial2::Settings| {
            settings.set_raw();
            settings.set_baud_rate(cfg.baud_rate)?;
            settings.set_char_size(CharSize::Bits8);
            settings.set_parity(cfg.parity);
            settings.set_stop_bits(cfg.stop_bits);
            Ok(())
        });
        match opened {
            Ok(mut port) => {
                port.set_read_timeout(READ_TIMEOUT)?;
                return Ok(port);
            }
            Err(err) => {
                if let Some(timeout) = cfg.connect_timeout {
                    if start.elapsed() >= timeout {
                        return Err(err);
                    }
                }
                warn!(port = %cfg.port, %err, "serial open failed, retrying");
                std::thread::sleep(OPEN_RETRY_INTERVAL);
            }
        }
    }
}

/// Runs the serial transport once: open (with retry), then dispatch until
/// a read/write error, at which point the caller's supervisor restarts us.
pub fn run(cfg: &SerialConfig, manager: &StreamManager) -> io::Result<()> {
    let port = open_with_retry(cfg)?;
    info!(port = %cfg.port, baud = cfg.baud_rate, "serial transport opened");
    let mut conn = SerialConnection(port);

    let mut acc = FrameAccumulator::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    let result = loop {
        match conn.read_bytes_into(&mut chunk) {
            Ok(0) => continue,
            Ok(n) => acc.feed(&chunk[..n]),
            Err(err) => break Err(err),
        }
        let mut dispatch_err = None;
        while let Some((header, payload)) = acc.try_take() {
            if let Some(response) = crate::protocol::dispatch(manager, header, payload) {
                if let Err(err) = conn.write_bytes(&response) {
                    dispatch_err = Some(err);
                    break;
                }
            }
        }
        if let Some(err) = dispatch_err {
            break Err(err);
        }
    };
    conn.close();
    result
}
