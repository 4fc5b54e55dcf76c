//! TCP transport: accepts one client at a time, feeds the shared
//! dispatcher, and runs `manager.clean()` on disconnect or error before
//! returning to `accept`.

use std::io::{self, Write};
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener, TcpStream};

use tracing::{info, warn};

use crate::manager::StreamManager;

use super::{Transport, run_dispatch_loop};

pub const DEFAULT_PORT: u16 = 5050;
const READ_CHUNK: usize = 8192;

struct TcpConnection(TcpStream);

impl Transport for TcpConnection {
    fn read_bytes_into(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut self.0, buf)
    }

    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()> {
        self.0.write_all(buf)?;
        self.0.flush()
    }

    fn close(&mut self) {
        let _ = self.0.shutdown(std::net::Shutdown::Both);
    }
}

/// The host's primary IPv4 address, used when the caller doesn't specify
/// one. Opening a UDP socket and "connecting" it sends no packets — it only
/// asks the routing table which local address would be used — so this
/// needs no network access to succeed.
pub fn default_ipv4() -> Ipv4Addr {
    std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|sock| {
            sock.connect("8.8.8.8:80")?;
            sock.local_addr()
        })
        .map(|addr| match addr.ip() {
            std::net::IpAddr::V4(v4) => v4,
            std::net::IpAddr::V6(_) => Ipv4Addr::LOCALHOST,
        })
        .unwrap_or(Ipv4Addr::LOCALHOST)
}

/// Runs the socket transport forever: bind once, then repeatedly accept a
/// single client, dispatch its requests, and clean up on disconnect.
pub fn run(addr: SocketAddrV4, manager: &StreamManager) -> io::Result<()> {
    let listener = TcpListener::bind(addr)?;
    info!(%addr, "tcp transport listening");
    loop {
        let (stream, peer) = listener.accept()?;
        info!(%peer, "tcp client connected");
        let mut conn = TcpConnection(stream);
        if let Err(err) = run_dispatch_loop(&mut conn, manager, READ_CHUNK) {
            warn!(%peer, %err, "tcp session ended with error");
        } else {
            info!(%peer, "tcp client disconnected");
        }
        conn.close();
        manager.clean();
    }
}
