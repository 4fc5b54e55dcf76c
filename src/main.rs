use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serial2::{Parity, StopBits};
use tracing_subscriber::EnvFilter;

use sdsio_server::config::Config;
use sdsio_server::manager::StreamManager;
use sdsio_server::supervisor::{self, StatusReporter};
use sdsio_server::transport::{serial::SerialConfig, tcp, usb::UsbConfig};

/// SDSIO host-side server: serves OPEN/CLOSE/WRITE/READ/PING requests over
/// a socket, a serial port, or a USB-bulk link, backed by files in a
/// per-run working directory.
#[derive(Parser)]
#[command(name = "sdsio-server", version, about)]
struct Cli {
    /// Directory holding `sdsio.yml`/`sdsio.yaml` and, by default, the
    /// `.sds` stream files themselves.
    #[arg(long, default_value = ".")]
    workdir: PathBuf,

    #[command(subcommand)]
    transport: TransportCmd,
}

#[derive(Subcommand)]
enum TransportCmd {
    /// Listen on a TCP socket (defaults to the host's primary address).
    Socket {
        #[arg(long)]
        addr: Option<Ipv4Addr>,
        #[arg(long, default_value_t = tcp::DEFAULT_PORT)]
        port: u16,
    },
    /// Open a serial (UART) connection.
    Serial {
        /// Device path, e.g. `/dev/ttyUSB0` or `COM3`.
        port: String,
        #[arg(long, default_value_t = 115_200)]
        baud: u32,
        #[arg(long, value_enum, default_value_t = CliParity::None)]
        parity: CliParity,
        #[arg(long, value_enum, default_value_t = CliStopBits::One)]
        stop_bits: CliStopBits,
        /// Give up after this many seconds if the port never opens; omit to
        /// retry forever.
        #[arg(long)]
        connect_timeout_secs: Option<u64>,
    },
    /// Discover and bind a USB-bulk device advertising the SDSIO client
    /// product string.
    Usb {
        /// Overrides the product string matched during discovery; mainly
        /// for testing against a simulated device.
        #[arg(long)]
        product_string: Option<String>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CliParity {
    None,
    Odd,
    Even,
}

impl From<CliParity> for Parity {
    fn from(p: CliParity) -> Self {
        match p {
            CliParity::None => Parity::None,
            CliParity::Odd => Parity::Odd,
            CliParity::Even => Parity::Even,
        }
    }
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CliStopBits {
    One,
    Two,
}

impl From<CliStopBits> for StopBits {
    fn from(s: CliStopBits) -> Self {
        match s {
            CliStopBits::One => StopBits::One,
            CliStopBits::Two => StopBits::Two,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.workdir);
    let manager = Arc::new(StreamManager::new(config));
    let _status = StatusReporter::spawn(Arc::clone(&manager));

    match cli.transport {
        TransportCmd::Socket { addr, port } => {
            let addr = SocketAddrV4::new(addr.unwrap_or_else(tcp::default_ipv4), port);
            supervisor::run_supervised("socket", &manager, || tcp::run(addr, &manager).map_err(Into::into));
        }
        TransportCmd::Serial { port, baud, parity, stop_bits, connect_timeout_secs } => {
            let cfg = SerialConfig {
                port,
                baud_rate: baud,
                parity: parity.into(),
                stop_bits: stop_bits.into(),
                connect_timeout: connect_timeout_secs.map(Duration::from_secs),
            };
            supervisor::run_supervised("serial", &manager, || {
                sdsio_server::transport::serial::run(&cfg, &manager).map_err(Into::into)
            });
        }
        TransportCmd::Usb { product_string } => {
            let cfg = UsbConfig { product_string };
            supervisor::run_supervised("usb", &manager, || {
                sdsio_server::transport::usb::run(&cfg, &manager)
            });
        }
    }
}
