//! Host-side Synchronous Data Stream I/O (SDSIO) server.
//!
//! A small framed request/response protocol — OPEN, CLOSE, WRITE, READ,
//! PING — lets a client push or pull a named byte stream to or from a file
//! on this host, over a socket, a serial port, or a USB-bulk link. This
//! crate implements the dispatcher, the per-stream file workers, and the
//! transport adapters; it treats the `.sds` record layout itself as an
//! opaque byte stream and is not aware of its contents.
//!
//! # Example
//! Runs a socket server until the process is killed.
//!
//! ```no_run
//! # fn example() -> sdsio_server::error::Result<()> {
//! use sdsio_server::config::Config;
//! use sdsio_server::manager::StreamManager;
//! use sdsio_server::transport::tcp;
//! use std::net::SocketAddrV4;
//!
//! let config = Config::load(".");
//! let manager = StreamManager::new(config);
//! let addr = SocketAddrV4::new(tcp::default_ipv4(), tcp::DEFAULT_PORT);
//! tcp::run(addr, &manager)?;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod stream;
pub mod supervisor;
pub mod transport;

pub use error::{Error, Result};
