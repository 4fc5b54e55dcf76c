//! Crate-wide error type.
//!
//! Mirrors the flat, `#[from]`-heavy shape of a typical hardware-transport
//! crate's error enum: most variants simply wrap an underlying I/O or parse
//! failure, and nothing here is meant to propagate past a stream or
//! transport boundary — callers at those edges turn an `Error` into a
//! frame-level outcome or a session restart, never a panic.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid stream name: {0:?}")]
    InvalidName(String),

    #[error("unknown stream id: {0}")]
    StreamNotFound(u32),

    #[error("index allocator exhausted")]
    AllocatorExhausted,

    #[error("usb error: {0}")]
    Usb(String),

    #[error("config error: {0}")]
    Config(String),
}
