//! Byte-pipe transport abstraction.
//!
//! The daemon only needs a handful of operations from whatever carries
//! the wire protocol: open, close, write, and a read that waits for the
//! next batch of bytes. The serial adapter in [`serial`] is the one
//! production implementation; tests substitute in-memory pipes.

pub mod serial;

pub use serial::SerialTransport;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Connection lifecycle reported to event subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Settings for opening a serial link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    /// 1 or 2.
    pub stop_bits: u8,
    /// 0 = none, 1 = odd, 2 = even.
    pub parity: u8,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 921_600,
            data_bits: 8,
            stop_bits: 1,
            parity: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not open")]
    NotOpen,

    #[error("unsupported {field} value {value}")]
    UnsupportedConfig { field: &'static str, value: u8 },

    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A byte pipe carrying the wire protocol.
#[async_trait]
pub trait Transport: Send {
    /// Open the pipe described by `config`. An already-open transport is
    /// closed first.
    async fn open(&mut self, config: &TransportConfig) -> Result<(), TransportError>;

    /// Close the pipe. Idempotent.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Write `bytes`, returning how many were accepted.
    async fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError>;

    /// Read whatever is available into `buf`, waiting for at least one
    /// byte. Returns 0 only when the pipe has closed.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}
