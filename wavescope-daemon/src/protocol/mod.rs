//! Wire protocol shared between the daemon and the MCU firmware.
//!
//! Two encodings travel over the same byte pipe: a CRC-protected framed
//! binary format and a line-oriented comma-separated text format kept for
//! legacy firmware. [`ParserMux`] hides the difference behind a single
//! feed/pop interface and can auto-detect which encoding a device speaks.

mod binary;
mod codec;
mod crc;
mod mux;
mod text;

pub use binary::{BinaryParser, encode_frame};
pub use codec::FrameCodec;
pub use crc::crc16;
pub use mux::ParserMux;
pub use text::TextParser;

use serde::{Deserialize, Serialize};
use strum::FromRepr;
use thiserror::Error;

/// First start-of-frame byte.
pub const SOF0: u8 = 0xAA;
/// Second start-of-frame byte.
pub const SOF1: u8 = 0x55;
/// Protocol version carried in every binary frame.
pub const PROTOCOL_VERSION: u8 = 0x01;
/// Largest payload a frame may carry.
pub const MAX_PAYLOAD: usize = 1024;

/// Header: SOF (2) + version (1) + cmd (1) + seq (2) + payload length (2).
pub const HEADER_LEN: usize = 8;
/// Trailer: CRC-16 (2).
pub const TRAILER_LEN: usize = 2;
/// Smallest possible frame (empty payload).
pub const MIN_FRAME_LEN: usize = HEADER_LEN + TRAILER_LEN;

/// Command byte of a frame.
///
/// `StreamData` carries measurement payloads; the rest form the small
/// command/ack vocabulary the firmware understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
#[repr(u8)]
pub enum CommandId {
    Ping = 0x01,
    Ack = 0x02,
    StreamStart = 0x03,
    StreamStop = 0x04,
    SetStreamConfig = 0x05,
    GetVarTable = 0x10,
    ReadMemBatch = 0x11,
    WriteMem = 0x12,
    StreamData = 0x20,
    Unknown = 0xFF,
}

impl CommandId {
    /// Decode a command byte, mapping unrecognized values to `Unknown`.
    pub fn from_wire(value: u8) -> Self {
        Self::from_repr(value).unwrap_or(Self::Unknown)
    }
}

/// One decoded protocol frame, the unit passed from parsers to consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub cmd: CommandId,
    /// Wire sequence number; 0 when the encoder does not assign sequences.
    pub seq: u16,
    pub payload: Vec<u8>,
}

/// Which parser the multiplexer routes bytes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserMode {
    #[default]
    AutoDetect,
    Binary,
    Text,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("payload length {len} exceeds maximum {MAX_PAYLOAD}")]
    PayloadTooLarge { len: usize },
}
