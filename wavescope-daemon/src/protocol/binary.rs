//! Resynchronising parser for the framed binary wire format.
//!
//! Packet layout (all multi-byte fields little-endian):
//!
//! ```text
//! offset  size  field
//!  0      1     SOF0 = 0xAA
//!  1      1     SOF1 = 0x55
//!  2      1     version = 0x01
//!  3      1     cmd
//!  4      2     seq
//!  6      2     payload_len  (<= 1024)
//!  8      N     payload
//!  8+N    2     crc16 over bytes [2 .. 7+N]
//! ```
//!
//! The parser tolerates arbitrary segmentation of the inbound stream and
//! resynchronises after corruption by advancing a single byte past the
//! current start-of-frame, so a spurious SOF inside a damaged payload
//! cannot hide a real frame that follows it.

use std::collections::VecDeque;

use bytes::{Buf, BytesMut};

use crate::logging::prelude::*;

use super::crc::crc16;
use super::{
    CommandId, Frame, HEADER_LEN, MAX_PAYLOAD, MIN_FRAME_LEN, PROTOCOL_VERSION, ProtocolError,
    SOF0, SOF1, TRAILER_LEN,
};

/// Encode one wire packet. Fails only when the payload exceeds the
/// protocol maximum; a truncated packet is never produced.
pub fn encode_frame(cmd: CommandId, seq: u16, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge { len: payload.len() });
    }

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + TRAILER_LEN);
    out.push(SOF0);
    out.push(SOF1);
    out.push(PROTOCOL_VERSION);
    out.push(cmd as u8);
    out.extend_from_slice(&seq.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);

    let crc = crc16(&out[2..]);
    out.extend_from_slice(&crc.to_le_bytes());

    Ok(out)
}

/// Streaming decoder for the binary wire format.
///
/// Bytes go in through [`feed`](Self::feed) in whatever chunks the
/// transport produces; whole validated frames come out through
/// [`try_pop_frame`](Self::try_pop_frame) in stream order.
#[derive(Debug, Default)]
pub struct BinaryParser {
    buf: BytesMut,
    queue: VecDeque<Frame>,
    crc_errors: u64,
}

impl BinaryParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and drain as many complete frames as possible into the
    /// ready queue. Never blocks, never fails.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);

        while self.buf.len() >= MIN_FRAME_LEN {
            let Some(sof) = find_sof(&self.buf) else {
                // Nothing before a trailing 0xAA can start a frame; the
                // trailing byte may pair with a 0x55 in the next chunk.
                if self.buf.last() == Some(&SOF0) {
                    let garbage = self.buf.len() - 1;
                    self.buf.advance(garbage);
                } else {
                    self.buf.clear();
                }
                return;
            };
            if sof > 0 {
                self.buf.advance(sof);
            }
            if self.buf.len() < MIN_FRAME_LEN {
                return;
            }

            let payload_len = u16::from_le_bytes([self.buf[6], self.buf[7]]) as usize;
            if payload_len > MAX_PAYLOAD {
                self.buf.advance(1);
                self.crc_errors += 1;
                continue;
            }

            let total = HEADER_LEN + payload_len + TRAILER_LEN;
            if self.buf.len() < total {
                return;
            }

            let expect = u16::from_le_bytes([self.buf[total - 2], self.buf[total - 1]]);
            let actual = crc16(&self.buf[2..HEADER_LEN + payload_len]);
            if expect != actual {
                trace!(expect, actual, "Frame CRC mismatch, resyncing");
                self.buf.advance(1);
                self.crc_errors += 1;
                continue;
            }

            let frame = Frame {
                cmd: CommandId::from_wire(self.buf[3]),
                seq: u16::from_le_bytes([self.buf[4], self.buf[5]]),
                payload: self.buf[HEADER_LEN..HEADER_LEN + payload_len].to_vec(),
            };
            self.buf.advance(total);
            self.queue.push_back(frame);
        }
    }

    /// Remove and return the oldest queued frame.
    pub fn try_pop_frame(&mut self) -> Option<Frame> {
        self.queue.pop_front()
    }

    /// True when at least one decoded frame is waiting.
    pub fn has_frames(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Encode a command packet with `seq = 0`.
    pub fn build_command(&self, cmd: CommandId, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        encode_frame(cmd, 0, payload)
    }

    /// Clear buffer, queue and error counter.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.queue.clear();
        self.crc_errors = 0;
    }

    /// Framing errors (bad CRC or oversized length) seen since the last
    /// reset. Monotone between resets; exposed for telemetry.
    pub fn crc_error_count(&self) -> u64 {
        self.crc_errors
    }
}

fn find_sof(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w[0] == SOF0 && w[1] == SOF1)
}
