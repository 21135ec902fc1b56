//! Line-oriented text ingestion for legacy plotter-style firmware.
//!
//! Devices in this mode emit one record per line: comma-separated decimal
//! floats terminated by `\n`. Each non-empty line surfaces as a
//! `StreamData` frame whose payload is the trimmed line; downstream
//! decoding of the individual values happens in the stream decoder.

use std::collections::VecDeque;

use bytes::{Buf, BytesMut};

use super::{CommandId, Frame};

#[derive(Debug, Default)]
pub struct TextParser {
    buf: BytesMut,
    queue: VecDeque<Frame>,
}

impl TextParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes; every `\n` completes a record. Blank lines are
    /// skipped, surrounding whitespace (including `\r`) is trimmed.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);

        while let Some(end) = self.buf.iter().position(|&b| b == b'\n') {
            let line = self.buf.split_to(end);
            self.buf.advance(1);

            let trimmed = line.trim_ascii();
            if trimmed.is_empty() {
                continue;
            }
            self.queue.push_back(Frame {
                cmd: CommandId::StreamData,
                seq: 0,
                payload: trimmed.to_vec(),
            });
        }
    }

    /// Remove and return the oldest queued frame.
    pub fn try_pop_frame(&mut self) -> Option<Frame> {
        self.queue.pop_front()
    }

    /// True when at least one complete line is waiting.
    pub fn has_frames(&self) -> bool {
        !self.queue.is_empty()
    }

    /// The text encoding has no command vocabulary; the payload goes out
    /// verbatim with a terminating newline.
    pub fn build_command(&self, _cmd: CommandId, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 1);
        out.extend_from_slice(payload);
        out.push(b'\n');
        out
    }

    /// Clear buffer and queue, discarding any partially accumulated line.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.queue.clear();
    }
}
