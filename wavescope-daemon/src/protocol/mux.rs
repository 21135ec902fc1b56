//! Parser selection between the binary and text wire encodings.

use crate::logging::prelude::*;

use super::{BinaryParser, CommandId, Frame, ParserMode, ProtocolError, SOF0, SOF1, TextParser};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActiveParser {
    Binary,
    Text,
}

/// Routes inbound bytes to the binary or text parser and presents both
/// behind a single feed/pop/build interface.
///
/// In `AutoDetect` mode each chunk is routed by its first two bytes
/// (`AA 55` means binary) until the binary parser decodes its first
/// frame; from then on binary is sticky until a mode change or reset,
/// so a packet split mid-header cannot flip the route. Text chunks keep
/// re-deciding, which lets a device that switches to the framed
/// encoding be picked up without intervention.
#[derive(Debug, Default)]
pub struct ParserMux {
    mode: ParserMode,
    binary: BinaryParser,
    text: TextParser,
    locked_binary: bool,
}

impl ParserMux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch modes. Both parsers are reset; a partially accumulated
    /// frame in either is discarded.
    pub fn set_mode(&mut self, mode: ParserMode) {
        debug!(?mode, "Parser mode set");
        self.mode = mode;
        self.reset();
    }

    pub fn mode(&self) -> ParserMode {
        self.mode
    }

    /// Feed a chunk to the active parser.
    pub fn feed(&mut self, bytes: &[u8]) {
        match self.route(bytes) {
            ActiveParser::Binary => {
                self.binary.feed(bytes);
                if self.mode == ParserMode::AutoDetect
                    && !self.locked_binary
                    && self.binary.has_frames()
                {
                    debug!("Binary wire encoding detected");
                    self.locked_binary = true;
                }
            }
            ActiveParser::Text => self.text.feed(bytes),
        }
    }

    fn route(&self, bytes: &[u8]) -> ActiveParser {
        match self.mode {
            ParserMode::Binary => ActiveParser::Binary,
            ParserMode::Text => ActiveParser::Text,
            ParserMode::AutoDetect => {
                if self.locked_binary || (bytes.len() >= 2 && bytes[0] == SOF0 && bytes[1] == SOF1)
                {
                    ActiveParser::Binary
                } else {
                    ActiveParser::Text
                }
            }
        }
    }

    /// Remove and return the oldest queued frame. In `AutoDetect` mode
    /// binary frames win over text frames.
    pub fn try_pop_frame(&mut self) -> Option<Frame> {
        match self.mode {
            ParserMode::Binary => self.binary.try_pop_frame(),
            ParserMode::Text => self.text.try_pop_frame(),
            ParserMode::AutoDetect => self
                .binary
                .try_pop_frame()
                .or_else(|| self.text.try_pop_frame()),
        }
    }

    /// Encode a command with the parser matching the current mode; the
    /// binary encoder is the default in `AutoDetect`.
    pub fn build_command(&self, cmd: CommandId, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        match self.mode {
            ParserMode::Text => Ok(self.text.build_command(cmd, payload)),
            ParserMode::Binary | ParserMode::AutoDetect => self.binary.build_command(cmd, payload),
        }
    }

    /// Reset both parsers and forget any auto-detect decision. The mode
    /// is kept.
    pub fn reset(&mut self) {
        self.binary.reset();
        self.text.reset();
        self.locked_binary = false;
    }

    /// Framing errors counted by the binary parser since the last reset.
    pub fn crc_error_count(&self) -> u64 {
        self.binary.crc_error_count()
    }
}
