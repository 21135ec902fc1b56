//! `tokio-util` codec adapter over the binary wire format.
//!
//! Wraps [`BinaryParser`] so the framed encoding can be driven through
//! `FramedRead`/`FramedWrite`, which is how the offline dissector walks
//! capture files with the exact decoder the daemon runs.

use std::io;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::{BinaryParser, Frame, encode_frame};

#[derive(Debug, Default)]
pub struct FrameCodec {
    parser: BinaryParser,
}

impl FrameCodec {
    /// Framing errors (bad CRC or oversized length) seen so far.
    pub fn crc_error_count(&self) -> u64 {
        self.parser.crc_error_count()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        // The inner parser owns buffering and resync; the read buffer is
        // always drained so EOF with a partial frame is not an error.
        if !src.is_empty() {
            self.parser.feed(src);
            src.clear();
        }
        Ok(self.parser.try_pop_frame())
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), io::Error> {
        let packet = encode_frame(item.cmd, item.seq, &item.payload)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        dst.extend_from_slice(&packet);
        Ok(())
    }
}
