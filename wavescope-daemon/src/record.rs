//! Append-only recording of decoded sample frames.
//!
//! # File layout
//!
//! ```text
//! magic        4 bytes   "R" "F" "R" "1"
//! repeat:
//!   start_ts   8 bytes   u64 LE
//!   end_ts     8 bytes   u64 LE
//!   length     4 bytes   u32 LE
//!   samples    length bytes
//! ```
//!
//! Every append flushes before reporting success, so a crash can lose at
//! most the chunk being written. Readers treat a truncated trailing
//! chunk as end-of-file.
//!
//! Sample bytes inside a chunk are packed as repeated
//! `u64 ts LE | u16 count LE | count x (u16 ch LE | f32 value LE)`
//! records, one per data frame.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::logging::prelude::*;
use crate::stream::{ChannelSample, DataFrame};

/// First four bytes of every recording.
pub const RECORD_MAGIC: [u8; 4] = *b"RFR1";

const CHUNK_HEADER_LEN: usize = 8 + 8 + 4;
const PACKED_SAMPLE_LEN: usize = 2 + 4;

/// One persisted unit of a recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordChunk {
    pub start_ts: u64,
    pub end_ts: u64,
    pub packed_samples: Vec<u8>,
}

impl RecordChunk {
    /// Pack decoded frames into one chunk. Values are stored as f32,
    /// matching the wire precision they arrived with.
    pub fn pack(frames: &[DataFrame]) -> Self {
        let start_ts = frames.first().map_or(0, |f| f.timestamp_us);
        let end_ts = frames.last().map_or(0, |f| f.timestamp_us);

        let mut packed = Vec::new();
        for frame in frames {
            packed.extend_from_slice(&frame.timestamp_us.to_le_bytes());
            packed.extend_from_slice(&(frame.channels.len() as u16).to_le_bytes());
            for sample in &frame.channels {
                packed.extend_from_slice(&sample.channel_id.to_le_bytes());
                packed.extend_from_slice(&(sample.value as f32).to_le_bytes());
            }
        }

        Self {
            start_ts,
            end_ts,
            packed_samples: packed,
        }
    }

    /// Unpack the frames packed by [`pack`](Self::pack). A truncated
    /// trailing record is dropped.
    pub fn unpack(&self) -> Vec<DataFrame> {
        let bytes = &self.packed_samples;
        let mut frames = Vec::new();
        let mut offset = 0;

        while bytes.len() - offset >= 10 {
            let timestamp_us = u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap());
            let count = u16::from_le_bytes([bytes[offset + 8], bytes[offset + 9]]) as usize;
            offset += 10;
            if bytes.len() - offset < count * PACKED_SAMPLE_LEN {
                break;
            }

            let mut channels = Vec::with_capacity(count);
            for record in bytes[offset..offset + count * PACKED_SAMPLE_LEN]
                .chunks_exact(PACKED_SAMPLE_LEN)
            {
                channels.push(ChannelSample {
                    channel_id: u16::from_le_bytes([record[0], record[1]]),
                    value: f32::from_le_bytes([record[2], record[3], record[4], record[5]])
                        as f64,
                });
            }
            offset += count * PACKED_SAMPLE_LEN;

            frames.push(DataFrame {
                timestamp_us,
                channels,
            });
        }

        frames
    }
}

/// Append-only writer for the recording format.
#[derive(Default)]
pub struct RecordSink {
    file: Option<BufWriter<File>>,
    path: Option<PathBuf>,
    chunks_written: u64,
}

impl RecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Truncate-open `path` and write the file magic. A previously open
    /// recording is closed first.
    pub fn start(&mut self, path: impl AsRef<Path>) -> io::Result<()> {
        self.stop();

        let mut file = BufWriter::new(File::create(path.as_ref())?);
        file.write_all(&RECORD_MAGIC)?;
        file.flush()?;

        info!(path = %path.as_ref().display(), "Recording started");
        self.file = Some(file);
        self.path = Some(path.as_ref().to_path_buf());
        self.chunks_written = 0;
        Ok(())
    }

    /// Close the recording. Idempotent.
    pub fn stop(&mut self) {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
            info!(chunks = self.chunks_written, "Recording stopped");
        }
        self.path = None;
    }

    pub fn is_recording(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn chunks_written(&self) -> u64 {
        self.chunks_written
    }

    /// Append one chunk and flush. On failure the file stays open with a
    /// possibly truncated tail, which readers already tolerate; the
    /// caller decides whether to stop.
    pub fn append_chunk(&mut self, chunk: &RecordChunk) -> io::Result<()> {
        let file = self.file.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "recording is not started")
        })?;

        file.write_all(&chunk.start_ts.to_le_bytes())?;
        file.write_all(&chunk.end_ts.to_le_bytes())?;
        file.write_all(&(chunk.packed_samples.len() as u32).to_le_bytes())?;
        file.write_all(&chunk.packed_samples)?;
        file.flush()?;

        self.chunks_written += 1;
        Ok(())
    }
}

impl Drop for RecordSink {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Reads a recording back as whole chunks, stopping cleanly at a
/// truncated trailing chunk.
#[derive(Debug)]
pub struct RecordReader {
    data: Vec<u8>,
    offset: usize,
}

impl RecordReader {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let data = std::fs::read(path)?;
        if data.len() < RECORD_MAGIC.len() || data[..RECORD_MAGIC.len()] != RECORD_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "missing RFR1 recording magic",
            ));
        }
        Ok(Self {
            data,
            offset: RECORD_MAGIC.len(),
        })
    }
}

impl Iterator for RecordReader {
    type Item = RecordChunk;

    fn next(&mut self) -> Option<RecordChunk> {
        if self.data.len() - self.offset < CHUNK_HEADER_LEN {
            return None;
        }
        let header = &self.data[self.offset..self.offset + CHUNK_HEADER_LEN];
        let start_ts = u64::from_le_bytes(header[0..8].try_into().unwrap());
        let end_ts = u64::from_le_bytes(header[8..16].try_into().unwrap());
        let length = u32::from_le_bytes(header[16..20].try_into().unwrap()) as usize;

        let body = self.offset + CHUNK_HEADER_LEN;
        if self.data.len() - body < length {
            return None;
        }
        self.offset = body + length;

        Some(RecordChunk {
            start_ts,
            end_ts,
            packed_samples: self.data[body..body + length].to_vec(),
        })
    }
}

/// Export frames as CSV: a `timestamp_us,channel_id,value` header and
/// one line per sample, LF endings. f64 values print in Rust's shortest
/// round-trip form.
pub fn export_csv(path: impl AsRef<Path>, frames: &[DataFrame]) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "timestamp_us,channel_id,value")?;
    for frame in frames {
        for sample in &frame.channels {
            writeln!(
                out,
                "{},{},{}",
                frame.timestamp_us, sample.channel_id, sample.value
            )?;
        }
    }
    out.flush()
}
