//! Decoding `StreamData` payloads into timestamped channel samples.
//!
//! A payload of at least 8 bytes whose remainder is a whole number of
//! 6-byte records is a binary sample frame:
//!
//! ```text
//! offset  size  field
//!  0      8     timestamp (us, u64 LE, source clock)
//!  8+6k   2     channel id (u16 LE)
//! 10+6k   4     value (f32 LE)
//! ```
//!
//! Anything else is treated as an ASCII line of comma-separated floats
//! with channel ids assigned 0, 1, 2, ... in order and the host clock as
//! timestamp. Tokens follow Rust float grammar, so `nan`, `inf` and
//! `infinity` (any case) are accepted as values.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::logging::prelude::*;
use crate::protocol::{CommandId, Frame};

/// Frames retained for rendering when the consumer does not override it.
pub const DEFAULT_MAX_FRAMES: usize = 4096;

const BINARY_TS_LEN: usize = 8;
const BINARY_SAMPLE_LEN: usize = 6;

/// One sample on one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSample {
    pub channel_id: u16,
    pub value: f64,
}

/// A decoded measurement record.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    pub timestamp_us: u64,
    pub channels: Vec<ChannelSample>,
}

/// Turns `StreamData` frames into [`DataFrame`]s and keeps a bounded
/// ring of the most recent ones (FIFO eviction).
pub struct StreamDecoder {
    ring: VecDeque<DataFrame>,
    max_frames: usize,
    subs: Vec<mpsc::Sender<DataFrame>>,
    frames_decoded: u64,
    frames_dropped: u64,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_FRAMES)
    }

    pub fn with_capacity(max_frames: usize) -> Self {
        Self {
            ring: VecDeque::with_capacity(max_frames.min(DEFAULT_MAX_FRAMES)),
            max_frames,
            subs: Vec::new(),
            frames_decoded: 0,
            frames_dropped: 0,
        }
    }

    /// Subscribe to decoded data frames.
    pub fn subscribe(&mut self, depth: usize) -> mpsc::Receiver<DataFrame> {
        let (tx, rx) = mpsc::channel(depth);
        self.subs.push(tx);
        rx
    }

    /// Decode one protocol frame. Non-`StreamData` frames and payloads
    /// yielding no samples are ignored; everything else lands in the
    /// ring and is returned (and published to subscribers).
    pub fn ingest(&mut self, frame: &Frame) -> Option<DataFrame> {
        if frame.cmd != CommandId::StreamData {
            return None;
        }

        let Some(decoded) = decode_payload(&frame.payload) else {
            self.frames_dropped += 1;
            trace!(len = frame.payload.len(), "Dropped undecodable sample payload");
            return None;
        };

        self.ring.push_back(decoded.clone());
        while self.ring.len() > self.max_frames {
            self.ring.pop_front();
        }
        self.frames_decoded += 1;

        self.subs.retain(|tx| match tx.try_send(decoded.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Data frame subscriber lagging, dropping frame");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });

        Some(decoded)
    }

    /// The most recent `max` frames, oldest first.
    pub fn recent_frames(&self, max: usize) -> Vec<DataFrame> {
        let skip = self.ring.len().saturating_sub(max);
        self.ring.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Data frames stored since construction.
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// `StreamData` payloads that produced no samples.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Microseconds since the Unix epoch, used to stamp text records that
/// carry no source clock.
pub fn host_clock_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

fn decode_payload(payload: &[u8]) -> Option<DataFrame> {
    if payload.len() >= BINARY_TS_LEN
        && (payload.len() - BINARY_TS_LEN) % BINARY_SAMPLE_LEN == 0
    {
        Some(decode_binary(payload))
    } else {
        decode_text(payload)
    }
}

fn decode_binary(payload: &[u8]) -> DataFrame {
    let timestamp_us = u64::from_le_bytes(payload[..BINARY_TS_LEN].try_into().unwrap());

    let mut channels = Vec::with_capacity((payload.len() - BINARY_TS_LEN) / BINARY_SAMPLE_LEN);
    for record in payload[BINARY_TS_LEN..].chunks_exact(BINARY_SAMPLE_LEN) {
        let channel_id = u16::from_le_bytes([record[0], record[1]]);
        let value = f32::from_le_bytes([record[2], record[3], record[4], record[5]]) as f64;
        channels.push(ChannelSample { channel_id, value });
    }

    DataFrame {
        timestamp_us,
        channels,
    }
}

fn decode_text(payload: &[u8]) -> Option<DataFrame> {
    let line = String::from_utf8_lossy(payload);

    let mut channels = Vec::new();
    let mut next_id: u16 = 0;
    for token in line.split(',') {
        let token = token.trim();
        if token.is_empty() {
            // Trailing commas produce empty tokens; they do not consume
            // a channel id.
            continue;
        }
        match token.parse::<f64>() {
            Ok(value) => {
                channels.push(ChannelSample {
                    channel_id: next_id,
                    value,
                });
                next_id += 1;
            }
            Err(_) => trace!(token = %token, "Skipping unparsable sample token"),
        }
    }

    if channels.is_empty() {
        return None;
    }
    Some(DataFrame {
        timestamp_us: host_clock_us(),
        channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_frame(payload: &[u8]) -> Frame {
        Frame {
            cmd: CommandId::StreamData,
            seq: 0,
            payload: payload.to_vec(),
        }
    }

    fn binary_payload(ts: u64, samples: &[(u16, f32)]) -> Vec<u8> {
        let mut payload = ts.to_le_bytes().to_vec();
        for &(id, value) in samples {
            payload.extend_from_slice(&id.to_le_bytes());
            payload.extend_from_slice(&value.to_le_bytes());
        }
        payload
    }

    #[test]
    fn binary_sample_frame_decodes_with_source_timestamp() {
        let mut decoder = StreamDecoder::new();
        let payload = binary_payload(1000, &[(0, 1.5), (1, -2.25)]);
        assert_eq!(payload.len(), 20);

        let frame = decoder.ingest(&stream_frame(&payload)).expect("data frame");
        assert_eq!(frame.timestamp_us, 1000);
        assert_eq!(
            frame.channels,
            vec![
                ChannelSample { channel_id: 0, value: 1.5 },
                ChannelSample { channel_id: 1, value: -2.25 },
            ]
        );
    }

    #[test]
    fn text_payload_assigns_sequential_channel_ids() {
        let mut decoder = StreamDecoder::new();
        let frame = decoder
            .ingest(&stream_frame(b"1.0,2.5,-3"))
            .expect("data frame");

        let values: Vec<(u16, f64)> = frame
            .channels
            .iter()
            .map(|s| (s.channel_id, s.value))
            .collect();
        assert_eq!(values, vec![(0, 1.0), (1, 2.5), (2, -3.0)]);
        assert!(frame.timestamp_us > 0);
    }

    #[test]
    fn unparsable_tokens_are_skipped_but_nan_is_a_value() {
        let mut decoder = StreamDecoder::new();
        let frame = decoder
            .ingest(&stream_frame(b"nan, 3.14, oops, 7"))
            .expect("data frame");

        assert_eq!(frame.channels.len(), 3);
        assert_eq!(frame.channels[0].channel_id, 0);
        assert!(frame.channels[0].value.is_nan());
        assert_eq!(frame.channels[1].value, 3.14);
        assert_eq!(frame.channels[2].channel_id, 2);
        assert_eq!(frame.channels[2].value, 7.0);
    }

    #[test]
    fn trailing_commas_are_dropped_silently() {
        let mut decoder = StreamDecoder::new();
        let frame = decoder
            .ingest(&stream_frame(b"1.0,2.0,"))
            .expect("data frame");
        assert_eq!(frame.channels.len(), 2);
    }

    #[test]
    fn payload_with_no_parsable_tokens_is_dropped() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.ingest(&stream_frame(b"a,b,c")).is_none());
        assert!(decoder.is_empty());
        assert_eq!(decoder.frames_dropped(), 1);
    }

    #[test]
    fn non_stream_data_frames_are_ignored() {
        let mut decoder = StreamDecoder::new();
        let frame = Frame {
            cmd: CommandId::Ack,
            seq: 0,
            payload: b"1.0".to_vec(),
        };
        assert!(decoder.ingest(&frame).is_none());
        assert_eq!(decoder.frames_dropped(), 0);
    }

    #[test]
    fn binary_frame_with_zero_samples_is_kept() {
        let mut decoder = StreamDecoder::new();
        let frame = decoder
            .ingest(&stream_frame(&42u64.to_le_bytes()))
            .expect("data frame");
        assert_eq!(frame.timestamp_us, 42);
        assert!(frame.channels.is_empty());
        assert_eq!(decoder.len(), 1);
    }

    #[test]
    fn ring_evicts_oldest_frames_fifo() {
        let mut decoder = StreamDecoder::with_capacity(3);
        for ts in 0..5u64 {
            decoder.ingest(&stream_frame(&binary_payload(ts, &[(0, 1.0)])));
        }

        assert_eq!(decoder.len(), 3);
        let recent = decoder.recent_frames(10);
        let stamps: Vec<u64> = recent.iter().map(|f| f.timestamp_us).collect();
        assert_eq!(stamps, vec![2, 3, 4]);
    }

    #[test]
    fn recent_frames_returns_newest_suffix_in_order() {
        let mut decoder = StreamDecoder::new();
        for ts in 0..10u64 {
            decoder.ingest(&stream_frame(&binary_payload(ts, &[(0, 1.0)])));
        }

        let recent = decoder.recent_frames(4);
        let stamps: Vec<u64> = recent.iter().map(|f| f.timestamp_us).collect();
        assert_eq!(stamps, vec![6, 7, 8, 9]);
    }

    #[test]
    fn default_capacity_matches_documented_bound() {
        let decoder = StreamDecoder::new();
        assert_eq!(decoder.max_frames, DEFAULT_MAX_FRAMES);
    }

    #[tokio::test]
    async fn subscribers_receive_decoded_frames() {
        let mut decoder = StreamDecoder::new();
        let mut rx = decoder.subscribe(4);

        decoder.ingest(&stream_frame(&binary_payload(7, &[(2, 0.5)])));

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.timestamp_us, 7);
        assert_eq!(frame.channels[0].channel_id, 2);
    }
}
