//! Host-side acquisition library for streaming MCU telemetry.
//!
//! The library decodes a CRC-protected framed binary protocol (with a
//! line-oriented text fallback) arriving over a byte transport, turns
//! streaming payloads into timestamped channel samples, and persists
//! recordings in an append-only chunked file format.
//!
//! Data flows transport -> [`dispatch::FrameDispatcher`] ->
//! [`protocol::ParserMux`] -> frame queue -> [`stream::StreamDecoder`]
//! and, optionally, [`record::RecordSink`].

pub mod bus;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod record;
pub mod stream;
pub mod transport;
pub mod vars;

pub use error::{Error, Result};
