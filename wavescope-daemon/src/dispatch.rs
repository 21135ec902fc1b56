//! Transport read loop and frame fan-out.
//!
//! The dispatcher owns the transport, the parser multiplexer and the
//! event bus. Its [`run`](FrameDispatcher::run) loop pulls whatever
//! bytes the transport has, feeds the active parser, and publishes every
//! decoded frame in stream order. Commands flow the other way through
//! [`send_command`](FrameDispatcher::send_command).

use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::error::{Error, Result};
use crate::logging::prelude::*;
use crate::protocol::{CommandId, ParserMode, ParserMux};
use crate::transport::{ConnectionState, Transport, TransportConfig, TransportError};

const READ_CHUNK: usize = 4096;

enum Exit {
    Cancelled,
    Closed,
    Failed,
}

pub struct FrameDispatcher<T: Transport> {
    transport: T,
    parser: ParserMux,
    bus: EventBus,
    frames_decoded: u64,
}

impl<T: Transport> FrameDispatcher<T> {
    pub fn new(transport: T, bus: EventBus) -> Self {
        Self {
            transport,
            parser: ParserMux::new(),
            bus,
            frames_decoded: 0,
        }
    }

    pub fn set_parser_mode(&mut self, mode: ParserMode) {
        self.parser.set_mode(mode);
    }

    pub fn parser_mode(&self) -> ParserMode {
        self.parser.mode()
    }

    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    /// Frames published since construction.
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Framing errors counted by the binary parser.
    pub fn crc_error_count(&self) -> u64 {
        self.parser.crc_error_count()
    }

    /// Open the transport, publishing Connecting and then Connected or
    /// Error around the attempt.
    pub async fn connect(&mut self, config: &TransportConfig) -> Result<()> {
        self.bus.publish_state(ConnectionState::Connecting);
        match self.transport.open(config).await {
            Ok(()) => {
                info!("Transport connected");
                self.bus.publish_state(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                error!("Transport open failed: {e}");
                self.bus.publish_error(e.to_string());
                self.bus.publish_state(ConnectionState::Error);
                Err(e.into())
            }
        }
    }

    /// Read until cancelled, the transport closes, or a transport error
    /// surfaces. Frames are published as they decode.
    pub async fn run(&mut self, cancel: CancellationToken) {
        let mut scratch = [0u8; READ_CHUNK];

        let exit = loop {
            tokio::select! {
                // Cancellation wins over a pending read.
                biased;
                _ = cancel.cancelled() => break Exit::Cancelled,
                read = self.transport.read(&mut scratch) => match read {
                    Ok(0) => break Exit::Closed,
                    Ok(n) => self.pump(&scratch[..n]),
                    Err(e) => {
                        error!("Transport read failed: {e}");
                        self.bus.publish_error(e.to_string());
                        break Exit::Failed;
                    }
                }
            }
        };

        self.transport.close();
        match exit {
            Exit::Cancelled | Exit::Closed => {
                info!(
                    frames = self.frames_decoded,
                    crc_errors = self.crc_error_count(),
                    "Dispatcher stopped"
                );
                self.bus.publish_state(ConnectionState::Disconnected);
            }
            Exit::Failed => self.bus.publish_state(ConnectionState::Error),
        }
    }

    fn pump(&mut self, bytes: &[u8]) {
        self.parser.feed(bytes);
        while let Some(frame) = self.parser.try_pop_frame() {
            self.frames_decoded += 1;
            trace!(
                cmd = ?frame.cmd,
                seq = frame.seq,
                len = frame.payload.len(),
                "Frame decoded"
            );
            self.bus.publish_frame(&frame);
        }
    }

    /// Encode a command with the active parser and write it to the
    /// transport in one call. Fails on a closed transport or short write.
    pub async fn send_command(&mut self, cmd: CommandId, payload: &[u8]) -> Result<()> {
        if !self.transport.is_open() {
            return Err(TransportError::NotOpen.into());
        }

        let packet = self.parser.build_command(cmd, payload)?;
        let written = self.transport.write(&packet).await?;
        if written != packet.len() {
            return Err(Error::Other(format!(
                "short write: {written} of {} bytes",
                packet.len()
            )));
        }

        trace!(?cmd, len = packet.len(), "Command sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;

    use crate::bus::DEFAULT_QUEUE_DEPTH;
    use crate::protocol::encode_frame;

    use super::*;

    /// In-memory transport: scripted read chunks, captured writes.
    #[derive(Default)]
    struct MockTransport {
        open: bool,
        chunks: VecDeque<Vec<u8>>,
        written: Vec<u8>,
        fail_read: bool,
        accept_at_most: Option<usize>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn open(
            &mut self,
            _config: &TransportConfig,
        ) -> std::result::Result<(), TransportError> {
            self.open = true;
            Ok(())
        }

        fn close(&mut self) {
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }

        async fn write(&mut self, bytes: &[u8]) -> std::result::Result<usize, TransportError> {
            if !self.open {
                return Err(TransportError::NotOpen);
            }
            let accepted = self.accept_at_most.unwrap_or(bytes.len()).min(bytes.len());
            self.written.extend_from_slice(&bytes[..accepted]);
            Ok(accepted)
        }

        async fn read(&mut self, buf: &mut [u8]) -> std::result::Result<usize, TransportError> {
            if self.fail_read && self.chunks.is_empty() {
                return Err(TransportError::Io(std::io::Error::other("device gone")));
            }
            match self.chunks.pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None => Ok(0),
            }
        }
    }

    fn dispatcher(transport: MockTransport) -> FrameDispatcher<MockTransport> {
        FrameDispatcher::new(transport, EventBus::new())
    }

    #[tokio::test]
    async fn run_publishes_frames_across_chunk_boundaries() {
        let packet = encode_frame(CommandId::Ping, 0, b"hi").unwrap();
        let mut stream = packet.clone();
        stream.extend_from_slice(&packet);

        let transport = MockTransport {
            open: true,
            chunks: VecDeque::from([stream[..7].to_vec(), stream[7..].to_vec()]),
            ..Default::default()
        };
        let mut dispatcher = dispatcher(transport);
        let mut frames = dispatcher.bus_mut().subscribe_frames(DEFAULT_QUEUE_DEPTH);

        dispatcher.run(CancellationToken::new()).await;

        assert_eq!(frames.recv().await.unwrap().payload, b"hi");
        assert_eq!(frames.recv().await.unwrap().payload, b"hi");
        assert_eq!(dispatcher.frames_decoded(), 2);
        assert_eq!(dispatcher.bus_mut().state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn read_failure_surfaces_error_event_and_state() {
        let transport = MockTransport {
            open: true,
            fail_read: true,
            ..Default::default()
        };
        let mut dispatcher = dispatcher(transport);
        let mut errors = dispatcher.bus_mut().subscribe_errors();

        dispatcher.run(CancellationToken::new()).await;

        assert!(errors.recv().await.unwrap().contains("device gone"));
        assert_eq!(dispatcher.bus_mut().state(), ConnectionState::Error);
    }

    #[tokio::test]
    async fn cancel_stops_the_loop_and_disconnects() {
        let transport = MockTransport {
            open: true,
            fail_read: true, // would error if the loop kept reading
            ..Default::default()
        };
        let mut dispatcher = dispatcher(transport);
        let cancel = CancellationToken::new();
        cancel.cancel();

        dispatcher.run(cancel).await;
        assert_eq!(dispatcher.bus_mut().state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn connect_publishes_connected_state() {
        let mut dispatcher = dispatcher(MockTransport::default());
        dispatcher.connect(&TransportConfig::default()).await.unwrap();
        assert_eq!(dispatcher.bus_mut().state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn send_command_writes_the_encoded_packet() {
        let transport = MockTransport {
            open: true,
            ..Default::default()
        };
        let mut dispatcher = dispatcher(transport);

        dispatcher
            .send_command(CommandId::StreamStart, &[])
            .await
            .unwrap();

        let expect = encode_frame(CommandId::StreamStart, 0, &[]).unwrap();
        assert_eq!(dispatcher.transport.written, expect);
    }

    #[tokio::test]
    async fn send_command_fails_when_closed_or_short() {
        let mut dispatcher = dispatcher(MockTransport::default());
        assert!(dispatcher.send_command(CommandId::Ping, &[]).await.is_err());

        let transport = MockTransport {
            open: true,
            accept_at_most: Some(3),
            ..Default::default()
        };
        let mut dispatcher = FrameDispatcher::new(transport, EventBus::new());
        let err = dispatcher
            .send_command(CommandId::Ping, &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("short write"));
    }
}
