//! Event fan-out between the dispatcher and its consumers.
//!
//! Three streams leave the I/O loop: decoded frames, connection state
//! transitions, and transport error messages. Frames and errors go out
//! over bounded mpsc channels held in registration order; state rides a
//! watch channel so late subscribers still observe the current value.
//!
//! Publishing never blocks: a subscriber that falls behind loses events
//! (with a warning) rather than stalling the I/O loop, and a subscriber
//! whose receiver was dropped is pruned on the next publish.

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use crate::logging::prelude::*;
use crate::protocol::Frame;
use crate::transport::ConnectionState;

/// Queue depth handed to [`EventBus::subscribe_frames`] by callers that
/// have no better number.
pub const DEFAULT_QUEUE_DEPTH: usize = 256;

const ERROR_QUEUE_DEPTH: usize = 16;

pub struct EventBus {
    frame_subs: Vec<mpsc::Sender<Frame>>,
    error_subs: Vec<mpsc::Sender<String>>,
    state_tx: watch::Sender<ConnectionState>,
}

impl EventBus {
    pub fn new() -> Self {
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            frame_subs: Vec::new(),
            error_subs: Vec::new(),
            state_tx,
        }
    }

    /// Subscribe to decoded frames. Delivery is FIFO per subscriber and
    /// follows registration order across subscribers.
    pub fn subscribe_frames(&mut self, depth: usize) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(depth);
        self.frame_subs.push(tx);
        rx
    }

    /// Subscribe to transport error messages.
    pub fn subscribe_errors(&mut self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(ERROR_QUEUE_DEPTH);
        self.error_subs.push(tx);
        rx
    }

    /// Watch connection state transitions.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// The most recently published connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn publish_frame(&mut self, frame: &Frame) {
        self.frame_subs.retain(|tx| match tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Frame subscriber lagging, dropping frame");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    pub fn publish_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.error_subs.retain(|tx| match tx.try_send(message.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Error subscriber lagging, dropping message");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    pub fn publish_state(&mut self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::CommandId;

    use super::*;

    fn frame() -> Frame {
        Frame {
            cmd: CommandId::Ping,
            seq: 0,
            payload: Vec::new(),
        }
    }

    #[tokio::test]
    async fn frames_reach_every_subscriber_in_order() {
        let mut bus = EventBus::new();
        let mut first = bus.subscribe_frames(4);
        let mut second = bus.subscribe_frames(4);

        bus.publish_frame(&frame());
        bus.publish_frame(&Frame {
            cmd: CommandId::Ack,
            seq: 1,
            payload: Vec::new(),
        });

        assert_eq!(first.recv().await.unwrap().cmd, CommandId::Ping);
        assert_eq!(first.recv().await.unwrap().cmd, CommandId::Ack);
        assert_eq!(second.recv().await.unwrap().cmd, CommandId::Ping);
        assert_eq!(second.recv().await.unwrap().cmd, CommandId::Ack);
    }

    #[tokio::test]
    async fn lagging_subscriber_loses_events_without_blocking() {
        let mut bus = EventBus::new();
        let mut rx = bus.subscribe_frames(1);

        bus.publish_frame(&frame());
        bus.publish_frame(&frame());

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned() {
        let mut bus = EventBus::new();
        let rx = bus.subscribe_frames(4);
        drop(rx);

        bus.publish_frame(&frame());
        assert!(bus.frame_subs.is_empty());
    }

    #[tokio::test]
    async fn state_watch_sees_latest_transition() {
        let mut bus = EventBus::new();
        let mut rx = bus.state_watch();
        assert_eq!(*rx.borrow(), ConnectionState::Disconnected);

        bus.publish_state(ConnectionState::Connecting);
        bus.publish_state(ConnectionState::Connected);

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connected);
        assert_eq!(bus.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn errors_are_delivered_as_text() {
        let mut bus = EventBus::new();
        let mut rx = bus.subscribe_errors();

        bus.publish_error("port vanished");
        assert_eq!(rx.recv().await.unwrap(), "port vanished");
    }
}
