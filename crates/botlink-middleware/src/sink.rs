//! The transport seam.
//!
//! The registry never speaks WebSocket directly. It writes [`Frame`]s into a
//! [`FrameSink`]; [`WsSink`] adapts the write half of a tungstenite stream,
//! and tests plug in in-memory sinks.

use async_trait::async_trait;
use botlink_types::BridgeError;
use futures_util::{Sink, SinkExt};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// One outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A UTF-8 JSON message.
    Text(String),
    /// A framed event: JSON header, newline, raw payload.
    Binary(Vec<u8>),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(s) => s.len(),
            Frame::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Write half of a client connection.
///
/// # Contract
///
/// * `send_frame` – deliver one whole frame. Callers serialize access, so an
///   implementation never sees two sends at once.
/// * `close` – best-effort orderly shutdown.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), BridgeError>;

    async fn close(&mut self) -> Result<(), BridgeError> {
        Ok(())
    }
}

/// [`FrameSink`] over any tungstenite message sink, typically the
/// `SplitSink` of an accepted WebSocket stream.
pub struct WsSink<S> {
    inner: S,
}

impl<S> WsSink<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S> FrameSink for WsSink<S>
where
    S: Sink<Message, Error = WsError> + Unpin + Send,
{
    async fn send_frame(&mut self, frame: Frame) -> Result<(), BridgeError> {
        let msg = match frame {
            Frame::Text(s) => Message::Text(s.into()),
            Frame::Binary(b) => Message::Binary(b.into()),
        };
        self.inner
            .send(msg)
            .await
            .map_err(|e| BridgeError::Transport(format!("websocket send failed: {e}")))
    }

    async fn close(&mut self) -> Result<(), BridgeError> {
        self.inner
            .close()
            .await
            .map_err(|e| BridgeError::Transport(format!("websocket close failed: {e}")))
    }
}
