//! Connection registry and fan-out.
//!
//! Every accepted client becomes a [`Connection`] in the
//! [`ConnectionRegistry`]. Broadcasts scatter one send per live connection
//! and gather the results, so a dead or slow client never cancels or
//! reorders delivery to the others.
//!
//! Each connection owns an async write lock. Frames written to one
//! connection are therefore never interleaved, and arrive in the order the
//! lock was acquired.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use botlink_types::wire::encode_framed;
use botlink_types::{BridgeError, EventEnvelope};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::sink::{Frame, FrameSink};

/// Unique identifier of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A connected client.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    sink: Mutex<Box<dyn FrameSink>>,
    closed: AtomicBool,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    pub fn new(peer: SocketAddr, sink: Box<dyn FrameSink>) -> Self {
        Self {
            id: ConnectionId::new(),
            peer,
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Write one frame under the connection's lock.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Transport`] when the connection is already closed or
    /// the write fails. A failed write marks the connection closed.
    pub async fn send(&self, frame: Frame) -> Result<(), BridgeError> {
        let mut sink = self.sink.lock().await;
        if self.is_closed() {
            return Err(BridgeError::Transport(format!("connection {} is closed", self.id)));
        }
        let result = sink.send_frame(frame).await;
        if result.is_err() {
            self.mark_closed();
        }
        result
    }

    /// Close the sink and mark the connection closed.
    pub async fn close(&self) {
        let mut sink = self.sink.lock().await;
        if !self.closed.swap(true, Ordering::AcqRel)
            && let Err(e) = sink.close().await
        {
            debug!(conn = %self.id, error = %e, "close failed");
        }
    }
}

/// The set of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ConnectionId, Arc<Connection>>> {
        self.connections.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ConnectionId, Arc<Connection>>> {
        self.connections.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a client and return its handle.
    pub fn register(&self, peer: SocketAddr, sink: Box<dyn FrameSink>) -> Arc<Connection> {
        let conn = Arc::new(Connection::new(peer, sink));
        self.write().insert(conn.id(), Arc::clone(&conn));
        debug!(conn = %conn.id(), %peer, "connection registered");
        conn
    }

    /// Drop a client. Returns the removed connection, if it was present.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let removed = self.write().remove(&id);
        if let Some(conn) = &removed {
            conn.mark_closed();
            debug!(conn = %id, peer = %conn.peer(), "connection removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Snapshot of the current connections.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.read().values().cloned().collect()
    }

    /// Send `frame` to every connection concurrently.
    ///
    /// Failures are logged per connection and never abort the others.
    /// Returns how many connections received the frame.
    pub async fn broadcast(&self, frame: Frame) -> usize {
        let targets = self.connections();
        if targets.is_empty() {
            return 0;
        }

        let sends = targets.iter().map(|conn| {
            let frame = frame.clone();
            async move { (conn, conn.send(frame).await) }
        });

        let mut delivered = 0;
        for (conn, result) in join_all(sends).await {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => debug!(conn = %conn.id(), peer = %conn.peer(), error = %e, "ws send failed"),
            }
        }
        delivered
    }

    /// Broadcast a text payload.
    pub async fn broadcast_text(&self, payload: impl Into<String>) -> usize {
        self.broadcast(Frame::Text(payload.into())).await
    }

    /// Broadcast any serializable message as JSON text.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Serialization`] if `message` cannot be serialized.
    pub async fn broadcast_json<T: Serialize>(&self, message: &T) -> Result<usize, BridgeError> {
        let payload = serde_json::to_string(message)?;
        Ok(self.broadcast_text(payload).await)
    }

    /// Broadcast `{"event": event, "data": data}`; `data` is omitted when
    /// `None`.
    pub async fn broadcast_event<T: Serialize>(&self, event: &str, data: Option<T>) -> Result<usize, BridgeError> {
        let envelope = EventEnvelope {
            event: event.to_string(),
            data,
        };
        self.broadcast_json(&envelope).await
    }

    /// Broadcast a binary framed event: JSON header, `\n`, `payload`.
    pub async fn broadcast_framed<T: Serialize>(
        &self,
        event: &str,
        metadata: &T,
        payload: &[u8],
    ) -> Result<usize, BridgeError> {
        let frame = encode_framed(event, metadata, payload)?;
        Ok(self.broadcast(Frame::Binary(frame)).await)
    }

    /// Unicast a text payload to one connection.
    pub async fn send_direct(&self, conn: &Connection, payload: impl Into<String>) -> Result<(), BridgeError> {
        conn.send(Frame::Text(payload.into())).await
    }

    /// Unicast any serializable message as JSON text.
    pub async fn send_json<T: Serialize>(&self, conn: &Connection, message: &T) -> Result<(), BridgeError> {
        let payload = serde_json::to_string(message)?;
        self.send_direct(conn, payload).await
    }
}
