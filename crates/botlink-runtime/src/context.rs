//! [`BridgeContext`] – the server-wide state shared by every task.
//!
//! Built once at startup and handed around as `Arc<BridgeContext>`. It owns
//! the device handle, the dispatcher (and through it the corner-light
//! cache), the connection registry, the pending tap and the latest camera
//! frame.

use std::sync::Arc;
use std::time::Duration;

use botlink_hal::{FrameSlot, Robot};
use botlink_kernel::Dispatcher;
use botlink_middleware::{Connection, ConnectionRegistry};
use botlink_types::{BridgeError, StateEnvelope, StateSnapshot};

use crate::snapshot::{TapSlot, build_snapshot};

pub struct BridgeContext {
    robot: Arc<dyn Robot>,
    dispatcher: Dispatcher,
    connections: ConnectionRegistry,
    taps: TapSlot,
    frames: FrameSlot,
}

impl BridgeContext {
    pub fn new(robot: Arc<dyn Robot>, action_timeout: Duration) -> Self {
        Self {
            dispatcher: Dispatcher::new(Arc::clone(&robot), action_timeout),
            robot,
            connections: ConnectionRegistry::new(),
            taps: TapSlot::new(),
            frames: FrameSlot::new(),
        }
    }

    /// Use a custom dispatcher, e.g. one with a restricted capability table.
    pub fn with_dispatcher(robot: Arc<dyn Robot>, dispatcher: Dispatcher) -> Self {
        Self {
            robot,
            dispatcher,
            connections: ConnectionRegistry::new(),
            taps: TapSlot::new(),
            frames: FrameSlot::new(),
        }
    }

    pub fn robot(&self) -> &dyn Robot {
        self.robot.as_ref()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn taps(&self) -> &TapSlot {
        &self.taps
    }

    pub fn frames(&self) -> &FrameSlot {
        &self.frames
    }

    /// Snapshot the device, consuming the pending tap.
    pub fn take_snapshot(&self) -> StateSnapshot {
        build_snapshot(self.robot.as_ref(), self.taps.take())
    }

    /// Broadcast a fresh `{"state": ...}` envelope to every client.
    pub async fn broadcast_state(&self) -> Result<usize, BridgeError> {
        let envelope = StateEnvelope {
            state: self.take_snapshot(),
        };
        self.connections.broadcast_json(&envelope).await
    }

    /// Send a fresh `{"state": ...}` envelope to one client.
    pub async fn send_state(&self, conn: &Connection) -> Result<(), BridgeError> {
        let envelope = StateEnvelope {
            state: self.take_snapshot(),
        };
        self.connections.send_json(conn, &envelope).await
    }
}
