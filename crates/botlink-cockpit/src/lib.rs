//! `botlink-cockpit` – the WebSocket front end of the bridge.
//!
//! Boots a WebSocket server (default `127.0.0.1:26966`) that:
//!
//! 1. **Registers** every client with the shared
//!    [`ConnectionRegistry`] so state snapshots, camera frames and call
//!    results fan out to all of them.
//!
//! 2. **Accepts** JSON commands from each client:
//!    - `{"cmd": "get_state"}` → replies with a state snapshot and an ack.
//!    - `{"cmd": "call", "args": [path, args, kwargs, await]}` → dispatches
//!      the call on the device and broadcasts a `call_result` event.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use botlink_cockpit::BridgeServer;
//! use botlink_hal::SimRobot;
//! use botlink_runtime::{BridgeContext, CancellationToken};
//!
//! #[tokio::main]
//! async fn main() {
//!     let robot = Arc::new(SimRobot::builder().build());
//!     let ctx = Arc::new(BridgeContext::new(robot, Duration::from_secs(30)));
//!     BridgeServer::new(ctx)
//!         .run(CancellationToken::new())
//!         .await
//!         .expect("bridge server failed");
//! }
//! ```
//!
//! [`ConnectionRegistry`]: botlink_middleware::ConnectionRegistry

pub mod server;

pub use server::{BridgeServer, DEFAULT_PORT, process_message};
