//! `botlink-middleware` – client connections and fan-out.
//!
//! - [`sink`] – [`FrameSink`], the transport seam, and [`WsSink`], its
//!   WebSocket implementation.
//! - [`registry`] – [`ConnectionRegistry`]: live connections, per-connection
//!   write locks, scatter-gather broadcast and unicast.

pub mod registry;
pub mod sink;

pub use registry::{Connection, ConnectionId, ConnectionRegistry};
pub use sink::{Frame, FrameSink, WsSink};
