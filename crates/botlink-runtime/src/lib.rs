//! `botlink-runtime` – shared server state and the background push tasks.
//!
//! # Modules
//!
//! - [`context`] – [`BridgeContext`][context::BridgeContext]: the device,
//!   dispatcher, connection registry, tap slot and frame slot, owned in one
//!   place and shared as `Arc`.
//! - [`snapshot`] – builds [`StateSnapshot`][botlink_types::StateSnapshot]s
//!   and holds the pending cube tap.
//! - [`push_loops`] – the periodic state and camera pushers and the device
//!   event pump, all cancellable through a `CancellationToken`.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console logs
//!   plus optional OTLP span export.

pub mod context;
pub mod push_loops;
pub mod snapshot;
pub mod telemetry;

pub use context::BridgeContext;
pub use push_loops::{PushRates, spawn_push_loops};
pub use snapshot::TapSlot;
pub use tokio_util::sync::CancellationToken;
