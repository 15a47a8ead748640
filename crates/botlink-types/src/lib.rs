//! `botlink-types` – shared vocabulary of the bridge.
//!
//! - [`value`] – domain value objects the device consumes (distances,
//!   speeds, angles, song notes, animation triggers, lights).
//! - [`wire`] – JSON protocol messages exchanged with remote clients.
//! - [`BridgeError`] – the error type every crate in the workspace returns.

pub mod value;
pub mod wire;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use value::{AnimTrigger, Angle, Color, Distance, Light, NoteDuration, NoteType, SongNote, Speed};
pub use wire::{
    Ack, CallOutcome, CallRequest, CallResult, Command, EventEnvelope, InboundMessage,
    StateEnvelope, StateSnapshot,
};

/// Battery voltage reported by a fully charged pack.
pub const BATTERY_MAX_VOLTAGE: f32 = 4.2;
/// Battery voltage at which the pack is considered empty.
pub const BATTERY_MIN_VOLTAGE: f32 = 3.3;

/// Global error type spanning path resolution, device faults and transport
/// failures.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BridgeError {
    #[error("cannot resolve `{path}`: {details}")]
    Resolution { path: String, details: String },

    #[error("invalid argument for `{path}`: {details}")]
    InvalidArgument { path: String, details: String },

    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("`{path}` did not complete within {timeout_ms} ms")]
    Timeout { path: String, timeout_ms: u64 },

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Protocol Error: {0}")]
    Protocol(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Serialization(e.to_string())
    }
}

/// Linear battery charge estimate in percent, clamped to `0.0..=100.0`.
pub fn battery_percent(voltage: f32) -> f32 {
    if voltage >= BATTERY_MAX_VOLTAGE {
        return 100.0;
    }
    if voltage <= BATTERY_MIN_VOLTAGE {
        return 0.0;
    }
    100.0 * (voltage - BATTERY_MIN_VOLTAGE) / (BATTERY_MAX_VOLTAGE - BATTERY_MIN_VOLTAGE)
}

/// Human-readable battery label used in state snapshots, e.g. `"57%"`.
pub fn battery_label(voltage: f32, is_charging: bool) -> String {
    if is_charging {
        "charging...".to_string()
    } else {
        format!("{}%", battery_percent(voltage).round() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn battery_percent_bounds() {
        assert_eq!(battery_percent(3.3), 0.0);
        assert_eq!(battery_percent(4.2), 100.0);
        assert!((battery_percent(3.75) - 50.0).abs() < 0.01);
    }

    #[test]
    fn battery_percent_clamps_outside_range() {
        assert_eq!(battery_percent(2.0), 0.0);
        assert_eq!(battery_percent(5.0), 100.0);
    }

    #[test]
    fn battery_label_formats() {
        assert_eq!(battery_label(3.75, false), "50%");
        assert_eq!(battery_label(3.75, true), "charging...");
    }

    #[test]
    fn bridge_error_display() {
        let err = BridgeError::Resolution {
            path: "world.unknownThing".to_string(),
            details: "no capability".to_string(),
        };
        assert!(err.to_string().contains("world.unknownThing"));

        let err2 = BridgeError::HardwareFault {
            component: "lift".to_string(),
            details: "stalled".to_string(),
        };
        assert!(err2.to_string().contains("lift"));
    }
}
