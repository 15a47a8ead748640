//! Point-in-time projection of device state.

use std::sync::{Mutex, PoisonError};

use botlink_hal::Robot;
use botlink_types::{StateSnapshot, battery_label};

/// Last cube tap, consumed by the next snapshot that is sent.
#[derive(Debug, Default)]
pub struct TapSlot {
    last: Mutex<Option<u32>>,
}

impl TapSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tap, replacing any tap not yet reported.
    pub fn set(&self, object_id: u32) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(object_id);
    }

    /// Take the pending tap, leaving the slot empty.
    pub fn take(&self) -> Option<u32> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub fn peek(&self) -> Option<u32> {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Read every sensor and cube flag of `robot`.
pub fn build_snapshot(robot: &dyn Robot, cube_tapped_id: Option<u32>) -> StateSnapshot {
    let cube = |id: u32| match robot.light_cube(id) {
        Some(c) => (c.is_connected(), robot.is_visible(c.object_id())),
        None => (false, false),
    };
    let (cube_1_connected, cube_1_visible) = cube(1);
    let (cube_2_connected, cube_2_visible) = cube(2);
    let (cube_3_connected, cube_3_visible) = cube(3);

    let voltage = robot.battery_voltage();
    let charging = robot.is_charging();
    StateSnapshot {
        battery_voltage: voltage,
        battery_percent: battery_label(voltage, charging),
        is_picked_up: robot.is_picked_up(),
        is_charging: charging,
        is_cliff_detected: robot.is_cliff_detected(),
        is_moving: robot.is_moving(),
        is_carrying_block: robot.is_carrying_block(),
        cube_1_connected,
        cube_1_visible,
        cube_2_connected,
        cube_2_visible,
        cube_3_connected,
        cube_3_visible,
        cube_tapped_id,
    }
}

/// Battery text drawn onto camera frames.
pub fn battery_overlay(robot: &dyn Robot) -> String {
    format!("{} ", battery_label(robot.battery_voltage(), robot.is_charging()))
}
