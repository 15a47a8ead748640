//! Device collaborator traits: the robot and its light cubes.
//!
//! The bridge only ever talks to these traits, so the physical SDK binding
//! and the in-process [`SimRobot`][crate::sim::SimRobot] are interchangeable.
//! Immediate commands return `()`; commands that take time on the device
//! return an [`ActionHandle`] the caller may wait on.

use std::sync::Arc;
use std::time::Duration;

use botlink_types::{AnimTrigger, Angle, BridgeError, Distance, Light, SongNote, Speed};
use tokio::sync::broadcast;

use crate::action::ActionHandle;
use crate::camera::CameraFrame;

/// Number of backpack LEDs.
pub const BACKPACK_LIGHT_COUNT: usize = 5;
/// Number of corner LEDs on a light cube.
pub const CUBE_CORNER_COUNT: usize = 4;

/// Asynchronous notifications raised by the device.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// The camera produced a new frame.
    NewCameraFrame(Arc<CameraFrame>),
    /// A light cube was tapped.
    ObjectTapped { object_id: u32 },
}

/// Options for [`Robot::say_text`].
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechOptions {
    pub play_excited_animation: bool,
    pub use_robot_voice: bool,
    pub duration_scalar: f32,
    pub voice_pitch: f32,
    pub in_parallel: bool,
}

impl Default for SpeechOptions {
    fn default() -> Self {
        Self {
            play_excited_animation: false,
            use_robot_voice: true,
            duration_scalar: 1.0,
            voice_pitch: 0.0,
            in_parallel: false,
        }
    }
}

/// One of the light cubes paired with the robot.
pub trait LightCube: Send + Sync {
    /// Cube slot identifier, `1..=3`.
    fn cube_id(&self) -> u32;

    /// World object id reported in tap events and visibility queries.
    fn object_id(&self) -> u32;

    fn is_connected(&self) -> bool;

    /// Set all four corners to `light`.
    fn set_lights(&self, light: Light) -> Result<(), BridgeError>;

    /// Set each corner individually. The device always needs all four.
    fn set_light_corners(&self, corners: [Light; CUBE_CORNER_COUNT]) -> Result<ActionHandle, BridgeError>;

    fn set_lights_off(&self) -> Result<(), BridgeError> {
        self.set_lights(Light::OFF)
    }
}

/// The robot: sensor state, actions, world queries and camera.
pub trait Robot: Send + Sync {
    // ── Sensors ──────────────────────────────────────────────────────────
    fn battery_voltage(&self) -> f32;
    fn is_picked_up(&self) -> bool;
    fn is_charging(&self) -> bool;
    fn is_cliff_detected(&self) -> bool;
    fn is_moving(&self) -> bool;
    fn is_carrying_block(&self) -> bool;

    // ── World ────────────────────────────────────────────────────────────
    /// Look up a light cube by slot id.
    fn light_cube(&self, cube_id: u32) -> Option<Arc<dyn LightCube>>;

    /// `true` when the object is currently in the camera's view.
    fn is_visible(&self, object_id: u32) -> bool;

    // ── Actions ──────────────────────────────────────────────────────────
    fn say_text(&self, text: &str, options: &SpeechOptions) -> Result<ActionHandle, BridgeError>;

    fn drive_straight(
        &self,
        distance: Distance,
        speed: Speed,
        play_animation: bool,
        in_parallel: bool,
    ) -> Result<ActionHandle, BridgeError>;

    /// Drive the wheels directly. Runs until stopped or for `duration`.
    fn drive_wheels(&self, left_mmps: f64, right_mmps: f64, duration: Option<Duration>) -> Result<(), BridgeError>;

    fn turn_in_place(&self, angle: Angle, speed_dps: Option<f64>, in_parallel: bool) -> Result<ActionHandle, BridgeError>;

    fn set_head_angle(&self, angle: Angle, duration_s: f64, in_parallel: bool) -> Result<ActionHandle, BridgeError>;

    /// `height` is a ratio, `0.0` fully down to `1.0` fully up.
    fn set_lift_height(&self, height: f64, duration_s: f64, in_parallel: bool) -> Result<ActionHandle, BridgeError>;

    fn play_anim_trigger(&self, trigger: AnimTrigger, loop_count: u32, in_parallel: bool) -> Result<ActionHandle, BridgeError>;

    fn play_song(&self, notes: &[SongNote], in_parallel: bool) -> Result<ActionHandle, BridgeError>;

    fn stop_all_motors(&self) -> Result<(), BridgeError>;

    fn abort_all_actions(&self) -> Result<(), BridgeError>;

    fn set_backpack_lights(&self, lights: [Light; BACKPACK_LIGHT_COUNT]) -> Result<(), BridgeError>;

    fn set_all_backpack_lights(&self, light: Light) -> Result<(), BridgeError> {
        self.set_backpack_lights([light; BACKPACK_LIGHT_COUNT])
    }

    fn set_head_light(&self, enable: bool) -> Result<(), BridgeError>;

    // ── Camera ───────────────────────────────────────────────────────────
    /// Render the device's annotations plus `overlay` text onto `frame`.
    fn annotate_frame(&self, frame: &CameraFrame, overlay: &str) -> Result<CameraFrame, BridgeError>;

    /// Subscribe to camera and tap notifications.
    fn subscribe_events(&self) -> broadcast::Receiver<DeviceEvent>;
}
