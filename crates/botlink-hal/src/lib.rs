//! `botlink-hal` – device abstraction for the bridge.
//!
//! - [`robot`] – the [`Robot`] and [`LightCube`] traits every driver implements.
//! - [`action`] – [`ActionHandle`], the completion future returned by
//!   long-running device commands.
//! - [`camera`] – [`CameraFrame`] and the latest-frame [`FrameSlot`].
//! - [`sim`] – [`SimRobot`], an in-process robot for tests and demos.

pub mod action;
pub mod camera;
pub mod robot;
pub mod sim;

pub use action::{ActionCompleter, ActionHandle, ActionState, ActionStatus};
pub use camera::{CameraFrame, FrameSlot};
pub use robot::{
    BACKPACK_LIGHT_COUNT, CUBE_CORNER_COUNT, DeviceEvent, LightCube, Robot, SpeechOptions,
};
pub use sim::{SimLightCube, SimRobot, SimRobotBuilder, SimSensors};
