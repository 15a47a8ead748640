//! In-process robot simulation for running the bridge without hardware.
//!
//! [`SimRobot`] implements [`Robot`] with settable sensor state, simulated
//! light cubes, a synthetic camera feed and a journal of every command it
//! received, so the whole stack runs in headless tests and CI.
//!
//! # Example
//!
//! ```rust
//! use botlink_hal::sim::SimRobot;
//! use botlink_hal::Robot;
//!
//! let robot = SimRobot::builder()
//!     .with_cubes(3)
//!     .with_battery_voltage(3.9)
//!     .build();
//!
//! robot.stop_all_motors().expect("sim commands always succeed");
//! assert_eq!(robot.calls(), vec!["stop_all_motors".to_string()]);
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use botlink_types::{AnimTrigger, Angle, BridgeError, Distance, Light, SongNote, Speed};
use image::{Rgb, RgbImage};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::action::{ActionHandle, ActionStatus};
use crate::camera::CameraFrame;
use crate::robot::{
    BACKPACK_LIGHT_COUNT, CUBE_CORNER_COUNT, DeviceEvent, LightCube, Robot, SpeechOptions,
};

const EVENT_CAPACITY: usize = 64;
const SIM_FRAME_WIDTH: u32 = 320;
const SIM_FRAME_HEIGHT: u32 = 240;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Settable sensor readings of a [`SimRobot`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimSensors {
    pub battery_voltage: f32,
    pub is_picked_up: bool,
    pub is_charging: bool,
    pub is_cliff_detected: bool,
    pub is_moving: bool,
    pub is_carrying_block: bool,
}

impl Default for SimSensors {
    fn default() -> Self {
        Self {
            battery_voltage: 4.0,
            is_picked_up: false,
            is_charging: false,
            is_cliff_detected: false,
            is_moving: false,
            is_carrying_block: false,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated light cube
// ────────────────────────────────────────────────────────────────────────────

/// A simulated light cube that records its corner lights.
#[derive(Debug)]
pub struct SimLightCube {
    cube_id: u32,
    connected: AtomicBool,
    corners: Mutex<[Light; CUBE_CORNER_COUNT]>,
}

impl SimLightCube {
    pub fn new(cube_id: u32) -> Self {
        Self {
            cube_id,
            connected: AtomicBool::new(true),
            corners: Mutex::new([Light::OFF; CUBE_CORNER_COUNT]),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    /// Lights currently shown on the four corners.
    pub fn corners(&self) -> [Light; CUBE_CORNER_COUNT] {
        *lock(&self.corners)
    }
}

impl LightCube for SimLightCube {
    fn cube_id(&self) -> u32 {
        self.cube_id
    }

    fn object_id(&self) -> u32 {
        self.cube_id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn set_lights(&self, light: Light) -> Result<(), BridgeError> {
        if !self.is_connected() {
            return Err(BridgeError::HardwareFault {
                component: format!("light_cube_{}", self.cube_id),
                details: "cube is not connected".to_string(),
            });
        }
        *lock(&self.corners) = [light; CUBE_CORNER_COUNT];
        Ok(())
    }

    fn set_light_corners(&self, corners: [Light; CUBE_CORNER_COUNT]) -> Result<ActionHandle, BridgeError> {
        let name = format!("light_cubes[{}].set_light_corners", self.cube_id);
        if !self.is_connected() {
            return Ok(ActionHandle::completed(
                name,
                ActionStatus::failed("cube_not_connected", None),
            ));
        }
        *lock(&self.corners) = corners;
        Ok(ActionHandle::completed(name, ActionStatus::succeeded()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated robot
// ────────────────────────────────────────────────────────────────────────────

/// A simulated robot. Always accepts commands unless a failure was armed
/// with [`SimRobot::fail_next_action`].
#[derive(Debug)]
pub struct SimRobot {
    sensors: Mutex<SimSensors>,
    cubes: Vec<Arc<SimLightCube>>,
    visible: Mutex<HashSet<u32>>,
    backpack: Mutex<[Light; BACKPACK_LIGHT_COUNT]>,
    head_light: AtomicBool,
    journal: Mutex<Vec<String>>,
    armed_failure: Mutex<Option<String>>,
    action_duration: Duration,
    events: broadcast::Sender<DeviceEvent>,
}

impl SimRobot {
    pub fn builder() -> SimRobotBuilder {
        SimRobotBuilder::default()
    }

    /// Simulated cube by slot id.
    pub fn sim_cube(&self, cube_id: u32) -> Option<Arc<SimLightCube>> {
        self.cubes.iter().find(|c| c.cube_id == cube_id).cloned()
    }

    pub fn set_sensors(&self, sensors: SimSensors) {
        *lock(&self.sensors) = sensors;
    }

    pub fn update_sensors(&self, f: impl FnOnce(&mut SimSensors)) {
        f(&mut lock(&self.sensors));
    }

    pub fn set_visible(&self, object_id: u32, visible: bool) {
        let mut set = lock(&self.visible);
        if visible {
            set.insert(object_id);
        } else {
            set.remove(&object_id);
        }
    }

    /// Make the next action-returning command finish as `action_failed`.
    pub fn fail_next_action(&self, reason: impl Into<String>) {
        *lock(&self.armed_failure) = Some(reason.into());
    }

    /// Every command received so far, oldest first.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.journal).clone()
    }

    pub fn backpack_lights(&self) -> [Light; BACKPACK_LIGHT_COUNT] {
        *lock(&self.backpack)
    }

    pub fn head_light(&self) -> bool {
        self.head_light.load(Ordering::Acquire)
    }

    /// Raise a tap notification for `object_id`.
    pub fn tap(&self, object_id: u32) {
        let _ = self.events.send(DeviceEvent::ObjectTapped { object_id });
    }

    /// Raise a new-frame notification.
    pub fn push_frame(&self, frame: CameraFrame) {
        let _ = self.events.send(DeviceEvent::NewCameraFrame(Arc::new(frame)));
    }

    /// Feed synthetic frames at `fps` until the returned task is aborted.
    pub fn spawn_camera_feed(self: &Arc<Self>, fps: f64) -> JoinHandle<()> {
        let robot = Arc::clone(self);
        let period = Duration::from_secs_f64(1.0 / fps.max(0.1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut tick: u32 = 0;
            loop {
                ticker.tick().await;
                robot.push_frame(synthetic_frame(tick));
                tick = tick.wrapping_add(1);
            }
        })
    }

    fn record(&self, entry: String) {
        debug!(call = %entry, "sim robot command");
        lock(&self.journal).push(entry);
    }

    fn start_action(&self, entry: String) -> ActionHandle {
        let name = entry.split_whitespace().next().unwrap_or("action").to_string();
        self.record(entry);

        if let Some(reason) = lock(&self.armed_failure).take() {
            return ActionHandle::completed(name, ActionStatus::failed(reason, None));
        }
        if self.action_duration.is_zero() {
            return ActionHandle::completed(name, ActionStatus::succeeded());
        }

        let (handle, completer) = ActionHandle::pending(name);
        let duration = self.action_duration;
        std::thread::spawn(move || {
            std::thread::sleep(duration);
            completer.succeed();
        });
        handle
    }
}

/// A moving gradient so clients can see the feed is live.
fn synthetic_frame(tick: u32) -> CameraFrame {
    let shift = (tick % 256) as u8;
    let image = RgbImage::from_fn(SIM_FRAME_WIDTH, SIM_FRAME_HEIGHT, |x, y| {
        Rgb([(x as u8).wrapping_add(shift), y as u8, 96])
    });
    CameraFrame::from_image(image)
}

impl Robot for SimRobot {
    fn battery_voltage(&self) -> f32 {
        lock(&self.sensors).battery_voltage
    }

    fn is_picked_up(&self) -> bool {
        lock(&self.sensors).is_picked_up
    }

    fn is_charging(&self) -> bool {
        lock(&self.sensors).is_charging
    }

    fn is_cliff_detected(&self) -> bool {
        lock(&self.sensors).is_cliff_detected
    }

    fn is_moving(&self) -> bool {
        lock(&self.sensors).is_moving
    }

    fn is_carrying_block(&self) -> bool {
        lock(&self.sensors).is_carrying_block
    }

    fn light_cube(&self, cube_id: u32) -> Option<Arc<dyn LightCube>> {
        self.sim_cube(cube_id).map(|c| c as Arc<dyn LightCube>)
    }

    fn is_visible(&self, object_id: u32) -> bool {
        lock(&self.visible).contains(&object_id)
    }

    fn say_text(&self, text: &str, options: &SpeechOptions) -> Result<ActionHandle, BridgeError> {
        Ok(self.start_action(format!(
            "say_text text={text:?} pitch={} parallel={}",
            options.voice_pitch, options.in_parallel
        )))
    }

    fn drive_straight(
        &self,
        distance: Distance,
        speed: Speed,
        play_animation: bool,
        in_parallel: bool,
    ) -> Result<ActionHandle, BridgeError> {
        Ok(self.start_action(format!(
            "drive_straight distance_mm={} speed_mmps={} anim={play_animation} parallel={in_parallel}",
            distance.mm, speed.mmps
        )))
    }

    fn drive_wheels(&self, left_mmps: f64, right_mmps: f64, duration: Option<Duration>) -> Result<(), BridgeError> {
        self.record(format!(
            "drive_wheels left={left_mmps} right={right_mmps} duration={:?}",
            duration.map(|d| d.as_secs_f64())
        ));
        Ok(())
    }

    fn turn_in_place(&self, angle: Angle, speed_dps: Option<f64>, in_parallel: bool) -> Result<ActionHandle, BridgeError> {
        Ok(self.start_action(format!(
            "turn_in_place degrees={} speed_dps={speed_dps:?} parallel={in_parallel}",
            angle.degrees
        )))
    }

    fn set_head_angle(&self, angle: Angle, duration_s: f64, in_parallel: bool) -> Result<ActionHandle, BridgeError> {
        Ok(self.start_action(format!(
            "set_head_angle degrees={} duration={duration_s} parallel={in_parallel}",
            angle.degrees
        )))
    }

    fn set_lift_height(&self, height: f64, duration_s: f64, in_parallel: bool) -> Result<ActionHandle, BridgeError> {
        Ok(self.start_action(format!(
            "set_lift_height height={height} duration={duration_s} parallel={in_parallel}"
        )))
    }

    fn play_anim_trigger(&self, trigger: AnimTrigger, loop_count: u32, in_parallel: bool) -> Result<ActionHandle, BridgeError> {
        Ok(self.start_action(format!(
            "play_anim_trigger name={} loops={loop_count} parallel={in_parallel}",
            trigger.name()
        )))
    }

    fn play_song(&self, notes: &[SongNote], in_parallel: bool) -> Result<ActionHandle, BridgeError> {
        let names: Vec<&str> = notes.iter().map(|n| n.note_type.name()).collect();
        Ok(self.start_action(format!(
            "play_song notes={} parallel={in_parallel}",
            names.join(",")
        )))
    }

    fn stop_all_motors(&self) -> Result<(), BridgeError> {
        self.record("stop_all_motors".to_string());
        Ok(())
    }

    fn abort_all_actions(&self) -> Result<(), BridgeError> {
        self.record("abort_all_actions".to_string());
        Ok(())
    }

    fn set_backpack_lights(&self, lights: [Light; BACKPACK_LIGHT_COUNT]) -> Result<(), BridgeError> {
        self.record("set_backpack_lights".to_string());
        *lock(&self.backpack) = lights;
        Ok(())
    }

    fn set_head_light(&self, enable: bool) -> Result<(), BridgeError> {
        self.record(format!("set_head_light enable={enable}"));
        self.head_light.store(enable, Ordering::Release);
        Ok(())
    }

    fn annotate_frame(&self, frame: &CameraFrame, overlay: &str) -> Result<CameraFrame, BridgeError> {
        let mut image = frame.to_image()?;
        let (w, h) = image.dimensions();
        // White label box with a black outline, anchored top-right.
        let box_w = (overlay.len() as u32 * 6 + 4).min(w);
        let box_h = 12.min(h);
        let x0 = w - box_w;
        for y in 0..box_h {
            for x in x0..w {
                let edge = y == 0 || y + 1 == box_h || x == x0 || x + 1 == w;
                let px = if edge { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) };
                image.put_pixel(x, y, px);
            }
        }
        Ok(CameraFrame::from_image(image))
    }

    fn subscribe_events(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Builder
// ────────────────────────────────────────────────────────────────────────────

/// Builder for a [`SimRobot`].
#[derive(Debug, Default)]
pub struct SimRobotBuilder {
    cube_count: u32,
    sensors: SimSensors,
    action_duration: Duration,
}

impl SimRobotBuilder {
    /// Pair `count` light cubes with slot ids `1..=count`.
    pub fn with_cubes(mut self, count: u32) -> Self {
        self.cube_count = count;
        self
    }

    pub fn with_battery_voltage(mut self, voltage: f32) -> Self {
        self.sensors.battery_voltage = voltage;
        self
    }

    /// How long actions stay running before succeeding. Zero (the default)
    /// completes them immediately.
    pub fn with_action_duration(mut self, duration: Duration) -> Self {
        self.action_duration = duration;
        self
    }

    pub fn build(self) -> SimRobot {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        SimRobot {
            sensors: Mutex::new(self.sensors),
            cubes: (1..=self.cube_count)
                .map(|id| Arc::new(SimLightCube::new(id)))
                .collect(),
            visible: Mutex::new(HashSet::new()),
            backpack: Mutex::new([Light::OFF; BACKPACK_LIGHT_COUNT]),
            head_light: AtomicBool::new(false),
            journal: Mutex::new(Vec::new()),
            armed_failure: Mutex::new(None),
            action_duration: self.action_duration,
            events,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
