//! [`CapabilityTable`] – the allow-list of remotely callable device paths.
//!
//! Only paths registered here can be invoked. Each entry maps a path
//! pattern (indices blanked to `[]`) to a handler bound at compile time, and
//! each indexable collection carries a validator that decides which indices
//! exist on the live device.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use botlink_hal::{
    ActionHandle, BACKPACK_LIGHT_COUNT, CUBE_CORNER_COUNT, LightCube, Robot, SpeechOptions,
};
use botlink_types::wire::is_truthy;
use botlink_types::{AnimTrigger, Angle, BridgeError, Distance, Light, SongNote, Speed};
use serde_json::{Value, json};

use crate::decoder::Arg;
use crate::path::CallPath;

/// Pattern of the corner-light capability, which the dispatcher merges
/// through the corner cache before invoking.
pub const SET_LIGHT_CORNERS: &str = "robot.world.light_cubes[].set_light_corners";

/// What a handler produced.
#[derive(Debug, Clone)]
pub enum Invoked {
    /// An immediate result.
    Value(Value),
    /// A long-running device action.
    Action(ActionHandle),
}

/// Arguments of one invocation, already decoded.
pub struct Invocation {
    pub path: String,
    pub robot: Arc<dyn Robot>,
    /// Index of the collection element addressed by the path, if any.
    pub index: Option<u32>,
    pub args: Vec<Arg>,
    pub kwargs: BTreeMap<String, Arg>,
}

pub type Handler = Arc<dyn Fn(&Invocation) -> Result<Invoked, BridgeError> + Send + Sync>;
pub type IndexValidator = Arc<dyn Fn(&dyn Robot, u32) -> bool + Send + Sync>;

/// A path resolved against the table.
#[derive(Clone)]
pub struct Resolved {
    pub path: CallPath,
    pub pattern: String,
    pub handler: Handler,
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolved").field("pattern", &self.pattern).finish_non_exhaustive()
    }
}

/// Allow-listed callable surface of the device.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use botlink_hal::{Robot, SimRobot};
/// use botlink_kernel::capability_table::CapabilityTable;
///
/// let robot: Arc<dyn Robot> = Arc::new(SimRobot::builder().with_cubes(3).build());
/// let table = CapabilityTable::robot_default();
///
/// assert!(table.resolve("robot.say_text", robot.as_ref()).is_ok());
/// assert!(table.resolve("world.light_cubes[2].set_lights", robot.as_ref()).is_ok());
/// assert!(table.resolve("world.light_cubes[9].set_lights", robot.as_ref()).is_err());
/// assert!(table.resolve("robot.__class__", robot.as_ref()).is_err());
/// ```
#[derive(Default)]
pub struct CapabilityTable {
    handlers: HashMap<String, Handler>,
    collections: HashMap<String, IndexValidator>,
}

impl CapabilityTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `pattern`. Re-registering replaces the previous handler.
    pub fn register<F>(&mut self, pattern: &str, handler: F)
    where
        F: Fn(&Invocation) -> Result<Invoked, BridgeError> + Send + Sync + 'static,
    {
        self.handlers.insert(pattern.to_string(), Arc::new(handler));
    }

    /// Declare `prefix` (e.g. `robot.world.light_cubes`) indexable.
    pub fn register_collection<F>(&mut self, prefix: &str, validator: F)
    where
        F: Fn(&dyn Robot, u32) -> bool + Send + Sync + 'static,
    {
        self.collections.insert(prefix.to_string(), Arc::new(validator));
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.handlers.contains_key(pattern)
    }

    /// Registered patterns, sorted.
    pub fn patterns(&self) -> Vec<&str> {
        let mut p: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        p.sort_unstable();
        p
    }

    /// Resolve `path` against the table and the live `robot`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Resolution`] for a malformed path, an index on a
    /// segment that is not a collection, an index the collection does not
    /// hold, or a pattern that is not registered.
    pub fn resolve(&self, path: &str, robot: &dyn Robot) -> Result<Resolved, BridgeError> {
        let parsed = CallPath::parse(path)?;
        let fail = |details: String| BridgeError::Resolution {
            path: path.to_string(),
            details,
        };

        let mut prefix = String::new();
        for segment in parsed.segments() {
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(&segment.name);
            if let Some(index) = segment.index {
                let validator = self
                    .collections
                    .get(&prefix)
                    .ok_or_else(|| fail(format!("`{}` is not an indexable collection", segment.name)))?;
                if !validator(robot, index) {
                    return Err(fail(format!("`{}` has no element [{index}]", segment.name)));
                }
                prefix.push_str("[]");
            }
        }

        let pattern = parsed.pattern();
        let handler = self
            .handlers
            .get(&pattern)
            .cloned()
            .ok_or_else(|| fail("no such capability".to_string()))?;
        Ok(Resolved {
            path: parsed,
            pattern,
            handler,
        })
    }

    /// The table clients drive: motion, speech, animation, lights and cubes.
    pub fn robot_default() -> Self {
        let mut t = Self::new();

        t.register_collection("robot.world.light_cubes", |robot, id| robot.light_cube(id).is_some());

        t.register("robot.say_text", |inv| {
            let defaults = SpeechOptions::default();
            let options = SpeechOptions {
                play_excited_animation: inv.flag(1, "play_excited_animation", defaults.play_excited_animation)?,
                use_robot_voice: inv.flag_any(2, &["use_robot_voice", "use_cozmo_voice"], defaults.use_robot_voice)?,
                duration_scalar: inv.number_or(3, "duration_scalar", f64::from(defaults.duration_scalar))? as f32,
                voice_pitch: inv.number_or(4, "voice_pitch", f64::from(defaults.voice_pitch))? as f32,
                in_parallel: inv.flag(5, "in_parallel", defaults.in_parallel)?,
            };
            let text = inv.text(0, "text")?;
            inv.robot.say_text(&text, &options).map(Invoked::Action)
        });

        t.register("robot.drive_straight", |inv| {
            let distance = inv.distance(0, "distance")?;
            let speed = inv.speed(1, "speed")?;
            let anim = inv.flag(2, "should_play_anim", true)?;
            let parallel = inv.flag(3, "in_parallel", false)?;
            inv.robot.drive_straight(distance, speed, anim, parallel).map(Invoked::Action)
        });

        t.register("robot.drive_wheels", |inv| {
            let left = inv.number(0, "l_wheel_speed")?;
            let right = inv.number(1, "r_wheel_speed")?;
            let duration = inv
                .optional_number(4, "duration")?
                .filter(|s| *s > 0.0)
                .map(Duration::from_secs_f64);
            inv.robot.drive_wheels(left, right, duration)?;
            Ok(Invoked::Value(Value::Null))
        });

        t.register("robot.turn_in_place", |inv| {
            let angle = inv.angle(0, "angle")?;
            let parallel = inv.flag(1, "in_parallel", false)?;
            let speed = match inv.arg(usize::MAX, "speed") {
                Some(Arg::Angle(a)) => Some(a.degrees),
                Some(_) => inv.optional_number(usize::MAX, "speed")?,
                None => None,
            };
            inv.robot.turn_in_place(angle, speed, parallel).map(Invoked::Action)
        });

        t.register("robot.set_head_angle", |inv| {
            let angle = inv.angle(0, "angle")?;
            let duration = inv.number_or(3, "duration", 0.0)?;
            // Position 4 is warn_on_clamp.
            let parallel = inv.flag(5, "in_parallel", false)?;
            inv.robot.set_head_angle(angle, duration, parallel).map(Invoked::Action)
        });

        t.register("robot.set_lift_height", |inv| {
            let height = inv.number(0, "height")?;
            let duration = inv.number_or(3, "duration", 0.0)?;
            let parallel = inv.flag(4, "in_parallel", false)?;
            inv.robot.set_lift_height(height, duration, parallel).map(Invoked::Action)
        });

        t.register("robot.play_anim_trigger", |inv| {
            let trigger = inv.anim(0, "trigger")?;
            let loops = inv.number_or(1, "loop_count", 1.0)?.max(1.0) as u32;
            let parallel = inv.flag(2, "in_parallel", false)?;
            inv.robot.play_anim_trigger(trigger, loops, parallel).map(Invoked::Action)
        });

        t.register("robot.play_song", |inv| {
            let notes = inv.notes(0, "song_notes")?;
            let parallel = inv.flag(2, "in_parallel", false)?;
            inv.robot.play_song(&notes, parallel).map(Invoked::Action)
        });

        t.register("robot.stop_all_motors", |inv| {
            inv.robot.stop_all_motors()?;
            Ok(Invoked::Value(Value::Null))
        });

        t.register("robot.abort_all_actions", |inv| {
            inv.robot.abort_all_actions()?;
            Ok(Invoked::Value(Value::Null))
        });

        t.register("robot.set_all_backpack_lights", |inv| {
            inv.robot.set_all_backpack_lights(inv.light(0, "light")?)?;
            Ok(Invoked::Value(Value::Null))
        });

        t.register("robot.set_backpack_lights", |inv| {
            let mut lights = [Light::OFF; BACKPACK_LIGHT_COUNT];
            for (i, slot) in lights.iter_mut().enumerate() {
                *slot = inv.light(i, &format!("light{}", i + 1))?;
            }
            inv.robot.set_backpack_lights(lights)?;
            Ok(Invoked::Value(Value::Null))
        });

        t.register("robot.set_head_light", |inv| {
            inv.robot.set_head_light(inv.flag(0, "enable", false)?)?;
            Ok(Invoked::Value(Value::Null))
        });

        t.register("robot.world.get_light_cube", |inv| {
            let id = inv.optional_number(0, "object_id")?;
            let cube = id
                .filter(|n| *n >= 0.0 && n.fract() == 0.0)
                .and_then(|n| inv.robot.light_cube(n as u32));
            Ok(Invoked::Value(match cube {
                Some(cube) => describe_cube(cube.as_ref(), inv.robot.as_ref()),
                None => Value::Null,
            }))
        });

        t.register("robot.world.light_cubes[].set_lights", |inv| {
            inv.cube()?.set_lights(inv.light(0, "light")?)?;
            Ok(Invoked::Value(Value::Null))
        });

        t.register("robot.world.light_cubes[].set_lights_off", |inv| {
            inv.cube()?.set_lights_off()?;
            Ok(Invoked::Value(Value::Null))
        });

        t.register(SET_LIGHT_CORNERS, |inv| {
            let mut corners = [Light::OFF; CUBE_CORNER_COUNT];
            for (i, slot) in corners.iter_mut().enumerate() {
                *slot = inv.light(i, &format!("light{}", i + 1))?;
            }
            inv.cube()?.set_light_corners(corners).map(Invoked::Action)
        });

        t
    }
}

fn describe_cube(cube: &dyn LightCube, robot: &dyn Robot) -> Value {
    json!({
        "cube_id": cube.cube_id(),
        "object_id": cube.object_id(),
        "is_connected": cube.is_connected(),
        "is_visible": robot.is_visible(cube.object_id()),
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Argument access
// ────────────────────────────────────────────────────────────────────────────

impl Invocation {
    /// Positional argument `pos`, else the named argument `name`.
    pub fn arg(&self, pos: usize, name: &str) -> Option<&Arg> {
        self.args.get(pos).or_else(|| self.kwargs.get(name))
    }

    fn invalid(&self, details: String) -> BridgeError {
        BridgeError::InvalidArgument {
            path: self.path.clone(),
            details,
        }
    }

    fn required(&self, pos: usize, name: &str) -> Result<&Arg, BridgeError> {
        self.arg(pos, name)
            .ok_or_else(|| self.invalid(format!("missing argument `{name}`")))
    }

    fn wrong_kind(&self, name: &str, expected: &str, got: &Arg) -> BridgeError {
        self.invalid(format!("`{name}` must be a {expected}, got {}", got.kind()))
    }

    pub fn number(&self, pos: usize, name: &str) -> Result<f64, BridgeError> {
        match self.required(pos, name)? {
            Arg::Raw(v) => v
                .as_f64()
                .ok_or_else(|| self.invalid(format!("`{name}` must be a number, got {v}"))),
            other => Err(self.wrong_kind(name, "number", other)),
        }
    }

    pub fn optional_number(&self, pos: usize, name: &str) -> Result<Option<f64>, BridgeError> {
        match self.arg(pos, name) {
            None | Some(Arg::Raw(Value::Null)) => Ok(None),
            Some(_) => self.number(pos, name).map(Some),
        }
    }

    pub fn number_or(&self, pos: usize, name: &str, default: f64) -> Result<f64, BridgeError> {
        Ok(self.optional_number(pos, name)?.unwrap_or(default))
    }

    /// Boolean flag using JSON truthiness.
    pub fn flag(&self, pos: usize, name: &str, default: bool) -> Result<bool, BridgeError> {
        match self.arg(pos, name) {
            None => Ok(default),
            Some(Arg::Raw(v)) => Ok(is_truthy(v)),
            Some(other) => Err(self.wrong_kind(name, "flag", other)),
        }
    }

    fn flag_any(&self, pos: usize, names: &[&str], default: bool) -> Result<bool, BridgeError> {
        match names.iter().find(|n| self.kwargs.contains_key(**n)) {
            Some(name) if self.args.get(pos).is_none() => self.flag(usize::MAX, name, default),
            _ => self.flag(pos, names[0], default),
        }
    }

    pub fn text(&self, pos: usize, name: &str) -> Result<String, BridgeError> {
        match self.required(pos, name)? {
            Arg::Raw(Value::String(s)) => Ok(s.clone()),
            Arg::Raw(Value::Null) => Err(self.invalid(format!("`{name}` must be text"))),
            Arg::Raw(v) => Ok(v.to_string()),
            other => Err(self.wrong_kind(name, "text", other)),
        }
    }

    pub fn distance(&self, pos: usize, name: &str) -> Result<Distance, BridgeError> {
        match self.required(pos, name)? {
            Arg::Distance(d) => Ok(*d),
            other => Err(self.wrong_kind(name, "distance", other)),
        }
    }

    pub fn speed(&self, pos: usize, name: &str) -> Result<Speed, BridgeError> {
        match self.required(pos, name)? {
            Arg::Speed(s) => Ok(*s),
            other => Err(self.wrong_kind(name, "speed", other)),
        }
    }

    pub fn angle(&self, pos: usize, name: &str) -> Result<Angle, BridgeError> {
        match self.required(pos, name)? {
            Arg::Angle(a) => Ok(*a),
            other => Err(self.wrong_kind(name, "angle", other)),
        }
    }

    pub fn anim(&self, pos: usize, name: &str) -> Result<AnimTrigger, BridgeError> {
        match self.required(pos, name)? {
            Arg::Anim(a) => Ok(*a),
            other => Err(self.wrong_kind(name, "animation trigger", other)),
        }
    }

    pub fn light(&self, pos: usize, name: &str) -> Result<Light, BridgeError> {
        match self.required(pos, name)? {
            Arg::Light(l) => Ok(*l),
            other => Err(self.wrong_kind(name, "light", other)),
        }
    }

    pub fn notes(&self, pos: usize, name: &str) -> Result<Vec<SongNote>, BridgeError> {
        match self.required(pos, name)? {
            Arg::List(items) => items
                .iter()
                .map(|item| match item {
                    Arg::Note(n) => Ok(*n),
                    other => Err(self.wrong_kind(name, "list of song notes", other)),
                })
                .collect(),
            other => Err(self.wrong_kind(name, "list of song notes", other)),
        }
    }

    /// The light cube addressed by the path index.
    pub fn cube(&self) -> Result<Arc<dyn LightCube>, BridgeError> {
        self.index
            .and_then(|id| self.robot.light_cube(id))
            .ok_or_else(|| BridgeError::Resolution {
                path: self.path.clone(),
                details: "light cube is no longer available".to_string(),
            })
    }
}
