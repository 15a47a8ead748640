//! [`Dispatcher`] – the single entry point for remote calls into the device.
//!
//! Every [`CallRequest`] passes through [`Dispatcher::dispatch`], which:
//!
//! 1. **Resolves** the path against the [`CapabilityTable`]; anything not
//!    allow-listed is a [`BridgeError::Resolution`].
//! 2. **Decodes** positional and named arguments with the lenient decoder.
//!    Corner-light calls are first merged through the [`CornerLightCache`].
//! 3. **Invokes** the handler on a blocking worker so a slow device call
//!    never stalls the async runtime.
//! 4. Optionally **waits** for the returned action, bounded by the
//!    configured action timeout.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use botlink_hal::{Robot, SimRobot};
//! use botlink_kernel::Dispatcher;
//! use botlink_types::CallRequest;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let robot: Arc<dyn Robot> = Arc::new(SimRobot::builder().build());
//! let dispatcher = Dispatcher::new(robot, Duration::from_secs(5));
//!
//! let req = CallRequest { path: "robot.stop_all_motors".into(), ..Default::default() };
//! assert!(dispatcher.dispatch(req).await.is_ok());
//!
//! let req = CallRequest { path: "robot.os.system".into(), ..Default::default() };
//! assert!(dispatcher.dispatch(req).await.is_err());
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use botlink_hal::Robot;
use botlink_types::{BridgeError, CallRequest, CallResult, Light};
use tracing::{debug, warn};

use crate::capability_table::{CapabilityTable, Invocation, Invoked, SET_LIGHT_CORNERS};
use crate::corner_cache::{CornerLightCache, CornerSet};
use crate::decoder::{Arg, decode};

/// Resolves, decodes and invokes remote calls.
pub struct Dispatcher {
    robot: Arc<dyn Robot>,
    table: Arc<CapabilityTable>,
    corners: CornerLightCache,
    action_timeout: Duration,
}

impl Dispatcher {
    /// Dispatcher over the default capability table.
    pub fn new(robot: Arc<dyn Robot>, action_timeout: Duration) -> Self {
        Self::with_table(robot, CapabilityTable::robot_default(), action_timeout)
    }

    pub fn with_table(robot: Arc<dyn Robot>, table: CapabilityTable, action_timeout: Duration) -> Self {
        Self {
            robot,
            table: Arc::new(table),
            corners: CornerLightCache::new(),
            action_timeout,
        }
    }

    pub fn corner_cache(&self) -> &CornerLightCache {
        &self.corners
    }

    pub fn table(&self) -> &CapabilityTable {
        &self.table
    }

    /// Run one call to completion.
    ///
    /// Device-reported failures are not errors: they come back as a
    /// [`CallResult`] whose `state` is `action_failed`.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::Resolution`] – the path is not allow-listed.
    /// - [`BridgeError::InvalidArgument`] – the handler rejected an argument.
    /// - [`BridgeError::Timeout`] – the awaited action did not finish in time.
    /// - [`BridgeError::HardwareFault`] – the device or its worker failed.
    pub async fn dispatch(&self, req: CallRequest) -> Result<CallResult, BridgeError> {
        let resolved = self.table.resolve(&req.path, self.robot.as_ref())?;
        let index = resolved.path.last_index();

        let mut merged: Option<(u32, CornerSet)> = None;
        let args: Vec<Arg> = match index {
            Some(device_id) if resolved.pattern == SET_LIGHT_CORNERS => {
                let corners = self.corners.apply_corner_update(device_id, &req.args);
                let decoded = corners
                    .iter()
                    .map(|c| c.as_ref().map(decode).unwrap_or(Arg::Light(Light::OFF)))
                    .collect();
                merged = Some((device_id, corners));
                decoded
            }
            _ => req.args.iter().map(decode).collect(),
        };
        let kwargs: BTreeMap<String, Arg> = req
            .kwargs
            .iter()
            .map(|(k, v)| (k.clone(), decode(v)))
            .collect();

        let invocation = Invocation {
            path: req.path.clone(),
            robot: Arc::clone(&self.robot),
            index,
            args,
            kwargs,
        };
        let handler = Arc::clone(&resolved.handler);
        let invoked = tokio::task::spawn_blocking(move || handler(&invocation))
            .await
            .map_err(|e| BridgeError::HardwareFault {
                component: req.path.clone(),
                details: format!("device worker failed: {e}"),
            })??;

        let mut out = CallResult {
            call_id: req.call_id.clone(),
            ..CallResult::default()
        };
        let failed = match invoked {
            Invoked::Value(v) => {
                out.result = v;
                false
            }
            Invoked::Action(handle) => {
                let status = if req.await_completion {
                    handle.wait_for_completed(self.action_timeout).await?
                } else {
                    handle.status()
                };
                out.result = handle.describe();
                out.state = Some(status.state.as_str().to_string());
                out.failure_reason = status.failure_reason.clone();
                out.failure_code = status.failure_code.clone();
                status.is_failed()
            }
        };

        if let Some((device_id, corners)) = merged {
            if failed {
                warn!(device_id, path = %req.path, "corner update failed, cache unchanged");
            } else {
                debug!(device_id, "corner lights cached");
                self.corners.commit(device_id, corners);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botlink_hal::SimRobot;
    use botlink_types::Color;
    use serde_json::{Map, Value, json};

    fn setup() -> (Arc<SimRobot>, Dispatcher) {
        let sim = Arc::new(SimRobot::builder().with_cubes(3).build());
        let dispatcher = Dispatcher::new(sim.clone(), Duration::from_millis(200));
        (sim, dispatcher)
    }

    fn call(path: &str, args: Vec<Value>) -> CallRequest {
        CallRequest {
            path: path.to_string(),
            args,
            ..Default::default()
        }
    }

    fn light(r: u8, g: u8, b: u8) -> Value {
        json!({"__type": "light", "value": [r, g, b]})
    }

    #[tokio::test]
    async fn action_result_carries_state_and_call_id() {
        let (sim, d) = setup();
        let mut req = call(
            "robot.drive_straight",
            vec![
                json!({"__type": "distance_mm", "value": 100}),
                json!({"__type": "speed_mmps", "value": 50}),
            ],
        );
        req.call_id = Some("c1".into());
        req.await_completion = true;

        let res = d.dispatch(req).await.unwrap();
        assert_eq!(res.state.as_deref(), Some("action_succeeded"));
        assert_eq!(res.call_id.as_deref(), Some("c1"));
        assert_eq!(res.result["action"], json!("drive_straight"));
        assert!(sim.calls()[0].starts_with("drive_straight distance_mm=100"));
    }

    #[tokio::test]
    async fn immediate_call_has_no_state() {
        let (_, d) = setup();
        let res = d.dispatch(call("robot.stop_all_motors", vec![])).await.unwrap();
        assert_eq!(res.result, Value::Null);
        assert!(res.state.is_none());
    }

    #[tokio::test]
    async fn device_failure_is_reported_not_raised() {
        let (sim, d) = setup();
        sim.fail_next_action("cliff_detected");
        let res = d
            .dispatch(call("robot.set_head_angle", vec![json!({"__type": "degrees", "value": 10})]))
            .await
            .unwrap();
        assert_eq!(res.state.as_deref(), Some("action_failed"));
        assert_eq!(res.failure_reason.as_deref(), Some("cliff_detected"));
    }

    #[tokio::test]
    async fn unknown_path_fails_resolution() {
        let (_, d) = setup();
        let err = d.dispatch(call("robot.nonexistent", vec![])).await.unwrap_err();
        assert!(matches!(err, BridgeError::Resolution { .. }));
    }

    #[tokio::test]
    async fn raw_value_where_typed_required_is_invalid() {
        let (_, d) = setup();
        let err = d
            .dispatch(call("robot.turn_in_place", vec![json!({"__type": "degrees", "value": "x"})]))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn awaited_action_times_out() {
        let sim = Arc::new(
            SimRobot::builder()
                .with_action_duration(Duration::from_secs(5))
                .build(),
        );
        let d = Dispatcher::new(sim, Duration::from_millis(30));
        let mut req = call("robot.say_text", vec![json!("hello")]);
        req.await_completion = true;
        let err = d.dispatch(req).await.unwrap_err();
        assert!(matches!(err, BridgeError::Timeout { .. }));
    }

    #[tokio::test]
    async fn corner_update_merges_with_cache() {
        let (sim, d) = setup();
        let path = "robot.world.light_cubes[2].set_light_corners";
        d.dispatch(call(path, vec![light(1, 0, 0), light(2, 0, 0), light(3, 0, 0), light(4, 0, 0)]))
            .await
            .unwrap();

        d.dispatch(call(path, vec![light(0, 0, 0), light(0, 0, 0), light(5, 0, 0), light(0, 0, 0)]))
            .await
            .unwrap();

        let corners = sim.sim_cube(2).unwrap().corners();
        let reds: Vec<u8> = corners.iter().map(|l| l.on_color.r).collect();
        assert_eq!(reds, vec![1, 2, 5, 4]);
        assert_eq!(d.corner_cache().snapshot(2).unwrap()[2], Some(light(5, 0, 0)));
    }

    #[tokio::test]
    async fn failed_corner_update_keeps_cache() {
        let (sim, d) = setup();
        let path = "world.light_cubes[1].set_light_corners";
        let first = vec![light(1, 0, 0), light(2, 0, 0), light(3, 0, 0), light(4, 0, 0)];
        d.dispatch(call(path, first.clone())).await.unwrap();

        sim.sim_cube(1).unwrap().set_connected(false);
        let res = d
            .dispatch(call(path, vec![light(0, 0, 0), light(0, 0, 0), light(9, 0, 0), light(0, 0, 0)]))
            .await
            .unwrap();
        assert_eq!(res.state.as_deref(), Some("action_failed"));

        let cached: Vec<Value> = d.corner_cache().snapshot(1).unwrap().into_iter().flatten().collect();
        assert_eq!(cached, first);
    }

    #[tokio::test]
    async fn missing_corners_default_to_off() {
        let (sim, d) = setup();
        d.dispatch(call("robot.world.light_cubes[3].set_light_corners", vec![light(7, 7, 7)]))
            .await
            .unwrap();
        let corners = sim.sim_cube(3).unwrap().corners();
        assert_eq!(corners[0], Light::steady(Color::rgb(7, 7, 7)));
        assert!(corners[1..].iter().all(Light::is_off));
    }

    #[tokio::test]
    async fn named_arguments_are_decoded() {
        let (sim, d) = setup();
        let mut kwargs = Map::new();
        kwargs.insert("trigger".into(), json!({"__type": "anim", "value": "MajorWin"}));
        kwargs.insert("loop_count".into(), json!(2));
        let req = CallRequest {
            path: "robot.play_anim_trigger".into(),
            kwargs,
            ..Default::default()
        };
        d.dispatch(req).await.unwrap();
        assert!(sim.calls()[0].starts_with("play_anim_trigger name=MajorWin loops=2"));
    }

    #[tokio::test]
    async fn song_notes_decode_from_list() {
        let (sim, d) = setup();
        let notes = json!([
            {"__type": "songnote", "value": {"noteType": "C2", "noteDuration": "Quarter"}},
            {"__type": "songnote", "value": {"noteType": "E2", "noteDuration": "Half"}}
        ]);
        d.dispatch(call("robot.play_song", vec![notes])).await.unwrap();
        assert!(sim.calls()[0].starts_with("play_song notes=C2,E2"));
    }
}
