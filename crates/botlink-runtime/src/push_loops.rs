//! Background tasks that push device data to every client.
//!
//! - **State loop** – broadcasts a state snapshot at a fixed rate.
//! - **Camera loop** – annotates, PNG-encodes and broadcasts the latest
//!   camera frame at a fixed rate. It never waits for a new frame.
//! - **Event pump** – stores incoming camera frames and reacts to cube taps
//!   with an immediate state broadcast.
//!
//! All three stop when their [`CancellationToken`] is cancelled. A tick that
//! fails is logged and the loop carries on.

use std::sync::Arc;
use std::time::Duration;

use botlink_hal::DeviceEvent;
use botlink_types::BridgeError;
use botlink_types::wire::{EVENT_CAMERA_FRAME, FrameMeta};
use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::BridgeContext;
use crate::snapshot::battery_overlay;

/// Push frequencies in Hz. Zero disables a loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PushRates {
    pub state_hz: f64,
    pub camera_hz: f64,
}

impl Default for PushRates {
    fn default() -> Self {
        Self {
            state_hz: 5.0,
            camera_hz: 30.0,
        }
    }
}

/// Tick period for `hz`, or `None` when the loop is disabled.
pub fn period(hz: f64) -> Option<Duration> {
    (hz.is_finite() && hz > 0.0).then(|| Duration::from_secs_f64(1.0 / hz))
}

/// Spawn the state loop, camera loop and event pump.
pub fn spawn_push_loops(
    ctx: Arc<BridgeContext>,
    rates: PushRates,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(run_state_loop(Arc::clone(&ctx), rates.state_hz, cancel.clone())),
        tokio::spawn(run_camera_loop(Arc::clone(&ctx), rates.camera_hz, cancel.clone())),
        tokio::spawn(run_event_pump(ctx, cancel)),
    ]
}

// ────────────────────────────────────────────────────────────────────────────
// State
// ────────────────────────────────────────────────────────────────────────────

pub async fn run_state_loop(ctx: Arc<BridgeContext>, hz: f64, cancel: CancellationToken) {
    let Some(period) = period(hz) else {
        info!("state pusher disabled");
        return;
    };
    info!(hz, interval_ms = period.as_millis() as u64, "starting state pusher");

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = state_tick(&ctx).await {
                    warn!(error = %e, "state pusher error");
                }
            }
        }
    }
    debug!("state pusher stopped");
}

/// One state broadcast. Returns the number of clients reached.
pub async fn state_tick(ctx: &BridgeContext) -> Result<usize, BridgeError> {
    if ctx.connections().is_empty() {
        return Ok(0);
    }
    ctx.broadcast_state().await
}

// ────────────────────────────────────────────────────────────────────────────
// Camera
// ────────────────────────────────────────────────────────────────────────────

pub async fn run_camera_loop(ctx: Arc<BridgeContext>, hz: f64, cancel: CancellationToken) {
    let Some(period) = period(hz) else {
        info!("camera pusher disabled");
        return;
    };
    info!(hz, interval_ms = period.as_millis() as u64, "starting camera pusher");

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = camera_tick(&ctx).await {
                    warn!(error = %e, "camera pusher error");
                }
            }
        }
    }
    debug!("camera pusher stopped");
}

/// Annotate, encode and broadcast the latest frame. Returns `Ok(0)` when
/// there is no frame yet or nobody is listening.
pub async fn camera_tick(ctx: &Arc<BridgeContext>) -> Result<usize, BridgeError> {
    let Some(frame) = ctx.frames().latest() else {
        return Ok(0);
    };
    if ctx.connections().is_empty() {
        return Ok(0);
    }

    let worker_ctx = Arc::clone(ctx);
    let (png, width, height) = tokio::task::spawn_blocking(move || {
        let robot = worker_ctx.robot();
        let annotated = robot.annotate_frame(&frame, &battery_overlay(robot))?;
        let png = annotated.encode_png()?;
        Ok::<_, BridgeError>((png, annotated.width, annotated.height))
    })
    .await
    .map_err(|e| BridgeError::HardwareFault {
        component: "camera".to_string(),
        details: format!("frame worker failed: {e}"),
    })??;

    let meta = FrameMeta {
        ts: Utc::now().timestamp_micros() as f64 / 1_000_000.0,
        w: width,
        h: height,
    };
    ctx.connections()
        .broadcast_framed(EVENT_CAMERA_FRAME, &meta, &png)
        .await
}

// ────────────────────────────────────────────────────────────────────────────
// Device events
// ────────────────────────────────────────────────────────────────────────────

pub async fn run_event_pump(ctx: Arc<BridgeContext>, cancel: CancellationToken) {
    let mut events = ctx.robot().subscribe_events();
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(event) => handle_device_event(&ctx, event).await,
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "device event pump lagged"),
            Err(RecvError::Closed) => {
                info!("device event stream closed");
                break;
            }
        }
    }
    debug!("device event pump stopped");
}

pub async fn handle_device_event(ctx: &BridgeContext, event: DeviceEvent) {
    match event {
        DeviceEvent::NewCameraFrame(frame) => ctx.frames().store(frame),
        DeviceEvent::ObjectTapped { object_id } => {
            info!(object_id, "cube tapped");
            ctx.taps().set(object_id);
            // With no clients the tap stays pending for the next state tick.
            if let Err(e) = state_tick(ctx).await {
                warn!(error = %e, "tap state broadcast failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use botlink_hal::{CameraFrame, SimRobot};
    use botlink_middleware::{Frame, FrameSink};
    use botlink_types::wire::decode_framed;
    use serde_json::{Value, json};
    use std::net::SocketAddr;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct RecordingSink {
        frames: Arc<Mutex<Vec<Frame>>>,
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send_frame(&mut self, frame: Frame) -> Result<(), BridgeError> {
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
    }

    impl RecordingSink {
        fn texts(&self) -> Vec<Value> {
            self.frames
                .lock()
                .unwrap()
                .iter()
                .filter_map(|f| match f {
                    Frame::Text(s) => serde_json::from_str(s).ok(),
                    Frame::Binary(_) => None,
                })
                .collect()
        }

        fn binaries(&self) -> Vec<Vec<u8>> {
            self.frames
                .lock()
                .unwrap()
                .iter()
                .filter_map(|f| match f {
                    Frame::Binary(b) => Some(b.clone()),
                    Frame::Text(_) => None,
                })
                .collect()
        }
    }

    fn setup() -> (Arc<SimRobot>, Arc<BridgeContext>, RecordingSink) {
        let sim = Arc::new(SimRobot::builder().with_cubes(3).build());
        let ctx = Arc::new(BridgeContext::new(sim.clone(), Duration::from_secs(1)));
        let sink = RecordingSink::default();
        ctx.connections()
            .register(SocketAddr::from(([127, 0, 0, 1], 9000)), Box::new(sink.clone()));
        (sim, ctx, sink)
    }

    #[test]
    fn zero_rate_disables_loop() {
        assert_eq!(period(0.0), None);
        assert_eq!(period(-1.0), None);
        assert_eq!(period(5.0), Some(Duration::from_millis(200)));
    }

    #[tokio::test]
    async fn state_tick_consumes_tap_once() {
        let (_, ctx, sink) = setup();
        ctx.taps().set(7);

        assert_eq!(state_tick(&ctx).await.unwrap(), 1);
        assert_eq!(state_tick(&ctx).await.unwrap(), 1);

        let states = sink.texts();
        assert_eq!(states[0]["state"]["cube_tapped_id"], json!(7));
        assert_eq!(states[1]["state"]["cube_tapped_id"], Value::Null);
    }

    #[tokio::test]
    async fn camera_tick_without_frame_is_noop() {
        let (_, ctx, sink) = setup();
        assert_eq!(camera_tick(&ctx).await.unwrap(), 0);
        assert!(sink.binaries().is_empty());
    }

    #[tokio::test]
    async fn camera_tick_broadcasts_png_frame() {
        let (_, ctx, sink) = setup();
        ctx.frames().store(Arc::new(CameraFrame::solid(32, 24, [20, 40, 60])));

        assert_eq!(camera_tick(&ctx).await.unwrap(), 1);
        let frames = sink.binaries();
        let (header, png) = decode_framed(&frames[0]).unwrap();
        assert_eq!(header["event"], json!("camera_frame"));
        assert_eq!(header["data"]["w"], json!(32));
        assert_eq!(header["data"]["h"], json!(24));
        assert!(header["data"]["ts"].as_f64().unwrap() > 0.0);
        assert_eq!(&png[..4], &[0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn camera_tick_error_is_returned_not_fatal() {
        let (_, ctx, _) = setup();
        ctx.frames().store(Arc::new(CameraFrame { width: 10, height: 10, data: vec![0; 3] }));
        assert!(camera_tick(&ctx).await.is_err());
    }

    #[tokio::test]
    async fn tap_without_clients_waits_for_first_state() {
        let sim = Arc::new(SimRobot::builder().with_cubes(3).build());
        let ctx = Arc::new(BridgeContext::new(sim, Duration::from_secs(1)));

        handle_device_event(&ctx, DeviceEvent::ObjectTapped { object_id: 3 }).await;
        assert_eq!(ctx.taps().peek(), Some(3));

        let sink = RecordingSink::default();
        ctx.connections()
            .register(SocketAddr::from(([127, 0, 0, 1], 9001)), Box::new(sink.clone()));
        assert_eq!(state_tick(&ctx).await.unwrap(), 1);

        assert_eq!(sink.texts()[0]["state"]["cube_tapped_id"], json!(3));
    }

    #[tokio::test]
    async fn tap_event_sets_slot_and_broadcasts() {
        let (sim, ctx, sink) = setup();
        let cancel = CancellationToken::new();
        let pump = tokio::spawn(run_event_pump(Arc::clone(&ctx), cancel.clone()));
        tokio::task::yield_now().await;

        // The pump subscribes on its first poll; retry until it is listening.
        let mut states = Vec::new();
        for _ in 0..50 {
            sim.tap(2);
            tokio::time::sleep(Duration::from_millis(10)).await;
            states = sink.texts();
            if !states.is_empty() {
                break;
            }
        }
        assert_eq!(states[0]["state"]["cube_tapped_id"], json!(2));
        assert_eq!(ctx.taps().peek(), None);

        cancel.cancel();
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn frame_event_replaces_slot() {
        let (_, ctx, _) = setup();
        let frame = Arc::new(CameraFrame::solid(4, 4, [1, 1, 1]));
        handle_device_event(&ctx, DeviceEvent::NewCameraFrame(Arc::clone(&frame))).await;
        assert_eq!(ctx.frames().latest().unwrap().width, 4);
    }

    #[tokio::test]
    async fn loops_stop_on_cancel() {
        let (_, ctx, sink) = setup();
        let cancel = CancellationToken::new();
        let handles = spawn_push_loops(
            Arc::clone(&ctx),
            PushRates { state_hz: 100.0, camera_hz: 100.0 },
            cancel.clone(),
        );
        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        for h in handles {
            tokio::time::timeout(Duration::from_secs(1), h).await.unwrap().unwrap();
        }
        assert!(!sink.texts().is_empty());
    }

    #[tokio::test]
    async fn disabled_loop_returns_immediately() {
        let (_, ctx, _) = setup();
        let cancel = CancellationToken::new();
        tokio::time::timeout(Duration::from_millis(100), run_state_loop(ctx, 0.0, cancel))
            .await
            .unwrap();
    }
}
