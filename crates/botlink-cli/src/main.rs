//! `botlink` – bridge launcher.
//!
//! 1. Installs structured logging (see `botlink_runtime::telemetry`).
//! 2. Loads `~/.botlink/config.toml`, writing the defaults on first run.
//! 3. Boots a simulated device, the push loops and the WebSocket server.
//! 4. Intercepts **Ctrl-C** to cancel every task and exit cleanly.

mod config;

use colored::Colorize;
use std::sync::Arc;
use tracing::{error, info, warn};

use botlink_cockpit::BridgeServer;
use botlink_hal::SimRobot;
use botlink_runtime::{BridgeContext, CancellationToken, PushRates, spawn_push_loops};
use botlink_runtime::telemetry::init_tracing;
use botlink_types::BridgeError;

fn main() {
    // The guard flushes exported spans when main returns.
    let _telemetry = init_tracing("botlink");

    print_banner();

    let path = config::config_path();
    let cfg = match config::load_or_init(&path) {
        Ok(cfg) => {
            println!("  Config loaded from {}", path.display().to_string().bold());
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };
    info!(?cfg, "configuration resolved");

    let cancel = CancellationToken::new();
    let ctrlc_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        ctrlc_token.cancel();
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; shutdown on Ctrl-C will not be available");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cfg, cancel)) {
        error!(error = %e, "bridge exited with error");
        std::process::exit(1);
    }
    println!("{}", "  ✓ Bridge stopped.".green());
}

async fn run(cfg: config::Config, cancel: CancellationToken) -> Result<(), BridgeError> {
    let robot = Arc::new(SimRobot::builder().with_cubes(cfg.sim_cube_count).build());
    let feed = robot.spawn_camera_feed(cfg.camera_hz);

    let ctx = Arc::new(BridgeContext::new(robot, cfg.action_timeout()));
    let rates = PushRates {
        state_hz: cfg.state_hz,
        camera_hz: cfg.camera_hz,
    };
    let loops = spawn_push_loops(Arc::clone(&ctx), rates, cancel.clone());

    let server = BridgeServer::new(ctx).with_addr(cfg.addr());
    println!(
        "  Listening on {}  (Ctrl-C to stop)\n",
        format!("ws://{}", server.addr()).bold().cyan()
    );
    let served = server.run(cancel.clone()).await;

    // A bind failure returns before the token fires.
    cancel.cancel();
    feed.abort();
    for handle in loops {
        if let Err(e) = handle.await {
            warn!(error = %e, "push loop task ended abnormally");
        }
    }
    served
}

fn print_banner() {
    println!();
    println!("{}", r#"   __          __  ___       __  "#.bold().cyan());
    println!("{}", r#"  / /_  ____  / /_/ (_)___  / /__"#.bold().cyan());
    println!("{}", r#" / __ \/ __ \/ __/ / / __ \/ //_/"#.bold().cyan());
    println!("{}", r#"/_.___/\____/\__/_/_/_/ /_/_/\_\ "#.bold().cyan());
    println!();
    println!("  {} {}",
        "botlink".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Remote-control bridge for a desk robot");
    println!();
}
