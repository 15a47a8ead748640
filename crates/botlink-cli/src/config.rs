//! Bridge configuration – reads/writes `~/.botlink/config.toml`.

use botlink_types::BridgeError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Overrides the config file location.
pub const CONFIG_PATH_VAR: &str = "BOTLINK_CONFIG";

/// Persisted bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Interface the WebSocket server binds.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// State snapshot push rate. Zero disables the loop.
    #[serde(default = "default_state_hz")]
    pub state_hz: f64,

    /// Camera frame push rate. Zero disables the loop.
    #[serde(default = "default_camera_hz")]
    pub camera_hz: f64,

    /// Upper bound on awaiting an action's completion.
    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: u64,

    /// Number of light cubes the simulated device exposes.
    #[serde(default = "default_sim_cube_count")]
    pub sim_cube_count: u32,
}

fn default_host() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}
fn default_port() -> u16 {
    botlink_cockpit::DEFAULT_PORT
}
fn default_state_hz() -> f64 {
    5.0
}
fn default_camera_hz() -> f64 {
    30.0
}
fn default_action_timeout_ms() -> u64 {
    30_000
}
fn default_sim_cube_count() -> u32 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            state_hz: default_state_hz(),
            camera_hz: default_camera_hz(),
            action_timeout_ms: default_action_timeout_ms(),
            sim_cube_count: default_sim_cube_count(),
        }
    }
}

impl Config {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }
}

/// `$BOTLINK_CONFIG`, or `~/.botlink/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var(CONFIG_PATH_VAR) {
        return PathBuf::from(p);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".botlink").join("config.toml")
}

/// Load the config at `path`, writing the defaults there first if the file
/// does not exist yet. Env overrides are applied to the result but never
/// persisted.
pub fn load_or_init(path: &Path) -> Result<Config, BridgeError> {
    let mut cfg = match load_from(path)? {
        Some(cfg) => cfg,
        None => {
            let cfg = Config::default();
            save_to(&cfg, path)?;
            cfg
        }
    };
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the file at `path` as-is. `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, BridgeError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| BridgeError::Config(format!("failed to read {}: {e}", path.display())))?;
    toml::from_str(&raw)
        .map(Some)
        .map_err(|e| BridgeError::Config(format!("failed to parse {}: {e}", path.display())))
}

/// Apply `BOTLINK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `BOTLINK_HOST` | `host` |
/// | `BOTLINK_PORT` | `port` |
/// | `BOTLINK_STATE_HZ` | `state_hz` |
/// | `BOTLINK_CAMERA_HZ` | `camera_hz` |
/// | `BOTLINK_ACTION_TIMEOUT_MS` | `action_timeout_ms` |
///
/// Values that fail to parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    override_from("BOTLINK_HOST", &mut cfg.host);
    override_from("BOTLINK_PORT", &mut cfg.port);
    override_from("BOTLINK_STATE_HZ", &mut cfg.state_hz);
    override_from("BOTLINK_CAMERA_HZ", &mut cfg.camera_hz);
    override_from("BOTLINK_ACTION_TIMEOUT_MS", &mut cfg.action_timeout_ms);
}

fn override_from<T: std::str::FromStr>(var: &str, field: &mut T) {
    if let Ok(v) = std::env::var(var)
        && let Ok(parsed) = v.trim().parse()
    {
        *field = parsed;
    }
}

/// Write `cfg` to `path`, creating parent directories.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), BridgeError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| BridgeError::Config(format!("failed to create {}: {e}", parent.display())))?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| BridgeError::Serialization(format!("failed to serialize config: {e}")))?;
    fs::write(path, raw)
        .map_err(|e| BridgeError::Config(format!("failed to write {}: {e}", path.display())))
}
