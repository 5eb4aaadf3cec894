//! Node configuration – reads/writes `~/.handover/config.toml`.
//!
//! Read once at startup; nothing is re-read while the node runs.

use std::fs;
use std::path::{Path, PathBuf};

use handover_middleware::BridgeTopics;
use handover_runtime::DispatchLoopConfig;
use handover_types::HandoverError;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Persisted node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Topic carrying Source A (vicon) `TransformStamped` messages.
    #[serde(default = "default_source_a_topic")]
    pub source_a_topic: String,

    /// Topic carrying Source B (VO) `PoseStamped` messages.
    #[serde(default = "default_source_b_topic")]
    pub source_b_topic: String,

    /// Topic the blended pose is published on.
    #[serde(default = "default_publish_topic")]
    pub publish_topic: String,

    /// Name of the `SetBool` toggle service.
    #[serde(default = "default_toggle_service")]
    pub toggle_service: String,

    /// Output rate in Hz.
    #[serde(default = "default_rate_hz")]
    pub rate_hz: u32,

    /// TCP port of the rosbridge WebSocket endpoint.
    #[serde(default = "default_bridge_port")]
    pub bridge_port: u16,

    /// `header.frame_id` of the published pose.
    #[serde(default = "default_frame_id")]
    pub frame_id: String,
}

fn default_source_a_topic() -> String {
    "/vicon/uav/uav".to_string()
}
fn default_source_b_topic() -> String {
    "/vo/pose".to_string()
}
fn default_publish_topic() -> String {
    "/handover/pose".to_string()
}
fn default_toggle_service() -> String {
    "state_toggle".to_string()
}
fn default_rate_hz() -> u32 {
    100
}
fn default_bridge_port() -> u16 {
    9090
}
fn default_frame_id() -> String {
    "world".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_a_topic: default_source_a_topic(),
            source_b_topic: default_source_b_topic(),
            publish_topic: default_publish_topic(),
            toggle_service: default_toggle_service(),
            rate_hz: default_rate_hz(),
            bridge_port: default_bridge_port(),
            frame_id: default_frame_id(),
        }
    }
}

impl Config {
    /// Reject names the transport could never bind to and a zero rate.
    pub fn validate(&self) -> Result<(), HandoverError> {
        let names = [
            ("source_a_topic", &self.source_a_topic),
            ("source_b_topic", &self.source_b_topic),
            ("publish_topic", &self.publish_topic),
            ("toggle_service", &self.toggle_service),
        ];
        for (field, value) in names {
            if value.trim().is_empty() {
                return Err(HandoverError::Config(format!("{field} must not be empty")));
            }
            if value.chars().any(char::is_whitespace) {
                return Err(HandoverError::Config(format!(
                    "{field} '{value}' must not contain whitespace"
                )));
            }
        }
        if self.rate_hz == 0 {
            return Err(HandoverError::Config("rate_hz must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Channel names for the bridge.
    pub fn bridge_topics(&self) -> BridgeTopics {
        BridgeTopics {
            source_a: self.source_a_topic.clone(),
            source_b: self.source_b_topic.clone(),
            output: self.publish_topic.clone(),
            toggle_service: self.toggle_service.clone(),
            frame_id: self.frame_id.clone(),
        }
    }

    /// Cadence for the dispatch loop.
    pub fn dispatch_config(&self) -> DispatchLoopConfig {
        DispatchLoopConfig {
            rate_hz: self.rate_hz,
        }
    }
}

/// Return the config path: `$HANDOVER_CONFIG` if set, otherwise
/// `~/.handover/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("HANDOVER_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".handover").join("config.toml")
}

/// Load the config, writing the defaults on first run, then apply
/// `HANDOVER_*` environment overrides.
pub fn load_or_init() -> Result<Config, HandoverError> {
    let path = config_path();
    let mut cfg = match load_from(&path)? {
        Some(cfg) => {
            info!(path = %path.display(), "config loaded");
            cfg
        }
        None => {
            let cfg = Config::default();
            save_to(&cfg, &path)?;
            info!(path = %path.display(), "no config found; wrote defaults");
            cfg
        }
    };
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, HandoverError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        HandoverError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| HandoverError::Config(format!("failed to parse config: {e}")))?;
    Ok(Some(cfg))
}

/// Apply `HANDOVER_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `HANDOVER_SOURCE_A_TOPIC` | `source_a_topic` |
/// | `HANDOVER_SOURCE_B_TOPIC` | `source_b_topic` |
/// | `HANDOVER_PUBLISH_TOPIC` | `publish_topic` |
/// | `HANDOVER_RATE_HZ` | `rate_hz` |
/// | `HANDOVER_BRIDGE_PORT` | `bridge_port` |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

/// Unparseable numeric values are ignored.
fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("HANDOVER_SOURCE_A_TOPIC") {
        cfg.source_a_topic = v;
    }
    if let Some(v) = lookup("HANDOVER_SOURCE_B_TOPIC") {
        cfg.source_b_topic = v;
    }
    if let Some(v) = lookup("HANDOVER_PUBLISH_TOPIC") {
        cfg.publish_topic = v;
    }
    if let Some(v) = lookup("HANDOVER_RATE_HZ")
        && let Ok(rate) = v.parse::<u32>()
    {
        cfg.rate_hz = rate;
    }
    if let Some(v) = lookup("HANDOVER_BRIDGE_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.bridge_port = port;
    }
}

/// Save the config to `path`, creating the parent directory if necessary.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), HandoverError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            HandoverError::Config(format!("failed to create config directory: {e}"))
        })?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| HandoverError::Config(format!("failed to serialize config: {e}")))?;
    fs::write(path, raw).map_err(|e| {
        HandoverError::Config(format!("failed to write config at {}: {e}", path.display()))
    })
}
