//! Configuration types for capture, proxy and replay

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{FleetReplayError, Result};
use crate::trajectory::FallbackPolicy;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FleetReplayConfig {
    /// Capture buffer configuration
    pub capture: CaptureConfig,

    /// Trajectory proxy/store configuration
    pub trajectory: TrajectoryConfig,

    /// Replay engine configuration
    pub replay: ReplayConfig,

    /// Hosting server configuration
    pub server: ServerConfig,
}

/// Capture buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Enable capturing. When false every capture call is a no-op.
    pub enabled: bool,

    /// Directory session files are written to
    pub output_dir: PathBuf,

    /// Auto-save after this long. Zero disables the timer.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Local directory that asset URLs under `/cache/` resolve into
    pub asset_cache_dir: PathBuf,

    /// Free-form description written into the session metadata
    pub description: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            output_dir: PathBuf::from("./captured_data"),
            duration: Duration::from_secs(300),
            asset_cache_dir: PathBuf::from("run/cache"),
            description: "Live data captured from the fleet gateway".to_string(),
        }
    }
}

/// Trajectory channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrajectoryConfig {
    /// Live trajectory server
    pub upstream_url: String,

    /// Serve only from the store, never connect upstream
    pub replay_mode: bool,

    /// File to preload the store from at startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_file: Option<PathBuf>,

    /// Upstream wait bound for trajectory requests
    #[serde(with = "humantime_serde")]
    pub data_timeout: Duration,

    /// Upstream wait bound for time requests
    #[serde(with = "humantime_serde")]
    pub time_timeout: Duration,

    /// What to answer when the requested map is not stored
    pub fallback: FallbackPolicy,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            upstream_url: "ws://localhost:8006".to_string(),
            replay_mode: false,
            data_file: None,
            data_timeout: Duration::from_secs(5),
            time_timeout: Duration::from_secs(2),
            fallback: FallbackPolicy::AnyEntry,
        }
    }
}

/// Replay engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Gateway base URL; `/_internal` and `/trajectory` are derived from it
    pub api_url: String,

    /// Timeline speed multiplier
    pub speed: f64,

    /// Upper bound on any single inter-entry wait
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,

    /// How long timeline mode waits for a trajectory_load acknowledgment
    #[serde(with = "humantime_serde")]
    pub load_ack_timeout: Duration,

    /// How long snapshot mode waits for a trajectory_load acknowledgment
    #[serde(with = "humantime_serde")]
    pub snapshot_ack_timeout: Duration,

    /// Number of leading dispatches logged individually
    pub detailed_entries: usize,

    /// Progress is logged every this many dispatches
    pub progress_every: usize,

    /// Gateway cache directory captured assets are restored into
    pub cache_dir: PathBuf,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".to_string(),
            speed: 1.0,
            max_wait: Duration::from_secs(5),
            load_ack_timeout: Duration::from_millis(500),
            snapshot_ack_timeout: Duration::from_secs(5),
            detailed_entries: 10,
            progress_every: 100,
            cache_dir: PathBuf::from("run/cache"),
        }
    }
}

impl ReplayConfig {
    /// WebSocket URL of the generic event channel
    pub fn internal_url(&self) -> String {
        format!("{}/_internal", websocket_base(&self.api_url))
    }

    /// WebSocket URL of the trajectory channel
    pub fn trajectory_url(&self) -> String {
        format!("{}/trajectory", websocket_base(&self.api_url))
    }
}

fn websocket_base(api_url: &str) -> String {
    let base = api_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    }
}

/// Hosting server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the gateway routes listen on
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

impl FleetReplayConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. `fleetreplay.toml` in the working directory
    /// 3. File named by `FLEETREPLAY_CONFIG_PATH`
    /// 4. `FLEETREPLAY_<SECTION>__<FIELD>` environment overrides
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is invalid or validation fails.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(FleetReplayConfig::default()))
            .merge(Toml::file("fleetreplay.toml"));

        if let Ok(path) = std::env::var("FLEETREPLAY_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: FleetReplayConfig = figment
            .merge(Env::prefixed("FLEETREPLAY_").split("__"))
            .extract()
            .map_err(|e| {
                FleetReplayError::Configuration(format!("Failed to load configuration: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: FleetReplayConfig =
            Figment::from(Serialized::defaults(FleetReplayConfig::default()))
                .merge(Toml::file(path))
                .extract()
                .map_err(|e| {
                    FleetReplayError::Configuration(format!(
                        "Failed to load configuration file: {}",
                        e
                    ))
                })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if !self.replay.speed.is_finite() || self.replay.speed <= 0.0 {
            return Err(FleetReplayError::Configuration(format!(
                "Replay speed must be a positive number, got {}",
                self.replay.speed
            )));
        }

        if !self.trajectory.replay_mode {
            if self.trajectory.upstream_url.trim().is_empty() {
                return Err(FleetReplayError::Configuration(
                    "trajectory.upstream_url is required unless replay_mode is set".to_string(),
                ));
            }
            check_url(
                "trajectory.upstream_url",
                &self.trajectory.upstream_url,
                &["ws", "wss"],
            )?;
        }

        check_url(
            "replay.api_url",
            &self.replay.api_url,
            &["http", "https", "ws", "wss"],
        )?;

        Ok(())
    }
}

fn check_url(field: &str, value: &str, schemes: &[&str]) -> Result<()> {
    let url = url::Url::parse(value).map_err(|e| {
        FleetReplayError::Configuration(format!("{} is not a valid URL ({}): {}", field, value, e))
    })?;
    if !schemes.contains(&url.scheme()) {
        return Err(FleetReplayError::Configuration(format!(
            "{} must use one of {:?}, got {}",
            field,
            schemes,
            url.scheme()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = FleetReplayConfig::default();
        assert!(!config.capture.enabled);
        assert_eq!(config.capture.duration, Duration::from_secs(300));
        assert_eq!(config.trajectory.data_timeout, Duration::from_secs(5));
        assert_eq!(config.trajectory.time_timeout, Duration::from_secs(2));
        assert_eq!(config.replay.max_wait, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_overrides_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[capture]
enabled = true
duration = "0s"

[trajectory]
replay_mode = true
fallback = "strict"

[replay]
speed = 2.0
"#
        )
        .unwrap();

        let config = FleetReplayConfig::from_file(file.path()).unwrap();
        assert!(config.capture.enabled);
        assert_eq!(config.capture.duration, Duration::ZERO);
        assert_eq!(config.capture.output_dir, PathBuf::from("./captured_data"));
        assert!(config.trajectory.replay_mode);
        assert_eq!(config.trajectory.fallback, FallbackPolicy::Strict);
        assert_eq!(config.replay.speed, 2.0);
    }

    #[test]
    fn test_rejects_bad_speed() {
        let mut config = FleetReplayConfig::default();
        config.replay.speed = 0.0;
        assert!(config.validate().is_err());

        config.replay.speed = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_urls() {
        let mut config = FleetReplayConfig::default();
        config.trajectory.upstream_url = "http://localhost:8006".to_string();
        assert!(config.validate().is_err());

        // Upstream is ignored in replay mode
        config.trajectory.replay_mode = true;
        assert!(config.validate().is_ok());

        config.replay.api_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_websocket_urls() {
        let config = ReplayConfig {
            api_url: "https://fleet.example:8443/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.internal_url(), "wss://fleet.example:8443/_internal");
        assert_eq!(config.trajectory_url(), "wss://fleet.example:8443/trajectory");

        let local = ReplayConfig::default();
        assert_eq!(local.internal_url(), "ws://localhost:8000/_internal");
    }
}
