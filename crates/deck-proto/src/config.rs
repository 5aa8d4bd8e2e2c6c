use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Device paths tried in order until one opens.
    #[serde(default = "default_devices")]
    pub devices: Vec<String>,
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// Wait after opening the port before the panel accepts commands.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Gap between consecutive lines; the panel firmware drops bursts.
    #[serde(default = "default_write_pace_ms")]
    pub write_pace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_engine_host")]
    pub host: String,
    #[serde(default = "default_engine_port")]
    pub port: u16,
    /// Sent as a `password` command right after connect when non-empty.
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_playlist_file")]
    pub playlist_file: PathBuf,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Quiet period a knob or alarm change must survive before it commits.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Now-playing poll cadence, coarser than the tick.
    #[serde(default = "default_now_playing_ms")]
    pub now_playing_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_columns")]
    pub columns: usize,
    /// Panel row count.  3-row panels have no position label, taller ones do.
    #[serde(default = "default_rows")]
    pub rows: usize,
    /// Whether the panel carries the alarm hardware.
    #[serde(default = "default_alarm")]
    pub alarm: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            devices: default_devices(),
            baud: default_baud(),
            settle_ms: default_settle_ms(),
            write_pace_ms: default_write_pace_ms(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: default_engine_host(),
            port: default_engine_port(),
            password: String::new(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            playlist_file: default_playlist_file(),
            state_file: default_state_file(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            tick_ms: default_tick_ms(),
            now_playing_ms: default_now_playing_ms(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            columns: default_columns(),
            rows: default_rows(),
            alarm: default_alarm(),
        }
    }
}

fn default_devices() -> Vec<String> {
    vec!["/dev/ttyAMA0".to_string(), "/dev/ttyUSB0".to_string()]
}

fn default_baud() -> u32 {
    9600
}

fn default_settle_ms() -> u64 {
    100
}

fn default_write_pace_ms() -> u64 {
    350
}

fn default_engine_host() -> String {
    "localhost".to_string()
}

fn default_engine_port() -> u16 {
    6600
}

fn default_playlist_file() -> PathBuf {
    platform::config_dir().join("stations.m3u")
}

fn default_state_file() -> PathBuf {
    platform::data_dir().join("state")
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_tick_ms() -> u64 {
    100
}

fn default_now_playing_ms() -> u64 {
    500
}

fn default_columns() -> usize {
    20
}

fn default_rows() -> usize {
    3
}

fn default_alarm() -> bool {
    true
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            engine: EngineConfig::default(),
            paths: PathsConfig::default(),
            timing: TimingConfig::default(),
            display: DisplayConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.serial.baud, 9600);
        assert_eq!(config.serial.devices[0], "/dev/ttyAMA0");
        assert_eq!(config.engine.host, "localhost");
        assert_eq!(config.engine.port, 6600);
        assert!(config.engine.password.is_empty());
        assert_eq!(config.timing.debounce_ms, 500);
        assert_eq!(config.display.columns, 20);
        assert!(config.display.alarm);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [engine]
            host = "10.0.0.7"

            [display]
            rows = 5
            alarm = false
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.host, "10.0.0.7");
        assert_eq!(config.engine.port, 6600);
        assert_eq!(config.display.rows, 5);
        assert!(!config.display.alarm);
        assert_eq!(config.timing.tick_ms, 100);
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.serial.devices, config.serial.devices);
        assert_eq!(back.timing.debounce_ms, config.timing.debounce_ms);
        assert_eq!(back.display.rows, config.display.rows);
    }
}
