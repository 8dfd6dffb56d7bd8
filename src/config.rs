use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logger::Severity;

pub const DEFAULT_FRAME_RATE: u32 = 60;
/// One TIME step is 50 ms at 60 Hz.
pub const DEFAULT_TIME_TICKS_PER_STEP: u32 = 3;
/// One MIDI_TIME step is one 32nd note.
pub const DEFAULT_MIDI_TICKS_PER_STEP: u32 = 1;
pub const DEFAULT_LOOP_CHECK_INTERVAL: u32 = 100;
pub const DEFAULT_MAX_LOOP_ITERATIONS: u32 = 100_000;
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;
pub const DEFAULT_PPQ: u32 = 480;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Engine tuning knobs, loadable from TOML. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub frame_rate: u32,
    pub time_ticks_per_step: u32,
    pub midi_ticks_per_step: u32,
    pub loop_check_interval: u32,
    pub max_loop_iterations: u32,
    pub max_call_depth: usize,
    pub timeout_ms: Option<u64>,
    pub ppq: u32,
    pub log_level: Severity,
    pub log_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            frame_rate: DEFAULT_FRAME_RATE,
            time_ticks_per_step: DEFAULT_TIME_TICKS_PER_STEP,
            midi_ticks_per_step: DEFAULT_MIDI_TICKS_PER_STEP,
            loop_check_interval: DEFAULT_LOOP_CHECK_INTERVAL,
            max_loop_iterations: DEFAULT_MAX_LOOP_ITERATIONS,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            timeout_ms: None,
            ppq: DEFAULT_PPQ,
            log_level: Severity::Info,
            log_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("frame_rate", self.frame_rate),
            ("time_ticks_per_step", self.time_ticks_per_step),
            ("midi_ticks_per_step", self.midi_ticks_per_step),
            ("loop_check_interval", self.loop_check_interval),
            ("max_loop_iterations", self.max_loop_iterations),
            ("ppq", self.ppq),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate.max(1) as f64)
    }
}
