use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level supervisor configuration loaded from warden.toml.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct SafetyConfig {
    pub timeout: TimeoutConfig,
    pub detector: DetectorConfig,
    pub monitor: MonitorConfig,
}

/// Wall-clock budgets for a session.
///
/// `turn_timeout_secs` and `tool_timeout_secs` are reserved budgets carried in
/// the configuration surface; only `max_session_duration_secs` is enforced by
/// the timeout monitor today.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub max_session_duration_secs: u64,
    pub turn_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    /// Fraction of the max duration at which the first warning fires.
    pub warning_threshold_75: f64,
    /// Fraction of the max duration at which the second warning fires.
    pub warning_threshold_90: f64,
}

/// Thresholds for runaway pattern detection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Trailing window of identical tool calls that counts as a loop.
    pub same_tool_threshold: usize,
    /// Reasoning steps beyond which a session is considered stuck.
    pub reasoning_threshold: u64,
    /// Agent handoffs beyond which a session is considered spiraling.
    pub handoff_threshold: u64,
}

/// Background monitor cadence and enforcement policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Polling interval in milliseconds (sub-second intervals used by tests).
    pub check_interval_ms: u64,
    /// If true, a fired check forces the session to `terminated`.
    pub auto_terminate: bool,
}

/// Errors from loading or validating supervisor configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to parse the config file as TOML.
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// A field failed validation.
    Invalid { field: &'static str, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config file {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config file {}: {}", path.display(), source)
            }
            ConfigError::Invalid { field, reason } => {
                write!(f, "invalid config field {field}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid { .. } => None,
        }
    }
}

impl SafetyConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: SafetyConfig = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded supervisor config");
        Ok(config)
    }

    /// Validate every section. Rejects non-positive durations and thresholds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timeout.validate()?;
        self.detector.validate()?;
        self.monitor.validate()
    }
}

impl TimeoutConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_session_duration_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "timeout.max_session_duration_secs",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.turn_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "timeout.turn_timeout_secs",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.tool_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "timeout.tool_timeout_secs",
                reason: "must be greater than 0".to_string(),
            });
        }
        for (field, value) in [
            ("timeout.warning_threshold_75", self.warning_threshold_75),
            ("timeout.warning_threshold_90", self.warning_threshold_90),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be between 0 and 1, got {value}"),
                });
            }
        }
        if self.warning_threshold_75 >= self.warning_threshold_90 {
            return Err(ConfigError::Invalid {
                field: "timeout.warning_threshold_75",
                reason: format!(
                    "must be below warning_threshold_90 ({} >= {})",
                    self.warning_threshold_75, self.warning_threshold_90
                ),
            });
        }
        Ok(())
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.same_tool_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "detector.same_tool_threshold",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.reasoning_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "detector.reasoning_threshold",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.handoff_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "detector.handoff_threshold",
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "monitor.check_interval_ms",
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

// --- Default implementations ---

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            max_session_duration_secs: 1800,
            turn_timeout_secs: 300,
            tool_timeout_secs: 120,
            warning_threshold_75: 0.75,
            warning_threshold_90: 0.90,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            same_tool_threshold: 5,
            reasoning_threshold: 50,
            handoff_threshold: 10,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 1000,
            auto_terminate: false,
        }
    }
}
