use crate::config::{ConfigError, TimeoutConfig};
use crate::session::SafeSession;
use std::collections::HashSet;

/// Warning produced when a session approaches or exceeds its duration budget.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeoutWarning {
    /// Elapsed time crossed a warning threshold (75% or 90%).
    Approaching {
        percent: u8,
        elapsed_secs: f64,
        limit_secs: u64,
    },
    /// Elapsed time passed the maximum session duration.
    Exceeded { elapsed_secs: f64, limit_secs: u64 },
}

impl TimeoutWarning {
    pub fn is_exceeded(&self) -> bool {
        matches!(self, TimeoutWarning::Exceeded { .. })
    }

    pub fn message(&self) -> String {
        match self {
            TimeoutWarning::Approaching {
                percent,
                elapsed_secs,
                limit_secs,
            } => format!(
                "WARNING: Session at {percent}% of timeout ({elapsed_secs:.0}s / {limit_secs}s)"
            ),
            TimeoutWarning::Exceeded {
                elapsed_secs,
                limit_secs,
            } => format!(
                "TIMEOUT: Session exceeded maximum duration ({elapsed_secs:.0}s / {limit_secs}s)"
            ),
        }
    }
}

/// Classifies a session's elapsed time against its duration budget.
///
/// Pure observer: never mutates session status, never touches the agent.
/// Each warning threshold fires at most once per monitor; the terminal
/// "exceeded" warning repeats on every check so callers get continued
/// confirmation while waiting for termination to take effect. One monitor per
/// session; bind a fresh instance rather than reusing one across sessions.
#[derive(Debug)]
pub struct TimeoutMonitor {
    config: TimeoutConfig,
    warnings_sent: HashSet<&'static str>,
}

impl TimeoutMonitor {
    pub fn new(config: TimeoutConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_validated(config))
    }

    pub(crate) fn from_validated(config: TimeoutConfig) -> Self {
        Self {
            config,
            warnings_sent: HashSet::new(),
        }
    }

    /// Classify elapsed time into none / 75% / 90% / exceeded.
    ///
    /// The elapsed time falls into exactly one band; crossing straight into
    /// the 90% band never emits the skipped 75% warning retroactively.
    pub fn check_timeout(&mut self, session: &SafeSession) -> Option<TimeoutWarning> {
        let elapsed_secs = session.get_duration().as_secs_f64();
        let limit_secs = self.config.max_session_duration_secs;
        let limit = limit_secs as f64;

        if elapsed_secs >= limit {
            return Some(TimeoutWarning::Exceeded {
                elapsed_secs,
                limit_secs,
            });
        }

        let bands = [
            (90u8, "90%", self.config.warning_threshold_90),
            (75u8, "75%", self.config.warning_threshold_75),
        ];
        for (percent, label, fraction) in bands {
            if elapsed_secs >= limit * fraction {
                if self.warnings_sent.insert(label) {
                    return Some(TimeoutWarning::Approaching {
                        percent,
                        elapsed_secs,
                        limit_secs,
                    });
                }
                // Band already announced; stay quiet until the next one.
                return None;
            }
        }
        None
    }

    /// Seconds remaining before the session budget runs out. Negative once
    /// the budget is exceeded.
    pub fn time_remaining(&self, session: &SafeSession) -> f64 {
        self.config.max_session_duration_secs as f64 - session.get_duration().as_secs_f64()
    }

    /// Forget which thresholds already fired.
    pub fn reset_warnings(&mut self) {
        self.warnings_sent.clear();
    }
}
