use crate::config::{ConfigError, DetectorConfig};
use crate::session::SafeSession;
use serde_json::{json, Value};

/// Behavioral anti-patterns that indicate an agent is stuck, not progressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunawayPattern {
    /// The same tool called N+ times in a row.
    InfiniteToolLoop,
    /// Too many reasoning steps without progress.
    ExcessiveReasoning,
    /// Too many agent-to-agent handoffs.
    EscalationSpiral,
}

impl RunawayPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunawayPattern::InfiniteToolLoop => "infinite_tool_loop",
            RunawayPattern::ExcessiveReasoning => "excessive_reasoning",
            RunawayPattern::EscalationSpiral => "escalation_spiral",
        }
    }
}

impl std::fmt::Display for RunawayPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inspects recorded session activity for runaway patterns.
///
/// Stateless across calls: every invocation recomputes from the session's
/// current metrics and never mutates them. Patterns are evaluated in fixed
/// priority order (tool loop, then reasoning, then handoffs) so detection is
/// deterministic when several are simultaneously true.
#[derive(Debug)]
pub struct RunawayDetector {
    config: DetectorConfig,
}

impl RunawayDetector {
    pub fn new(config: DetectorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_validated(config))
    }

    pub(crate) fn from_validated(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// First matching pattern, or `None` when the session looks healthy.
    pub fn detect_pattern(&self, session: &SafeSession) -> Option<RunawayPattern> {
        // Fewer calls than the window means no loop verdict yet.
        if session.tool_call_count() >= self.config.same_tool_threshold {
            let recent = session.trailing_tool_names(self.config.same_tool_threshold);
            if let Some(first) = recent.first() {
                if recent.iter().all(|name| name == first) {
                    tracing::debug!(tool = %first, "infinite tool loop detected");
                    return Some(RunawayPattern::InfiniteToolLoop);
                }
            }
        }

        if session.reasoning_steps() > self.config.reasoning_threshold {
            tracing::debug!(
                reasoning_steps = session.reasoning_steps(),
                "excessive reasoning detected"
            );
            return Some(RunawayPattern::ExcessiveReasoning);
        }

        if session.handoff_count() > self.config.handoff_threshold {
            tracing::debug!(
                handoff_count = session.handoff_count(),
                "escalation spiral detected"
            );
            return Some(RunawayPattern::EscalationSpiral);
        }

        None
    }

    /// Human-readable description of a detection; neutral text for `None`.
    pub fn detection_message(&self, pattern: Option<RunawayPattern>) -> String {
        match pattern {
            None => "No runaway pattern detected".to_string(),
            Some(RunawayPattern::InfiniteToolLoop) => format!(
                "Same tool called {}+ times in a row",
                self.config.same_tool_threshold
            ),
            Some(RunawayPattern::ExcessiveReasoning) => format!(
                "More than {} reasoning steps without progress",
                self.config.reasoning_threshold
            ),
            Some(RunawayPattern::EscalationSpiral) => format!(
                "More than {} agent handoffs detected",
                self.config.handoff_threshold
            ),
        }
    }

    /// Diagnostic snapshot of the counters and the trailing tool window.
    pub fn pattern_details(&self, session: &SafeSession) -> Value {
        let recent: Option<Vec<String>> =
            if session.tool_call_count() >= self.config.same_tool_threshold {
                Some(session.trailing_tool_names(self.config.same_tool_threshold))
            } else {
                None
            };
        json!({
            "total_tool_calls": session.tool_call_count(),
            "recent_tool_pattern": recent,
            "reasoning_steps": session.reasoning_steps(),
            "handoff_count": session.handoff_count(),
            "thresholds": {
                "same_tool": self.config.same_tool_threshold,
                "reasoning": self.config.reasoning_threshold,
                "handoffs": self.config.handoff_threshold,
            },
        })
    }
}

impl Default for RunawayDetector {
    fn default() -> Self {
        Self::from_validated(DetectorConfig::default())
    }
}
