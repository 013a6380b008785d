use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::{Duration, Instant};

/// One recorded tool execution. Arguments are kept verbatim; the recorder
/// never inspects or rewrites them.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
    /// Monotonic seconds since the session started.
    pub at_secs: f64,
}

/// Append-only recorder of agent activity for one session.
///
/// Tracks tool calls, reasoning steps, and handoffs without interfering with
/// execution. Recording cannot fail; every operation is a plain append or
/// counter bump.
#[derive(Debug)]
pub struct SessionMetrics {
    tool_calls: Vec<ToolCall>,
    reasoning_steps: u64,
    handoff_count: u64,
    handoffs: Vec<(String, String)>,
    /// Reserved gauges for future resource accounting. Never populated here.
    pub memory_peak: u64,
    pub disk_used: u64,
    started_at: Instant,
    started_at_utc: DateTime<Utc>,
    /// Artificial elapsed-time offset, used by tests to simulate long sessions.
    elapsed_offset: Duration,
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            tool_calls: Vec::new(),
            reasoning_steps: 0,
            handoff_count: 0,
            handoffs: Vec::new(),
            memory_peak: 0,
            disk_used: 0,
            started_at: Instant::now(),
            started_at_utc: Utc::now(),
            elapsed_offset: Duration::ZERO,
        }
    }

    /// Record a tool execution with a timestamp relative to session start.
    pub fn record_tool_call(&mut self, tool_name: &str, arguments: Value) {
        let at_secs = self.get_duration().as_secs_f64();
        self.tool_calls.push(ToolCall {
            name: tool_name.to_string(),
            arguments,
            at_secs,
        });
    }

    /// Increment the reasoning step counter.
    pub fn increment_reasoning_steps(&mut self) {
        self.reasoning_steps += 1;
    }

    /// Record an agent-to-agent handoff.
    pub fn record_handoff(&mut self, from_agent: &str, to_agent: &str) {
        self.handoff_count += 1;
        self.handoffs
            .push((from_agent.to_string(), to_agent.to_string()));
    }

    /// Elapsed time since session start. Monotonic clock, never negative.
    pub fn get_duration(&self) -> Duration {
        self.started_at.elapsed() + self.elapsed_offset
    }

    /// Invariant: always equals `tool_calls().len()`.
    pub fn total_tool_calls(&self) -> usize {
        self.tool_calls.len()
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    pub fn reasoning_steps(&self) -> u64 {
        self.reasoning_steps
    }

    pub fn handoff_count(&self) -> u64 {
        self.handoff_count
    }

    /// Retained (from, to) log of every handoff, in call order.
    pub fn handoffs(&self) -> &[(String, String)] {
        &self.handoffs
    }

    pub fn started_at_utc(&self) -> DateTime<Utc> {
        self.started_at_utc
    }

    /// Push the apparent session start into the past by `by`. Test hook for
    /// simulating elapsed time without sleeping.
    pub(crate) fn advance_clock(&mut self, by: Duration) {
        self.elapsed_offset += by;
    }
}
