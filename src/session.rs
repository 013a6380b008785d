use crate::metrics::SessionMetrics;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

/// Identity-only view of the wrapped agent. The supervisor reads the name for
/// logging and nothing else; it never drives agent behavior.
pub trait AgentIdentity: Send + Sync {
    fn name(&self) -> &str;
}

/// Lifecycle of a supervised session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Initializing,
    Active,
    Stopping,
    Terminated,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SessionStatus::Initializing => "initializing",
            SessionStatus::Active => "active",
            SessionStatus::Stopping => "stopping",
            SessionStatus::Terminated => "terminated",
        };
        f.write_str(label)
    }
}

#[derive(Debug)]
struct SessionState {
    status: SessionStatus,
    stop_requested: bool,
    stop_reason: Option<String>,
    agent: Option<Weak<dyn AgentIdentity>>,
    metrics: SessionMetrics,
}

/// Transparent wrapper adding safety tracking to one agent execution.
///
/// The session observes; it never mutates the agent or the event payloads it
/// records. All state lives behind one mutex so the foreground (recording,
/// stop requests) and the background monitor can share an `Arc<SafeSession>`.
/// Each lock is held for a single read or update only.
///
/// Lifecycle: created `initializing`; `set_agent` moves it to `active`;
/// `request_stop` moves an active session to `stopping`; only `terminate`
/// (the monitor's auto-terminate path, or an explicit call) reaches
/// `terminated`. Metric recording stays permitted after stop for diagnostics.
#[derive(Debug)]
pub struct SafeSession {
    session_id: String,
    state: Mutex<SessionState>,
}

impl Default for SafeSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SafeSession {
    pub fn new() -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(session_id = %session_id, "session created");
        Self {
            session_id,
            state: Mutex::new(SessionState {
                status: SessionStatus::Initializing,
                stop_requested: false,
                stop_reason: None,
                agent: None,
                metrics: SessionMetrics::new(),
            }),
        }
    }

    /// Unique per process; generated from a v4 UUID at construction.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    // A poisoned lock means some caller panicked mid-update; the recorded
    // metrics are still the best diagnostics available, so keep serving them.
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach the agent this session observes; moves the session to `active`.
    ///
    /// Re-attachment while active is idempotent and never resets metrics.
    /// Attaching to a stopped or terminated session is a logged no-op.
    pub fn set_agent(&self, agent: &Arc<dyn AgentIdentity>) {
        let mut state = self.state();
        match state.status {
            SessionStatus::Stopping | SessionStatus::Terminated => {
                tracing::warn!(
                    session_id = %self.session_id,
                    status = %state.status,
                    "ignoring agent attachment on stopped session"
                );
            }
            SessionStatus::Initializing | SessionStatus::Active => {
                state.agent = Some(Arc::downgrade(agent));
                state.status = SessionStatus::Active;
                tracing::info!(
                    session_id = %self.session_id,
                    agent = agent.name(),
                    "agent attached, session active"
                );
            }
        }
    }

    /// Name of the attached agent, if it is still alive.
    pub fn agent_name(&self) -> Option<String> {
        let state = self.state();
        state
            .agent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|agent| agent.name().to_string())
    }

    /// Record a tool call, passing the arguments through untransformed.
    pub fn record_tool_call(&self, tool_name: &str, arguments: Value) {
        self.state().metrics.record_tool_call(tool_name, arguments);
    }

    pub fn increment_reasoning_steps(&self) {
        self.state().metrics.increment_reasoning_steps();
    }

    pub fn record_handoff(&self, from_agent: &str, to_agent: &str) {
        self.state().metrics.record_handoff(from_agent, to_agent);
    }

    /// Request a cooperative stop. Any session not yet terminated moves to
    /// `stopping` (a never-activated session can be stopped too); terminated
    /// sessions are left alone (idempotent no-op). The first recorded reason
    /// wins.
    pub fn request_stop(&self, reason: Option<&str>) {
        let mut state = self.state();
        if state.status == SessionStatus::Terminated {
            return;
        }
        state.stop_requested = true;
        state.status = SessionStatus::Stopping;
        if state.stop_reason.is_none() {
            state.stop_reason = reason.map(str::to_string);
        }
        tracing::info!(
            session_id = %self.session_id,
            reason = reason.unwrap_or(""),
            "session stop requested"
        );
    }

    /// Force the session to `terminated`. Stronger than a plain stop: this is
    /// the enforcement path used by the background monitor's auto-terminate.
    pub fn terminate(&self, reason: &str) {
        let mut state = self.state();
        if state.status == SessionStatus::Terminated {
            return;
        }
        state.stop_requested = true;
        state.status = SessionStatus::Terminated;
        if state.stop_reason.is_none() {
            state.stop_reason = Some(reason.to_string());
        }
        let duration_secs = state.metrics.get_duration().as_secs_f64();
        let tool_calls = state.metrics.total_tool_calls();
        drop(state);
        tracing::warn!(
            session_id = %self.session_id,
            reason,
            duration_secs,
            tool_calls,
            "session terminated"
        );
    }

    /// True iff the session is `active` and no stop has been requested.
    pub fn is_active(&self) -> bool {
        let state = self.state();
        state.status == SessionStatus::Active && !state.stop_requested
    }

    pub fn status(&self) -> SessionStatus {
        self.state().status
    }

    pub fn stop_requested(&self) -> bool {
        self.state().stop_requested
    }

    pub fn stop_reason(&self) -> Option<String> {
        self.state().stop_reason.clone()
    }

    /// Elapsed session time, delegated to the metrics clock.
    pub fn get_duration(&self) -> Duration {
        self.state().metrics.get_duration()
    }

    pub fn tool_call_count(&self) -> usize {
        self.state().metrics.total_tool_calls()
    }

    /// Names of the most recent `n` tool calls, oldest first.
    pub fn trailing_tool_names(&self, n: usize) -> Vec<String> {
        let state = self.state();
        let calls = state.metrics.tool_calls();
        let start = calls.len().saturating_sub(n);
        calls[start..].iter().map(|call| call.name.clone()).collect()
    }

    pub fn reasoning_steps(&self) -> u64 {
        self.state().metrics.reasoning_steps()
    }

    pub fn handoff_count(&self) -> u64 {
        self.state().metrics.handoff_count()
    }

    /// Read access to the full metrics under the session lock.
    pub fn with_metrics<R>(&self, f: impl FnOnce(&SessionMetrics) -> R) -> R {
        f(&self.state().metrics)
    }

    /// Test hook: simulate elapsed time without sleeping.
    pub(crate) fn advance_clock(&self, by: Duration) {
        self.state().metrics.advance_clock(by);
    }
}
