//! Session safety supervisor for AI coding agent sessions.
//!
//! `warden` wraps one agent execution in a [`SafeSession`] that passively
//! records tool calls, reasoning steps, and agent handoffs without ever
//! touching the agent itself. Two evaluators classify the recorded activity:
//! [`TimeoutMonitor`] (wall-clock budget thresholds) and [`RunawayDetector`]
//! (behavioral anti-patterns such as infinite tool loops). A
//! [`BackgroundMonitor`] polls both from a dedicated tokio task, raises
//! [`MonitorEvent`]s to a caller-supplied handler, and can optionally
//! auto-terminate the session. [`CancellationHandler`] is the cooperative,
//! foreground counterpart for user-initiated interruption.
//!
//! The surrounding agent loop stays in charge of actually halting work: it is
//! expected to check [`SafeSession::is_active`] between steps and stop once
//! that returns false.

pub mod config;
pub mod metrics;
pub mod runaway;
pub mod session;
pub mod signals;
pub mod timeout;
pub mod watchdog;

pub use config::{ConfigError, DetectorConfig, MonitorConfig, SafetyConfig, TimeoutConfig};
pub use metrics::{SessionMetrics, ToolCall};
pub use runaway::{RunawayDetector, RunawayPattern};
pub use session::{AgentIdentity, SafeSession, SessionStatus};
pub use signals::{spawn_ctrl_c_listener, CancellationHandler, CancellationSummary};
pub use timeout::{TimeoutMonitor, TimeoutWarning};
pub use watchdog::{BackgroundMonitor, EventHandler, EventType, MonitorError, MonitorEvent, Severity};
