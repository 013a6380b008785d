//! Cooperative cancellation for supervised sessions.
//!
//! The foreground counterpart to the background watchdog: invoked directly on
//! an interrupt (Ctrl-C) rather than polled. Cancellation requests a stop and
//! leaves the session in `stopping`; the agent loop halts itself once
//! `is_active()` turns false. Forced `terminated` status stays reserved for
//! the watchdog's auto-terminate path.

use crate::session::{SafeSession, SessionStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Snapshot returned by [`CancellationHandler::cleanup`].
#[derive(Debug, Clone, Serialize)]
pub struct CancellationSummary {
    pub session_id: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub tool_calls: usize,
    pub reasoning_steps: u64,
    pub handoffs: u64,
}

/// Handles user-initiated interruption of one session.
pub struct CancellationHandler {
    session: Arc<SafeSession>,
    cancellation_requested: AtomicBool,
}

impl CancellationHandler {
    pub fn new(session: Arc<SafeSession>) -> Self {
        Self {
            session,
            cancellation_requested: AtomicBool::new(false),
        }
    }

    /// Request a cooperative stop. Immediate and non-blocking: the background
    /// monitor observes the resulting status on its next poll.
    pub fn request_cancellation(&self, reason: &str) {
        self.cancellation_requested.store(true, Ordering::SeqCst);
        self.session.request_stop(Some(reason));
        tracing::info!(
            session_id = %self.session.session_id(),
            reason,
            "cancellation requested"
        );
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.cancellation_requested.load(Ordering::SeqCst)
    }

    /// Snapshot the session for the shutdown report. Reads only: everything
    /// recorded before cancellation stays intact and readable.
    pub fn cleanup(&self) -> CancellationSummary {
        let status = self.session.status();
        self.session.with_metrics(|metrics| CancellationSummary {
            session_id: self.session.session_id().to_string(),
            status,
            started_at: metrics.started_at_utc(),
            duration_secs: metrics.get_duration().as_secs_f64(),
            tool_calls: metrics.total_tool_calls(),
            reasoning_steps: metrics.reasoning_steps(),
            handoffs: metrics.handoff_count(),
        })
    }
}

/// Bridge Ctrl-C to cooperative cancellation.
///
/// Spawns a task that waits for the interrupt, requests cancellation, and
/// logs the cleanup summary. The session itself is left for the agent loop to
/// wind down.
pub fn spawn_ctrl_c_listener(handler: Arc<CancellationHandler>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        handler.request_cancellation("user interrupt (ctrl-c)");
        let summary = handler.cleanup();
        tracing::info!(
            session_id = %summary.session_id,
            duration_secs = summary.duration_secs,
            tool_calls = summary.tool_calls,
            reasoning_steps = summary.reasoning_steps,
            "session cancelled"
        );
    })
}
