//! Background watchdog for supervised sessions.
//!
//! Runs alongside the agent in a dedicated tokio task, periodically driving
//! the timeout monitor and the runaway detector against one session. Findings
//! surface as [`MonitorEvent`]s to a caller-supplied handler; with
//! `auto_terminate` enabled the watchdog also forces the session to
//! `terminated`. `stop()` signals the task, wakes it from its sleep, and joins
//! it before returning, so no background worker outlives the monitor.

use crate::config::{ConfigError, SafetyConfig};
use crate::runaway::RunawayDetector;
use crate::session::SafeSession;
use crate::timeout::TimeoutMonitor;
use serde::Serialize;
use serde_json::{json, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// What kind of condition a monitor event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Timeout,
    Runaway,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Timeout => "timeout",
            EventType::Runaway => "runaway",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordinal severity of a monitor event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event emitted by the background watchdog.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorEvent {
    pub event_type: EventType,
    pub message: String,
    pub severity: Severity,
    /// Free-form diagnostic payload (elapsed seconds, pattern name, ...).
    pub data: Value,
}

/// Errors from the watchdog's own lifecycle.
#[derive(Debug)]
pub enum MonitorError {
    /// The background task could not be joined on `stop()`. This is fatal to
    /// the monitor's contract: it means a background worker may have leaked.
    Join { source: tokio::task::JoinError },
}

impl std::fmt::Display for MonitorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorError::Join { source } => {
                write!(f, "failed to join background monitor task: {}", source)
            }
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Join { source } => Some(source),
        }
    }
}

/// Handler invoked for every emitted event. Single slot; panics inside the
/// handler are isolated and never crash the polling loop.
pub type EventHandler = Arc<dyn Fn(MonitorEvent) + Send + Sync>;

/// Periodic safety watchdog for one session.
///
/// State machine: stopped -> running -> stopped. `start()` spawns exactly one
/// polling task; `stop()` is the only way to end it and always joins before
/// returning. Both are idempotent. The monitor itself never blocks the
/// foreground beyond spawn/join cost.
pub struct BackgroundMonitor {
    session: Arc<SafeSession>,
    config: SafetyConfig,
    on_event: Option<EventHandler>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundMonitor {
    /// Create a monitor bound to one session. Rejects invalid configuration.
    pub fn new(session: Arc<SafeSession>, config: SafetyConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            session,
            config,
            on_event: None,
            shutdown: None,
            handle: None,
        })
    }

    /// Register the event handler. Replaces any previous registration; call
    /// before `start()` so the polling task picks it up.
    pub fn set_on_event<F>(&mut self, handler: F)
    where
        F: Fn(MonitorEvent) + Send + Sync + 'static,
    {
        self.on_event = Some(Arc::new(handler));
    }

    /// True while the polling task is alive.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Spawn the polling task. No-op when already running.
    pub fn start(&mut self) {
        if self.is_running() {
            tracing::debug!("background monitor already running");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let session = Arc::clone(&self.session);
        let handler = self.on_event.clone();
        let auto_terminate = self.config.monitor.auto_terminate;
        let interval = Duration::from_millis(self.config.monitor.check_interval_ms);
        let timeout_config = self.config.timeout.clone();
        let detector_config = self.config.detector.clone();

        let handle = tokio::spawn(async move {
            // One timeout monitor for the task's lifetime, so threshold
            // warnings stay deduplicated across polls.
            let mut timeouts = TimeoutMonitor::from_validated(timeout_config);
            let detector = RunawayDetector::from_validated(detector_config);

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        poll_once(&session, &mut timeouts, &detector, handler.as_ref(), auto_terminate);
                    }
                }
            }
            tracing::debug!(session_id = %session.session_id(), "monitor loop exited");
        });

        self.shutdown = Some(shutdown_tx);
        self.handle = Some(handle);
        tracing::info!(
            session_id = %self.session.session_id(),
            check_interval_ms = self.config.monitor.check_interval_ms,
            auto_terminate,
            "background monitor started"
        );
    }

    /// Signal the polling task, wake it from its sleep, and join it. After
    /// this returns no further polling occurs and no task remains alive.
    /// No-op when already stopped.
    pub async fn stop(&mut self) -> Result<(), MonitorError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        handle
            .await
            .map_err(|source| MonitorError::Join { source })?;
        tracing::info!(session_id = %self.session.session_id(), "background monitor stopped");
        Ok(())
    }
}

/// One polling pass: timeout check, runaway check, optional enforcement.
fn poll_once(
    session: &SafeSession,
    timeouts: &mut TimeoutMonitor,
    detector: &RunawayDetector,
    handler: Option<&EventHandler>,
    auto_terminate: bool,
) {
    let mut terminate_reason: Option<String> = None;

    if let Some(warning) = timeouts.check_timeout(session) {
        let severity = if warning.is_exceeded() {
            Severity::High
        } else {
            Severity::Medium
        };
        let message = warning.message();
        dispatch(
            handler,
            MonitorEvent {
                event_type: EventType::Timeout,
                severity,
                data: json!({
                    "elapsed_secs": session.get_duration().as_secs_f64(),
                    "remaining_secs": timeouts.time_remaining(session),
                }),
                message: message.clone(),
            },
        );
        terminate_reason = Some(message);
    }

    if let Some(pattern) = detector.detect_pattern(session) {
        let message = detector.detection_message(Some(pattern));
        dispatch(
            handler,
            MonitorEvent {
                event_type: EventType::Runaway,
                severity: Severity::High,
                data: json!({
                    "pattern": pattern.as_str(),
                    "details": detector.pattern_details(session),
                }),
                message: message.clone(),
            },
        );
        terminate_reason.get_or_insert(message);
    }

    if auto_terminate {
        if let Some(reason) = terminate_reason {
            session.request_stop(Some(&reason));
            session.terminate(&reason);
        }
    }
}

fn dispatch(handler: Option<&EventHandler>, event: MonitorEvent) {
    let Some(handler) = handler else { return };
    let event_type = event.event_type;
    if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
        tracing::warn!(%event_type, "event handler panicked; monitor continues");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MonitorConfig, TimeoutConfig};
    use crate::session::testutil::StubAgent;
    use crate::session::SessionStatus;
    use serde_json::json;
    use std::sync::Mutex;

    fn active_session() -> Arc<SafeSession> {
        let session = Arc::new(SafeSession::new());
        session.set_agent(&StubAgent::named("coder"));
        session
    }

    fn collecting_handler(sink: Arc<Mutex<Vec<MonitorEvent>>>) -> EventHandler {
        Arc::new(move |event| {
            sink.lock().unwrap().push(event);
        })
    }

    fn fast_config(auto_terminate: bool) -> SafetyConfig {
        SafetyConfig {
            monitor: MonitorConfig {
                check_interval_ms: 10,
                auto_terminate,
            },
            ..Default::default()
        }
    }

    async fn wait_until(max_ms: u64, condition: impl Fn() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(max_ms);
        while tokio::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        condition()
    }

    fn seed_tool_loop(session: &SafeSession) {
        for _ in 0..5 {
            session.record_tool_call("bash", json!({ "command": "cargo test" }));
        }
    }

    #[test]
    fn test_poll_once_emits_runaway_event() {
        let session = active_session();
        seed_tool_loop(&session);

        let events = Arc::new(Mutex::new(Vec::new()));
        let handler = collecting_handler(Arc::clone(&events));
        let mut timeouts = TimeoutMonitor::from_validated(TimeoutConfig::default());
        let detector = RunawayDetector::default();

        poll_once(&session, &mut timeouts, &detector, Some(&handler), false);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Runaway);
        assert_eq!(events[0].severity, Severity::High);
        assert_eq!(events[0].data["pattern"], "infinite_tool_loop");
        // Passive by default: the session is untouched.
        assert_eq!(session.status(), SessionStatus::Active);
        assert!(!session.stop_requested());
    }

    #[test]
    fn test_poll_once_emits_timeout_event() {
        let session = active_session();
        session.advance_clock(Duration::from_secs(3600));

        let events = Arc::new(Mutex::new(Vec::new()));
        let handler = collecting_handler(Arc::clone(&events));
        let mut timeouts = TimeoutMonitor::from_validated(TimeoutConfig::default());
        let detector = RunawayDetector::default();

        poll_once(&session, &mut timeouts, &detector, Some(&handler), false);
        poll_once(&session, &mut timeouts, &detector, Some(&handler), false);

        let events = events.lock().unwrap();
        // Exceeded warnings repeat on every poll.
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::Timeout);
        assert_eq!(events[0].severity, Severity::High);
        assert!(events[0].message.contains("TIMEOUT"));
        assert!(events[0].data["remaining_secs"].as_f64().unwrap() < 0.0);
    }

    #[test]
    fn test_poll_once_threshold_warning_is_medium_and_once() {
        let session = active_session();
        session.advance_clock(Duration::from_secs(1350)); // 75% of 1800

        let events = Arc::new(Mutex::new(Vec::new()));
        let handler = collecting_handler(Arc::clone(&events));
        let mut timeouts = TimeoutMonitor::from_validated(TimeoutConfig::default());
        let detector = RunawayDetector::default();

        poll_once(&session, &mut timeouts, &detector, Some(&handler), false);
        poll_once(&session, &mut timeouts, &detector, Some(&handler), false);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Medium);
        assert!(events[0].message.contains("75%"));
    }

    #[test]
    fn test_poll_once_auto_terminates_on_condition() {
        let session = active_session();
        seed_tool_loop(&session);

        let mut timeouts = TimeoutMonitor::from_validated(TimeoutConfig::default());
        let detector = RunawayDetector::default();

        poll_once(&session, &mut timeouts, &detector, None, true);

        assert_eq!(session.status(), SessionStatus::Terminated);
        assert!(session.stop_requested());
    }

    #[test]
    fn test_poll_once_healthy_session_is_quiet() {
        let session = active_session();
        session.record_tool_call("bash", json!({}));

        let events = Arc::new(Mutex::new(Vec::new()));
        let handler = collecting_handler(Arc::clone(&events));
        let mut timeouts = TimeoutMonitor::from_validated(TimeoutConfig::default());
        let detector = RunawayDetector::default();

        poll_once(&session, &mut timeouts, &detector, Some(&handler), true);

        assert!(events.lock().unwrap().is_empty());
        assert_eq!(session.status(), SessionStatus::Active);
    }

    #[test]
    fn test_handler_panic_does_not_stop_polling() {
        let session = active_session();
        seed_tool_loop(&session);

        let panicking: EventHandler = Arc::new(|_| panic!("handler bug"));
        let mut timeouts = TimeoutMonitor::from_validated(TimeoutConfig::default());
        let detector = RunawayDetector::default();

        // Neither call propagates the panic.
        poll_once(&session, &mut timeouts, &detector, Some(&panicking), false);
        poll_once(&session, &mut timeouts, &detector, Some(&panicking), false);

        // And a healthy handler still receives events afterwards.
        let events = Arc::new(Mutex::new(Vec::new()));
        let handler = collecting_handler(Arc::clone(&events));
        poll_once(&session, &mut timeouts, &detector, Some(&handler), false);
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_start_stop_leaves_no_task_behind() {
        let session = active_session();
        let mut monitor = BackgroundMonitor::new(Arc::clone(&session), fast_config(false)).unwrap();
        assert!(!monitor.is_running());

        for _ in 0..3 {
            monitor.start();
            assert!(monitor.is_running());
            monitor.stop().await.unwrap();
            assert!(!monitor.is_running());
        }
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let session = active_session();
        let mut monitor = BackgroundMonitor::new(Arc::clone(&session), fast_config(false)).unwrap();

        monitor.start();
        monitor.start();
        assert!(monitor.is_running());

        monitor.stop().await.unwrap();
        monitor.stop().await.unwrap();
        assert!(!monitor.is_running());
    }

    #[tokio::test]
    async fn test_monitor_emits_events_from_background_task() {
        let session = active_session();
        seed_tool_loop(&session);

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let mut monitor = BackgroundMonitor::new(Arc::clone(&session), fast_config(false)).unwrap();
        monitor.set_on_event(move |event| {
            sink.lock().unwrap().push(event);
        });
        monitor.start();

        assert!(wait_until(500, || !events.lock().unwrap().is_empty()).await);
        monitor.stop().await.unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events[0].event_type, EventType::Runaway);
        // auto_terminate off: event-only reporting.
        assert_eq!(session.status(), SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_monitor_auto_terminates_session() {
        let session = active_session();
        seed_tool_loop(&session);

        let mut monitor = BackgroundMonitor::new(Arc::clone(&session), fast_config(true)).unwrap();
        monitor.start();

        assert!(
            wait_until(500, || session.status() == SessionStatus::Terminated).await,
            "session should be terminated within one polling interval"
        );
        assert!(session.stop_requested());
        monitor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_no_events_before_condition_holds() {
        let session = active_session();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let mut monitor = BackgroundMonitor::new(Arc::clone(&session), fast_config(true)).unwrap();
        monitor.set_on_event(move |event| {
            sink.lock().unwrap().push(event);
        });
        monitor.start();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(events.lock().unwrap().is_empty());
        assert_eq!(session.status(), SessionStatus::Active);

        // Condition appears mid-flight; the next poll picks it up.
        seed_tool_loop(&session);
        assert!(wait_until(500, || session.status() == SessionStatus::Terminated).await);
        monitor.stop().await.unwrap();
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = SafetyConfig {
            monitor: MonitorConfig {
                check_interval_ms: 0,
                auto_terminate: false,
            },
            ..Default::default()
        };
        assert!(BackgroundMonitor::new(Arc::new(SafeSession::new()), config).is_err());
    }

    #[test]
    fn test_event_serializes_with_lowercase_labels() {
        let event = MonitorEvent {
            event_type: EventType::Timeout,
            message: "m".to_string(),
            severity: Severity::Medium,
            data: json!({}),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "timeout");
        assert_eq!(value["severity"], "medium");
    }

    #[test]
    fn test_severity_is_ordered() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
    }
}
