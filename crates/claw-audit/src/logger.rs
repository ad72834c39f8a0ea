//! The audit logger used by the secrets orchestrator.
//!
//! [`AuditLogger::log_event`] never fails from the caller's point of view,
//! but it never drops a failure silently either: sink errors go to the
//! operational log (target `claw_audit::ops`) and repeated failures flip
//! [`AuditLogger::health`] to [`AuditHealth::Degraded`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::events::AuditEvent;
use crate::sink::AuditSink;

/// Default number of consecutive sink failures before health degrades.
pub const DEFAULT_DEGRADED_AFTER: u32 = 3;

/// Health of the audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditHealth {
    /// The most recent writes succeeded.
    Healthy,
    /// Writes have been failing.
    Degraded {
        /// Failures since the last successful write.
        consecutive_failures: u32,
        /// Message of the most recent failure.
        last_error: String,
    },
}

impl AuditHealth {
    /// Returns true if the audit trail is healthy.
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Fire-and-forget audit logger over a pluggable [`AuditSink`].
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
    degraded_after: u32,
    consecutive_failures: AtomicU32,
    total_failures: AtomicU64,
    total_written: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl AuditLogger {
    /// Creates a logger over the given sink.
    #[must_use]
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self::with_threshold(sink, DEFAULT_DEGRADED_AFTER)
    }

    /// Creates a logger that reports degraded health after
    /// `degraded_after` consecutive failures (minimum 1).
    #[must_use]
    pub fn with_threshold(sink: Arc<dyn AuditSink>, degraded_after: u32) -> Self {
        Self {
            sink,
            degraded_after: degraded_after.max(1),
            consecutive_failures: AtomicU32::new(0),
            total_failures: AtomicU64::new(0),
            total_written: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    /// Appends an event to the sink.
    pub fn log_event(&self, event: &AuditEvent) {
        match self.sink.append(event) {
            Ok(()) => {
                self.total_written.fetch_add(1, Ordering::Relaxed);
                let previous = self.consecutive_failures.swap(0, Ordering::SeqCst);
                if previous >= self.degraded_after {
                    tracing::info!(
                        target: "claw_audit::ops",
                        sink = self.sink.name(),
                        previous_failures = previous,
                        "audit sink recovered"
                    );
                }
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                self.total_failures.fetch_add(1, Ordering::Relaxed);
                *self.last_error.lock() = Some(e.to_string());

                // The event itself goes to the operational channel so it is
                // not lost entirely.
                tracing::error!(
                    target: "claw_audit::ops",
                    sink = self.sink.name(),
                    error = %e,
                    consecutive_failures = failures,
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    path = %event.secret_path,
                    requester = %event.requester,
                    "failed to persist audit event"
                );
                if failures == self.degraded_after {
                    tracing::error!(
                        target: "claw_audit::ops",
                        sink = self.sink.name(),
                        "audit trail degraded"
                    );
                }
            }
        }
    }

    /// Returns the current health of the audit trail.
    #[must_use]
    pub fn health(&self) -> AuditHealth {
        let consecutive_failures = self.consecutive_failures.load(Ordering::SeqCst);
        if consecutive_failures < self.degraded_after {
            return AuditHealth::Healthy;
        }
        AuditHealth::Degraded {
            consecutive_failures,
            last_error: self.last_error.lock().clone().unwrap_or_default(),
        }
    }

    /// Total events persisted successfully.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.total_written.load(Ordering::Relaxed)
    }

    /// Total failed writes.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("sink", &self.sink.name())
            .field("degraded_after", &self.degraded_after)
            .field("written", &self.written())
            .field("failures", &self.failures())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuditError, Result};
    use crate::events::AuditEventType;
    use crate::sink::MemoryAuditSink;
    use std::sync::atomic::AtomicBool;

    /// A sink that fails while `failing` is set.
    #[derive(Default)]
    struct FlakySink {
        failing: AtomicBool,
        accepted: AtomicU32,
    }

    impl AuditSink for FlakySink {
        fn append(&self, _event: &AuditEvent) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(AuditError::SinkUnavailable("disk full".to_string()));
            }
            self.accepted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    fn event() -> AuditEvent {
        AuditEvent::builder()
            .event_type(AuditEventType::SecretAccessed)
            .secret_path("a/b")
            .requester("alice")
            .build()
            .expect("valid event")
    }

    #[test]
    fn logs_to_sink() {
        let sink = Arc::new(MemoryAuditSink::new());
        let logger = AuditLogger::new(sink.clone());

        logger.log_event(&event());

        assert_eq!(sink.len(), 1);
        assert_eq!(logger.written(), 1);
        assert!(logger.health().is_healthy());
    }

    #[test]
    fn failures_below_threshold_stay_healthy() {
        let sink = Arc::new(FlakySink::default());
        sink.failing.store(true, Ordering::SeqCst);
        let logger = AuditLogger::with_threshold(sink, 3);

        logger.log_event(&event());
        logger.log_event(&event());

        assert!(logger.health().is_healthy());
        assert_eq!(logger.failures(), 2);
    }

    #[test]
    fn persistent_failures_degrade_health() {
        let sink = Arc::new(FlakySink::default());
        sink.failing.store(true, Ordering::SeqCst);
        let logger = AuditLogger::with_threshold(sink, 2);

        logger.log_event(&event());
        logger.log_event(&event());

        match logger.health() {
            AuditHealth::Degraded {
                consecutive_failures,
                last_error,
            } => {
                assert_eq!(consecutive_failures, 2);
                assert!(last_error.contains("disk full"));
            }
            AuditHealth::Healthy => panic!("expected degraded health"),
        }
    }

    #[test]
    fn successful_write_recovers_health() {
        let sink = Arc::new(FlakySink::default());
        sink.failing.store(true, Ordering::SeqCst);
        let logger = AuditLogger::with_threshold(sink.clone(), 1);

        logger.log_event(&event());
        assert!(!logger.health().is_healthy());

        sink.failing.store(false, Ordering::SeqCst);
        logger.log_event(&event());

        assert!(logger.health().is_healthy());
        assert_eq!(sink.accepted.load(Ordering::SeqCst), 1);
        assert_eq!(logger.failures(), 1);
    }

    #[test]
    fn zero_threshold_is_clamped() {
        let logger = AuditLogger::with_threshold(Arc::new(MemoryAuditSink::new()), 0);
        assert!(logger.health().is_healthy());
        assert_eq!(logger.degraded_after, 1);
    }

    #[test]
    fn logger_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AuditLogger>();
    }
}
