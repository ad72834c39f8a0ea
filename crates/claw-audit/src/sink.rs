//! Audit sinks: where audit events are persisted.
//!
//! A sink reports write failures to its caller. The [`crate::AuditLogger`]
//! turns those failures into operational log lines and a health signal.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::events::{AuditEvent, AuditEventType, Severity};

/// Destination for audit events.
///
/// Implement this trait to persist audit events somewhere durable
/// (a file, a database table, an external collector).
pub trait AuditSink: Send + Sync {
    /// Appends an event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event could not be persisted.
    fn append(&self, event: &AuditEvent) -> Result<()>;

    /// Short name used in operational logs.
    fn name(&self) -> &'static str;
}

/// Sink that writes events through the `tracing` infrastructure.
///
/// Events are logged at levels chosen from their severity:
/// - Info, Low → `tracing::info!`
/// - Medium → `tracing::warn!`
/// - High, Critical → `tracing::error!`
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink {
    prefix: Option<String>,
}

impl TracingAuditSink {
    /// Creates a new tracing-based sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new tracing-based sink with a message prefix.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }
}

impl AuditSink for TracingAuditSink {
    fn append(&self, event: &AuditEvent) -> Result<()> {
        let json = event.to_json()?;
        let prefix = self.prefix.as_deref().unwrap_or("AUDIT");
        let event_type = event.event_type;
        let path = event.secret_path.as_str();
        let requester = event.requester.as_str();

        match event.severity {
            Severity::Info | Severity::Low => {
                tracing::info!(
                    target: "claw_audit",
                    event_id = %event.event_id,
                    %event_type,
                    path,
                    requester,
                    event_json = %json,
                    "[{prefix}] {event_type}"
                );
            }
            Severity::Medium => {
                tracing::warn!(
                    target: "claw_audit",
                    event_id = %event.event_id,
                    %event_type,
                    path,
                    requester,
                    event_json = %json,
                    "[{prefix}] {event_type}"
                );
            }
            Severity::High | Severity::Critical => {
                tracing::error!(
                    target: "claw_audit",
                    event_id = %event.event_id,
                    %event_type,
                    path,
                    requester,
                    event_json = %json,
                    "[{prefix}] {event_type}"
                );
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}

/// Filter criteria for querying a [`MemoryAuditSink`].
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Filter by exact secret path.
    pub secret_path: Option<String>,
    /// Filter by requester.
    pub requester: Option<String>,
    /// Filter by event type.
    pub event_type: Option<AuditEventType>,
    /// Only failures (or only successes).
    pub failures: Option<bool>,
    /// Filter entries after this time.
    pub after: Option<DateTime<Utc>>,
    /// Filter entries before this time.
    pub before: Option<DateTime<Utc>>,
    /// Maximum number of entries to return.
    pub limit: Option<usize>,
}

impl AuditFilter {
    /// Creates a new empty filter that matches all entries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters by secret path.
    #[must_use]
    pub fn for_path(mut self, path: impl Into<String>) -> Self {
        self.secret_path = Some(path.into());
        self
    }

    /// Filters by requester.
    #[must_use]
    pub fn by_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = Some(requester.into());
        self
    }

    /// Filters by event type.
    #[must_use]
    pub const fn with_type(mut self, event_type: AuditEventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    /// Keeps only failed attempts.
    #[must_use]
    pub const fn failures_only(mut self) -> Self {
        self.failures = Some(true);
        self
    }

    /// Filters entries after a given time.
    #[must_use]
    pub const fn after(mut self, time: DateTime<Utc>) -> Self {
        self.after = Some(time);
        self
    }

    /// Filters entries before a given time.
    #[must_use]
    pub const fn before(mut self, time: DateTime<Utc>) -> Self {
        self.before = Some(time);
        self
    }

    /// Limits the number of returned entries.
    #[must_use]
    pub const fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    fn matches(&self, event: &AuditEvent) -> bool {
        if self
            .secret_path
            .as_ref()
            .is_some_and(|p| &event.secret_path != p)
        {
            return false;
        }
        if self
            .requester
            .as_ref()
            .is_some_and(|r| &event.requester != r)
        {
            return false;
        }
        if self.event_type.is_some_and(|t| event.event_type != t) {
            return false;
        }
        if self.failures.is_some_and(|f| event.is_failure() != f) {
            return false;
        }
        if self.after.is_some_and(|after| event.timestamp <= after) {
            return false;
        }
        if self.before.is_some_and(|before| event.timestamp >= before) {
            return false;
        }
        true
    }
}

/// An in-memory sink that keeps every event.
///
/// Useful for tests and for embedding processes that ship events elsewhere
/// in batches.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: RwLock<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    /// Creates a new empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queries stored events, newest first.
    #[must_use]
    pub fn query(&self, filter: &AuditFilter) -> Vec<AuditEvent> {
        let events = self.events.read();
        let mut results: Vec<AuditEvent> = events
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();

        // Insertion order breaks ties between equal timestamps.
        results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        if let Some(limit) = filter.limit {
            results.truncate(limit);
        }
        results
    }

    /// Returns every stored event in insertion order.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.read().clone()
    }

    /// Returns the number of stored events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, event: &AuditEvent) -> Result<()> {
        self.events.write().push(event.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

impl std::fmt::Debug for MemoryAuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAuditSink")
            .field("events_count", &self.len())
            .finish()
    }
}

/// Sink that appends one JSON record per line to a file.
pub struct JsonLinesAuditSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesAuditSink {
    /// Opens (or creates) the file for appending.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Returns the file this sink writes to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonLinesAuditSink {
    fn append(&self, event: &AuditEvent) -> Result<()> {
        let mut line = event.to_json()?;
        line.push('\n');
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "jsonl"
    }
}

impl std::fmt::Debug for JsonLinesAuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesAuditSink")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn event(path: &str, requester: &str, event_type: AuditEventType) -> AuditEvent {
        AuditEvent::builder()
            .event_type(event_type)
            .secret_path(path)
            .requester(requester)
            .build()
            .expect("valid event")
    }

    #[test]
    fn tracing_sink_accepts_every_severity() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let sink = TracingAuditSink::with_prefix("SECRETS");
        for event_type in [
            AuditEventType::SecretAccessed,
            AuditEventType::SecretUpdateFailed,
            AuditEventType::AccessDenied,
        ] {
            sink.append(&event("a/b", "alice", event_type))
                .expect("tracing sink never fails");
        }
    }

    #[test]
    fn memory_sink_records_and_counts() {
        let sink = MemoryAuditSink::new();
        assert!(sink.is_empty());

        sink.append(&event("a/b", "alice", AuditEventType::SecretStored))
            .expect("append");
        sink.append(&event("a/c", "bob", AuditEventType::SecretAccessed))
            .expect("append");

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.events()[0].secret_path, "a/b");
    }

    #[test]
    fn memory_sink_query_filters() {
        let sink = MemoryAuditSink::new();
        sink.append(&event("a/b", "alice", AuditEventType::SecretStored))
            .expect("append");
        sink.append(&event("a/b", "bob", AuditEventType::AccessDenied))
            .expect("append");
        sink.append(&event("a/c", "alice", AuditEventType::SecretAccessed))
            .expect("append");

        assert_eq!(sink.query(&AuditFilter::new().for_path("a/b")).len(), 2);
        assert_eq!(sink.query(&AuditFilter::new().by_requester("alice")).len(), 2);
        assert_eq!(
            sink.query(&AuditFilter::new().with_type(AuditEventType::AccessDenied))
                .len(),
            1
        );
        assert_eq!(sink.query(&AuditFilter::new().failures_only()).len(), 1);
        assert_eq!(sink.query(&AuditFilter::new().limit(1)).len(), 1);
    }

    #[test]
    fn memory_sink_query_newest_first() {
        let sink = MemoryAuditSink::new();
        sink.append(&event("first", "alice", AuditEventType::SecretStored))
            .expect("append");
        std::thread::sleep(std::time::Duration::from_millis(5));
        sink.append(&event("second", "alice", AuditEventType::SecretStored))
            .expect("append");

        let results = sink.query(&AuditFilter::new());
        assert_eq!(results[0].secret_path, "second");
        assert_eq!(results[1].secret_path, "first");
    }

    #[test]
    fn memory_sink_time_range() {
        let sink = MemoryAuditSink::new();
        sink.append(&event("old", "alice", AuditEventType::SecretStored))
            .expect("append");
        std::thread::sleep(std::time::Duration::from_millis(20));
        let middle = Utc::now();
        std::thread::sleep(std::time::Duration::from_millis(20));
        sink.append(&event("new", "alice", AuditEventType::SecretStored))
            .expect("append");

        let after = sink.query(&AuditFilter::new().after(middle));
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].secret_path, "new");

        let before = sink.query(&AuditFilter::new().before(middle));
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].secret_path, "old");
    }

    #[test]
    fn memory_sink_thread_safe() {
        let sink = Arc::new(MemoryAuditSink::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for j in 0..10 {
                        let path = format!("s/{i}/{j}");
                        sink.append(&event(&path, "svc", AuditEventType::SecretStored))
                            .expect("append");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread should complete");
        }
        assert_eq!(sink.len(), 80);
    }

    #[test]
    fn jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("audit.jsonl");

        let sink = JsonLinesAuditSink::open(&path).expect("open");
        sink.append(&event("a/b", "alice", AuditEventType::SecretStored))
            .expect("append");
        sink.append(&event("a/b", "alice", AuditEventType::SecretDeleted))
            .expect("append");

        let contents = std::fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let second: AuditEvent = serde_json::from_str(lines[1]).expect("parse");
        assert_eq!(second.event_type, AuditEventType::SecretDeleted);
    }

    #[test]
    fn jsonl_sink_reopen_keeps_existing_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("audit.jsonl");

        {
            let sink = JsonLinesAuditSink::open(&path).expect("open");
            sink.append(&event("a/b", "alice", AuditEventType::SecretStored))
                .expect("append");
        }
        let sink = JsonLinesAuditSink::open(&path).expect("reopen");
        sink.append(&event("a/b", "alice", AuditEventType::SecretUpdated))
            .expect("append");

        let contents = std::fs::read_to_string(sink.path()).expect("read");
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn jsonl_sink_open_fails_for_missing_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = JsonLinesAuditSink::open(dir.path().join("missing").join("audit.jsonl"));
        assert!(result.is_err());
    }
}
