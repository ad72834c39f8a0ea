//! # claw-audit
//!
//! Append-only audit trail for secret lifecycle operations.
//!
//! ## Features
//!
//! - [`AuditEvent`]: One record per access or mutation attempt
//! - [`AuditSink`]: Pluggable trait for audit destinations
//! - [`TracingAuditSink`], [`MemoryAuditSink`], [`JsonLinesAuditSink`]: Built-in sinks
//! - [`AuditLogger`]: Non-failing logger with degraded-health tracking
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use claw_audit::{AuditEvent, AuditEventType, AuditLogger, MemoryAuditSink};
//!
//! let sink = Arc::new(MemoryAuditSink::new());
//! let logger = AuditLogger::new(sink.clone());
//!
//! let event = AuditEvent::builder()
//!     .event_type(AuditEventType::SecretAccessed)
//!     .secret_path("database/production/main")
//!     .requester("api-server")
//!     .build();
//!
//! if let Ok(event) = event {
//!     logger.log_event(&event);
//! }
//! assert_eq!(sink.len(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod logger;
pub mod sink;

pub use error::{AuditError, Result};
pub use events::{AuditEvent, AuditEventBuilder, AuditEventType, EventMetadata, Severity};
pub use logger::{AuditHealth, AuditLogger, DEFAULT_DEGRADED_AFTER};
pub use sink::{AuditFilter, AuditSink, JsonLinesAuditSink, MemoryAuditSink, TracingAuditSink};
