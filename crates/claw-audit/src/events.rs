//! Secret lifecycle audit event types.
//!
//! One [`AuditEvent`] is recorded per access or mutation attempt, whether it
//! succeeded or failed. Events are append-only records; nothing in this crate
//! updates or deletes them once written.

use crate::error::{AuditError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Operation-specific event payload.
pub type EventMetadata = serde_json::Map<String, serde_json::Value>;

/// Severity level for audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Routine successful operation.
    Info = 0,
    /// Read or list that failed for a non-security reason.
    Low = 1,
    /// Mutation that failed.
    Medium = 2,
    /// Access was denied by policy.
    High = 3,
    /// Integrity failure (tampered or undecryptable data).
    Critical = 4,
}

impl Severity {
    /// Returns the string representation of this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The kind of operation an audit event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A new secret was stored.
    SecretStored,
    /// A secret was read.
    SecretAccessed,
    /// A secret received a new value.
    SecretUpdated,
    /// A secret was deleted.
    SecretDeleted,
    /// A secret was rotated to a generated value.
    SecretRotated,
    /// Secrets were listed.
    SecretsListed,
    /// A policy check denied the requester.
    AccessDenied,
    /// Storing a secret failed.
    SecretStoreFailed,
    /// Reading a secret failed.
    SecretAccessFailed,
    /// Updating a secret failed.
    SecretUpdateFailed,
    /// Deleting a secret failed.
    SecretDeleteFailed,
    /// Rotating a secret failed.
    SecretRotationFailed,
    /// Listing secrets failed.
    SecretsListFailed,
}

impl AuditEventType {
    /// Returns the wire name of this event type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SecretStored => "secret_stored",
            Self::SecretAccessed => "secret_accessed",
            Self::SecretUpdated => "secret_updated",
            Self::SecretDeleted => "secret_deleted",
            Self::SecretRotated => "secret_rotated",
            Self::SecretsListed => "secrets_listed",
            Self::AccessDenied => "access_denied",
            Self::SecretStoreFailed => "secret_store_failed",
            Self::SecretAccessFailed => "secret_access_failed",
            Self::SecretUpdateFailed => "secret_update_failed",
            Self::SecretDeleteFailed => "secret_delete_failed",
            Self::SecretRotationFailed => "secret_rotation_failed",
            Self::SecretsListFailed => "secrets_list_failed",
        }
    }

    /// Returns the `_failed` counterpart of a success type.
    ///
    /// Failure types and [`AuditEventType::AccessDenied`] map to themselves.
    #[must_use]
    pub const fn failure_variant(self) -> Self {
        match self {
            Self::SecretStored => Self::SecretStoreFailed,
            Self::SecretAccessed => Self::SecretAccessFailed,
            Self::SecretUpdated => Self::SecretUpdateFailed,
            Self::SecretDeleted => Self::SecretDeleteFailed,
            Self::SecretRotated => Self::SecretRotationFailed,
            Self::SecretsListed => Self::SecretsListFailed,
            other => other,
        }
    }

    /// Returns true if this type records a failed attempt.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::AccessDenied
                | Self::SecretStoreFailed
                | Self::SecretAccessFailed
                | Self::SecretUpdateFailed
                | Self::SecretDeleteFailed
                | Self::SecretRotationFailed
                | Self::SecretsListFailed
        )
    }

    /// Returns true if this type records a mutation attempt.
    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::SecretStored
                | Self::SecretUpdated
                | Self::SecretDeleted
                | Self::SecretRotated
                | Self::SecretStoreFailed
                | Self::SecretUpdateFailed
                | Self::SecretDeleteFailed
                | Self::SecretRotationFailed
        )
    }

    /// Returns the default severity for events of this type.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::AccessDenied => Severity::High,
            Self::SecretAccessFailed | Self::SecretsListFailed => Severity::Low,
            Self::SecretStoreFailed
            | Self::SecretUpdateFailed
            | Self::SecretDeleteFailed
            | Self::SecretRotationFailed => Severity::Medium,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single audit record.
///
/// Serialized field names follow the persisted schema: `type`, `secretPath`,
/// `requester`, `timestamp`, `metadata`, `error`, `duration` (milliseconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// What kind of operation was attempted.
    #[serde(rename = "type")]
    pub event_type: AuditEventType,
    /// Severity level.
    pub severity: Severity,
    /// Path of the secret (or list prefix) the operation targeted.
    pub secret_path: String,
    /// Principal that made the request.
    pub requester: String,
    /// When the operation finished.
    pub timestamp: DateTime<Utc>,
    /// Operation-specific details.
    #[serde(default)]
    pub metadata: EventMetadata,
    /// Error message when the operation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock duration of the operation in milliseconds.
    #[serde(rename = "duration")]
    pub duration_ms: u64,
}

impl AuditEvent {
    /// Creates a new event builder.
    #[must_use]
    pub fn builder() -> AuditEventBuilder {
        AuditEventBuilder::default()
    }

    /// Returns true if the event records a failed attempt.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.event_type.is_failure() || self.error.is_some()
    }

    /// Serializes the event to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(AuditError::from)
    }

    /// Serializes the event to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(AuditError::from)
    }
}

/// Builder for creating audit events with a fluent API.
#[derive(Debug, Default)]
pub struct AuditEventBuilder {
    event_type: Option<AuditEventType>,
    event_id: Option<Uuid>,
    timestamp: Option<DateTime<Utc>>,
    severity: Option<Severity>,
    secret_path: Option<String>,
    requester: Option<String>,
    metadata: EventMetadata,
    error: Option<String>,
    duration_ms: u64,
}

impl AuditEventBuilder {
    /// Sets the event type.
    #[must_use]
    pub const fn event_type(mut self, event_type: AuditEventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    /// Sets a specific event ID (default: random).
    #[must_use]
    pub const fn event_id(mut self, id: Uuid) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Sets the timestamp (default: now).
    #[must_use]
    pub const fn timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(ts);
        self
    }

    /// Overrides the severity derived from the event type.
    #[must_use]
    pub const fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Sets the targeted secret path or prefix.
    #[must_use]
    pub fn secret_path(mut self, path: impl Into<String>) -> Self {
        self.secret_path = Some(path.into());
        self
    }

    /// Sets the requesting principal.
    #[must_use]
    pub fn requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = Some(requester.into());
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Replaces all metadata entries.
    #[must_use]
    pub fn metadata_map(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Records the error that made the operation fail.
    #[must_use]
    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Sets the operation duration.
    #[must_use]
    pub const fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Builds the audit event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event type or requester is missing. An absent
    /// secret path is recorded as the empty (root) path.
    pub fn build(self) -> Result<AuditEvent> {
        let event_type = self
            .event_type
            .ok_or(AuditError::MissingField("event_type"))?;
        let requester = self
            .requester
            .filter(|r| !r.is_empty())
            .ok_or(AuditError::MissingField("requester"))?;

        Ok(AuditEvent {
            event_id: self.event_id.unwrap_or_else(Uuid::new_v4),
            event_type,
            severity: self.severity.unwrap_or_else(|| event_type.severity()),
            secret_path: self.secret_path.unwrap_or_default(),
            requester,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            metadata: self.metadata,
            error: self.error,
            duration_ms: self.duration_ms,
        })
    }
}
