//! Error types for the audit trail.

use thiserror::Error;

/// Errors that can occur while building or persisting audit events.
#[derive(Debug, Error)]
pub enum AuditError {
    /// A required field was missing when building an event.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Failed to serialize an event.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to write an event to its destination.
    #[error("audit sink i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// The sink rejected the event for a backend-specific reason.
    #[error("audit sink unavailable: {0}")]
    SinkUnavailable(String),
}

/// Result type alias for audit operations.
pub type Result<T> = std::result::Result<T, AuditError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formats_correctly() {
        let err = AuditError::MissingField("secret_path");
        assert_eq!(err.to_string(), "missing required field: secret_path");

        let err = AuditError::SinkUnavailable("disk full".to_string());
        assert_eq!(err.to_string(), "audit sink unavailable: disk full");
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: AuditError = io.into();
        assert!(matches!(err, AuditError::Io(_)));
    }
}
