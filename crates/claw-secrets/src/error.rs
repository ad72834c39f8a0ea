//! Error types for the secrets management system.

use thiserror::Error;

/// Errors that can occur in the secrets management system.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed path, value, policy or request.
    #[error("validation failed: {reason}")]
    Validation {
        /// What was wrong with the input.
        reason: String,
    },

    /// The requester is not allowed to perform the action.
    #[error("access denied: {reason}")]
    AccessDenied {
        /// The reason access was denied.
        reason: String,
    },

    /// No secret exists at the given path, version or id.
    #[error("secret not found: {resource}")]
    NotFound {
        /// The path, `path@version` or id that was looked up.
        resource: String,
    },

    /// A secret already occupies the path.
    #[error("secret already exists: {path}")]
    AlreadyExists {
        /// The occupied path.
        path: String,
    },

    /// A conditional write lost against a concurrent writer.
    #[error("version conflict on {path}: expected version {expected}, found {found}")]
    VersionConflict {
        /// The path being written.
        path: String,
        /// Version the writer intended to create.
        expected: u32,
        /// Version the provider would have accepted.
        found: u32,
    },

    /// The backend provider failed.
    #[error("provider {provider} failed: {reason}")]
    Provider {
        /// Provider name.
        provider: String,
        /// Backend-independent failure description.
        reason: String,
    },

    /// The backend provider did not answer in time.
    #[error("provider {provider} timed out after {timeout_ms}ms")]
    ProviderTimeout {
        /// Provider name.
        provider: String,
        /// The bound that was exceeded.
        timeout_ms: u64,
    },

    /// Rotation was requested for a secret without a rotation policy.
    #[error("secret {id} has no rotation policy")]
    PolicyMissing {
        /// The secret identifier.
        id: String,
    },

    /// The requested behavior is not supported.
    #[error("not implemented: {feature}")]
    NotImplemented {
        /// What is unsupported.
        feature: String,
    },

    /// Encryption or decryption failed.
    #[error("encryption error: {reason}")]
    Encryption {
        /// The reason encryption failed.
        reason: String,
    },

    /// Configuration is invalid.
    #[error("invalid configuration: {reason}")]
    Config {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {reason}")]
    Serialization {
        /// The reason serialization failed.
        reason: String,
    },
}

/// Flat category of an [`Error`], for callers that branch on the kind only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`Error::Validation`].
    Validation,
    /// See [`Error::AccessDenied`].
    AccessDenied,
    /// See [`Error::NotFound`].
    NotFound,
    /// See [`Error::AlreadyExists`].
    AlreadyExists,
    /// See [`Error::VersionConflict`].
    VersionConflict,
    /// See [`Error::Provider`].
    Provider,
    /// See [`Error::ProviderTimeout`].
    ProviderTimeout,
    /// See [`Error::PolicyMissing`].
    PolicyMissing,
    /// See [`Error::NotImplemented`].
    NotImplemented,
    /// See [`Error::Encryption`].
    Encryption,
    /// See [`Error::Config`].
    Config,
    /// See [`Error::Serialization`].
    Serialization,
}

impl Error {
    /// Shorthand for a [`Error::Validation`].
    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`Error::NotFound`].
    pub(crate) fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Returns the category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::AccessDenied { .. } => ErrorKind::AccessDenied,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::VersionConflict { .. } => ErrorKind::VersionConflict,
            Self::Provider { .. } => ErrorKind::Provider,
            Self::ProviderTimeout { .. } => ErrorKind::ProviderTimeout,
            Self::PolicyMissing { .. } => ErrorKind::PolicyMissing,
            Self::NotImplemented { .. } => ErrorKind::NotImplemented,
            Self::Encryption { .. } => ErrorKind::Encryption,
            Self::Config { .. } => ErrorKind::Config,
            Self::Serialization { .. } => ErrorKind::Serialization,
        }
    }

    /// Returns true if retrying the same idempotent call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider { .. } | Self::ProviderTimeout { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            reason: e.to_string(),
        }
    }
}

/// Result type alias for secrets operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formats_correctly() {
        let err = Error::validation("path must not start with '/'");
        assert_eq!(
            err.to_string(),
            "validation failed: path must not start with '/'"
        );

        let err = Error::not_found("foo/bar");
        assert_eq!(err.to_string(), "secret not found: foo/bar");

        let err = Error::AccessDenied {
            reason: "bob may not read a/b".to_string(),
        };
        assert_eq!(err.to_string(), "access denied: bob may not read a/b");

        let err = Error::ProviderTimeout {
            provider: "vault".to_string(),
            timeout_ms: 250,
        };
        assert_eq!(err.to_string(), "provider vault timed out after 250ms");
    }

    #[test]
    fn kind_matches_variant() {
        assert_eq!(Error::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(Error::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::PolicyMissing { id: "x".into() }.kind(),
            ErrorKind::PolicyMissing
        );
    }

    #[test]
    fn only_provider_failures_are_retryable() {
        assert!(
            Error::Provider {
                provider: "aws".into(),
                reason: "503".into()
            }
            .is_retryable()
        );
        assert!(
            Error::ProviderTimeout {
                provider: "aws".into(),
                timeout_ms: 1
            }
            .is_retryable()
        );
        assert!(!Error::validation("bad").is_retryable());
        assert!(
            !Error::Encryption {
                reason: "tag mismatch".into()
            }
            .is_retryable()
        );
        assert!(
            !Error::VersionConflict {
                path: "a".into(),
                expected: 2,
                found: 3
            }
            .is_retryable()
        );
    }

    #[test]
    fn serde_error_converts() {
        let err: Error = serde_json::from_str::<u32>("nope")
            .map_err(Error::from)
            .expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Serialization);
    }
}
