//! Request and response shapes of the orchestrator's public operations.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    AccessPolicy, ProviderKind, Requester, RotationPolicy, SecretId, SecretMetadata, SecretValue,
};

/// A request to store a new secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRequest {
    /// Path to store at; validated by the manager.
    pub path: String,
    /// Plaintext value.
    pub value: SecretValue,
    /// Who is storing the secret.
    pub requester: Requester,
    /// Backend to use; must agree with the path prefix if there is one.
    #[serde(default)]
    pub provider: Option<ProviderKind>,
    /// Tags recorded in metadata.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Description recorded in metadata.
    #[serde(default)]
    pub description: Option<String>,
    /// Rotation policy; automatic policies are scheduled on store.
    #[serde(default)]
    pub rotation_policy: Option<RotationPolicy>,
    /// Extra grant attached to this secret.
    #[serde(default)]
    pub access_policy: Option<AccessPolicy>,
    /// Store the value as-is even when encryption is enabled.
    #[serde(default)]
    pub skip_encryption: bool,
}

impl SecretRequest {
    /// Creates a request with no optional fields set.
    #[must_use]
    pub fn new(path: impl Into<String>, value: impl Into<SecretValue>, requester: Requester) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
            requester,
            provider: None,
            tags: BTreeMap::new(),
            description: None,
            rotation_policy: None,
            access_policy: None,
            skip_encryption: false,
        }
    }

    /// Selects the backend.
    #[must_use]
    pub const fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the rotation policy.
    #[must_use]
    pub fn with_rotation_policy(mut self, policy: RotationPolicy) -> Self {
        self.rotation_policy = Some(policy);
        self
    }

    /// Attaches an access policy to the secret.
    #[must_use]
    pub fn with_access_policy(mut self, policy: AccessPolicy) -> Self {
        self.access_policy = Some(policy);
        self
    }

    /// Stores the value without encrypting it.
    #[must_use]
    pub const fn skip_encryption(mut self) -> Self {
        self.skip_encryption = true;
        self
    }
}

/// Result of storing a secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretResponse {
    /// Always true; failures are returned as errors.
    pub success: bool,
    /// Generated identifier.
    pub secret_id: SecretId,
    /// Stored path.
    pub path: String,
    /// Stored version (1).
    pub version: u32,
    /// Metadata as persisted.
    pub metadata: SecretMetadata,
}

/// How an update treats a field.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyUpdate<T> {
    /// Leave the current value.
    Keep,
    /// Replace the current value.
    Set(T),
    /// Clear the current value.
    Remove,
}

impl<T> Default for PolicyUpdate<T> {
    fn default() -> Self {
        Self::Keep
    }
}

/// Optional changes applied alongside an update.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateOptions {
    /// New description, if any.
    pub description: Option<String>,
    /// Tags replacing the current ones, if any.
    pub tags: Option<BTreeMap<String, String>>,
    /// Rotation policy change.
    pub rotation_policy: PolicyUpdate<RotationPolicy>,
}

impl UpdateOptions {
    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Replaces the tags.
    #[must_use]
    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Replaces the rotation policy.
    #[must_use]
    pub fn with_rotation_policy(mut self, policy: RotationPolicy) -> Self {
        self.rotation_policy = PolicyUpdate::Set(policy);
        self
    }

    /// Removes the rotation policy.
    #[must_use]
    pub fn remove_rotation_policy(mut self) -> Self {
        self.rotation_policy = PolicyUpdate::Remove;
        self
    }
}

/// Listing filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilters {
    /// Path prefix; the root when absent.
    pub prefix: Option<String>,
    /// Required tags.
    pub tags: BTreeMap<String, String>,
    /// Only this backend.
    pub provider: Option<ProviderKind>,
    /// Page size.
    pub limit: Option<usize>,
    /// Number of visible results to skip.
    pub offset: usize,
}

impl ListFilters {
    /// Filters matching everything.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Only paths under `prefix`.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Only secrets with this tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Only this backend.
    #[must_use]
    pub const fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Page window.
    #[must_use]
    pub const fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }
}

/// One page of listing results.
#[derive(Debug, Clone, PartialEq)]
pub struct ListResponse {
    /// Visible secrets in this page, sorted by path.
    pub secrets: Vec<SecretMetadata>,
    /// Visible secrets across all pages.
    pub total: usize,
    /// Whether further pages exist.
    pub has_more: bool,
}

/// Result of a rotation.
#[derive(Debug, Clone, PartialEq)]
pub struct RotationOutcome {
    /// Rotated secret.
    pub secret_id: SecretId,
    /// Version before the rotation.
    pub old_version: u32,
    /// Version created by the rotation.
    pub new_version: u32,
    /// The generated value.
    pub new_value: SecretValue,
    /// When the next scheduled rotation is due, for automatic policies.
    pub next_rotation: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GenerationType;

    #[test]
    fn secret_request_builder() {
        let request = SecretRequest::new("api-keys/github", "ghp_test123", Requester::new("alice"))
            .with_provider(ProviderKind::Vault)
            .with_tag("team", "platform")
            .with_description("GitHub token")
            .with_rotation_policy(RotationPolicy::automatic(30, GenerationType::ApiKey))
            .skip_encryption();

        assert_eq!(request.path, "api-keys/github");
        assert_eq!(request.value.expose(), "ghp_test123");
        assert_eq!(request.provider, Some(ProviderKind::Vault));
        assert_eq!(request.tags.get("team").map(String::as_str), Some("platform"));
        assert!(request.rotation_policy.is_some());
        assert!(request.skip_encryption);
    }

    #[test]
    fn secret_request_deserializes_with_defaults() {
        let request: SecretRequest = serde_json::from_str(
            r#"{ "path": "db/main", "value": "pw", "requester": { "id": "alice" } }"#,
        )
        .expect("deserialize");
        assert!(request.provider.is_none());
        assert!(request.tags.is_empty());
        assert!(!request.skip_encryption);
        assert!(request.requester.roles.is_empty());
    }

    #[test]
    fn secret_request_debug_redacts_value() {
        let request = SecretRequest::new("db/main", "hunter2", Requester::new("alice"));
        assert!(!format!("{request:?}").contains("hunter2"));
    }

    #[test]
    fn update_options_default_keeps_everything() {
        let options = UpdateOptions::default();
        assert_eq!(options.rotation_policy, PolicyUpdate::Keep);
        assert!(options.description.is_none());
        assert!(options.tags.is_none());

        let options = UpdateOptions::default().remove_rotation_policy();
        assert_eq!(options.rotation_policy, PolicyUpdate::Remove);
    }

    #[test]
    fn list_filters_builder() {
        let filters = ListFilters::all()
            .with_prefix("db/")
            .with_tag("env", "prod")
            .with_provider(ProviderKind::Aws)
            .page(10, 5);
        assert_eq!(filters.prefix.as_deref(), Some("db/"));
        assert_eq!(filters.offset, 10);
        assert_eq!(filters.limit, Some(5));
    }
}
