//! Core types for the secrets management system.
//!
//! This module defines the fundamental types used throughout the secrets system:
//! - [`SecretPath`]: A validated hierarchical key such as `database/production/main`
//! - [`SecretId`]: The generated identifier of one secret lifecycle
//! - [`SecretValue`]: Secret material that zeroizes on drop
//! - [`SecretMetadata`] / [`SecretVersion`] / [`Secret`]: The versioned record
//! - [`RotationPolicy`]: When and how a secret is regenerated
//! - [`AccessPolicy`] / [`Requester`] / [`Action`]: Who may do what

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// Characters allowed in a secret path.
static PATH_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9/_-]+$").unwrap_or_else(|_| unreachable!()));

/// A validated, hierarchical secret path.
///
/// Paths must:
/// - Be between 1 and 512 characters
/// - Contain only ASCII alphanumerics, `/`, `_` and `-`
/// - Not start or end with `/`
/// - Not contain `..` or empty segments (`//`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecretPath(String);

impl SecretPath {
    /// Maximum length of a secret path.
    pub const MAX_LENGTH: usize = 512;

    /// Creates a new `SecretPath` after validating the input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the path is malformed.
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        Self::validate(&path)?;
        Ok(Self(path))
    }

    /// Returns the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the provider selected by the path's first segment, if any.
    #[must_use]
    pub fn provider_prefix(&self) -> Option<ProviderKind> {
        ProviderKind::from_path(&self.0)
    }

    /// Returns true if this path equals `prefix` or lies below it.
    ///
    /// The empty prefix matches every path.
    #[must_use]
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }

    fn validate(path: &str) -> Result<()> {
        if path.is_empty() {
            return Err(Error::validation("path cannot be empty"));
        }
        if path.len() > Self::MAX_LENGTH {
            return Err(Error::validation(format!(
                "path exceeds maximum length of {} characters",
                Self::MAX_LENGTH
            )));
        }
        if path.contains("..") {
            return Err(Error::validation("path must not contain '..'"));
        }
        if !PATH_REGEX.is_match(path) {
            return Err(Error::validation(format!(
                "path '{path}' contains invalid characters; only alphanumerics, '/', '_' and '-' are allowed"
            )));
        }
        if path.starts_with('/') || path.ends_with('/') {
            return Err(Error::validation(
                "path must not start or end with '/'",
            ));
        }
        if path.contains("//") {
            return Err(Error::validation("path must not contain empty segments"));
        }
        Ok(())
    }
}

impl fmt::Display for SecretPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SecretPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SecretPath> for String {
    fn from(path: SecretPath) -> Self {
        path.0
    }
}

impl AsRef<str> for SecretPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Generated identifier of a secret.
///
/// A path reused after deletion receives a new identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretId(Uuid);

impl SecretId {
    /// Generates a new random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SecretId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::validation(format!("invalid secret id '{s}': {e}")))
    }
}

/// Secret material that securely zeroizes memory on drop.
///
/// Depending on where it sits this holds plaintext (in memory, in the cache)
/// or ciphertext (as persisted by a provider). Either way it is never printed.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretValue {
    data: String,
}

impl SecretValue {
    /// Creates a new `SecretValue`.
    #[must_use]
    pub fn new(data: impl Into<String>) -> Self {
        Self { data: data.into() }
    }

    /// Returns the value as a string slice.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.data
    }

    /// Returns the value as bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    /// Returns the length of the value in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the value is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consumes the `SecretValue` and returns the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        // The caller takes ownership and responsibility for the data.
        let mut this = std::mem::ManuallyDrop::new(self);
        std::mem::take(&mut this.data)
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue")
            .field("len", &self.data.len())
            .field("data", &"[REDACTED]")
            .finish()
    }
}

impl PartialEq for SecretValue {
    fn eq(&self, other: &Self) -> bool {
        // Constant-time comparison to prevent timing attacks
        use subtle::ConstantTimeEq;
        self.data.as_bytes().ct_eq(other.data.as_bytes()).into()
    }
}

impl Eq for SecretValue {}

impl From<&str> for SecretValue {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SecretValue {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// The backend a secret lives in.
///
/// The set is closed: adding a backend means adding a variant here, which
/// makes every `match` over providers fail to compile until it is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Vault-style KV store.
    Vault,
    /// AWS Secrets Manager.
    Aws,
    /// Azure Key Vault.
    Azure,
}

impl ProviderKind {
    /// Every provider, in resolution-fallback order.
    pub const ALL: [Self; 3] = [Self::Vault, Self::Aws, Self::Azure];

    /// Returns the provider name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Vault => "vault",
            Self::Aws => "aws",
            Self::Azure => "azure",
        }
    }

    /// Returns the provider selected by a `vault/`, `aws/` or `azure/` path prefix.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        let (first, _) = path.split_once('/')?;
        Self::ALL.into_iter().find(|kind| kind.as_str() == first)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::validation(format!("unknown provider '{s}'")))
    }
}

/// Principal name used by internal operations such as scheduled rotation.
pub const SYSTEM_PRINCIPAL: &str = "system";

/// Who is making a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Requester {
    /// Principal identifier (user, service account, `system`).
    pub id: String,
    /// Roles held by the principal.
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl Requester {
    /// Creates a requester without roles.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: BTreeSet::new(),
        }
    }

    /// Adds a role.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// The distinguished principal internal operations authenticate as.
    #[must_use]
    pub fn system() -> Self {
        Self::new(SYSTEM_PRINCIPAL)
    }

    /// Returns true for the system principal.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.id == SYSTEM_PRINCIPAL
    }
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Actions that can be performed on secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Read a secret value.
    Read,
    /// Create or update a secret.
    Write,
    /// Delete a secret.
    Delete,
    /// Rotate a secret.
    Rotate,
    /// List secrets under a prefix.
    List,
}

impl Action {
    /// Every action.
    pub const ALL: [Self; 5] = [
        Self::Read,
        Self::Write,
        Self::Delete,
        Self::Rotate,
        Self::List,
    ];

    /// Returns the action name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Rotate => "rotate",
            Self::List => "list",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Grants a set of actions on a path scope to principals and roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    /// Path scope: the empty scope covers everything, otherwise the scope
    /// path itself and everything below it.
    #[serde(default)]
    pub path_scope: String,
    /// Principals granted access; `*` grants every principal.
    #[serde(default)]
    pub principals: BTreeSet<String>,
    /// Roles granted access.
    #[serde(default)]
    pub roles: BTreeSet<String>,
    /// Actions granted.
    #[serde(default)]
    pub actions: BTreeSet<Action>,
    /// When this policy expires (if ever).
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessPolicy {
    /// Principal wildcard.
    pub const ANY_PRINCIPAL: &'static str = "*";

    /// Creates an empty policy (grants nothing) for a scope.
    #[must_use]
    pub fn new(path_scope: impl Into<String>) -> Self {
        Self {
            path_scope: path_scope.into(),
            principals: BTreeSet::new(),
            roles: BTreeSet::new(),
            actions: BTreeSet::new(),
            expires_at: None,
        }
    }

    /// Grants the policy to the given principals.
    #[must_use]
    pub fn allow_principals<I, S>(mut self, principals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.principals.extend(principals.into_iter().map(Into::into));
        self
    }

    /// Grants the policy to holders of the given roles.
    #[must_use]
    pub fn allow_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    /// Adds allowed actions.
    #[must_use]
    pub fn allow_actions(mut self, actions: impl IntoIterator<Item = Action>) -> Self {
        self.actions.extend(actions);
        self
    }

    /// Sets the expiration time for this policy.
    #[must_use]
    pub const fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// The default grant that lets scheduled rotation run: the system
    /// principal may read, write and rotate every path.
    #[must_use]
    pub fn system_rotation() -> Self {
        Self::new("")
            .allow_principals([SYSTEM_PRINCIPAL])
            .allow_actions([Action::Read, Action::Write, Action::Rotate])
    }

    /// Checks if the policy has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Utc::now() > exp)
    }

    /// Returns true if `path` lies inside this policy's scope.
    #[must_use]
    pub fn covers(&self, path: &str) -> bool {
        let scope = self.path_scope.trim_end_matches('/');
        scope.is_empty()
            || path == scope
            || path
                .strip_prefix(scope)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Returns true if the policy grants `action` to `requester`,
    /// ignoring scope.
    #[must_use]
    pub fn grants(&self, requester: &Requester, action: Action) -> bool {
        if self.is_expired() || !self.actions.contains(&action) {
            return false;
        }
        self.principals.contains(Self::ANY_PRINCIPAL)
            || self.principals.contains(&requester.id)
            || requester.roles.iter().any(|r| self.roles.contains(r))
    }
}

/// Whether rotation runs on a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationType {
    /// The scheduler rotates the secret every `interval_days`.
    Automatic,
    /// Rotation only happens when requested.
    Manual,
}

/// How a rotated value is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationType {
    /// Random string over the configured charset and length.
    Password,
    /// Random alphanumeric string of fixed length.
    ApiKey,
    /// Certificate issued by a CA integration.
    Certificate,
    /// Caller-supplied generator.
    Custom,
}

impl GenerationType {
    /// Returns the generation type name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::ApiKey => "api_key",
            Self::Certificate => "certificate",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for GenerationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Longest rotation interval a policy may use (about a century).
pub const MAX_INTERVAL_DAYS: u32 = 36_500;

/// Rotation policy for a secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationPolicy {
    /// Scheduled or on-demand.
    #[serde(rename = "type")]
    pub rotation_type: RotationType,
    /// Days between rotations (at least 1).
    pub interval_days: u32,
    /// How new values are produced.
    pub generation_type: GenerationType,
    /// Days before the due date to announce an upcoming rotation.
    #[serde(default)]
    pub notify_before_days: u32,
    /// Retries after a failed scheduled rotation.
    #[serde(default = "RotationPolicy::default_max_retries")]
    pub max_retries: u32,
    /// Growth factor between retry delays.
    #[serde(default = "RotationPolicy::default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl RotationPolicy {
    const fn default_max_retries() -> u32 {
        3
    }

    const fn default_backoff_multiplier() -> f64 {
        2.0
    }

    /// Creates an automatic policy.
    #[must_use]
    pub const fn automatic(interval_days: u32, generation_type: GenerationType) -> Self {
        Self {
            rotation_type: RotationType::Automatic,
            interval_days,
            generation_type,
            notify_before_days: 0,
            max_retries: Self::default_max_retries(),
            backoff_multiplier: Self::default_backoff_multiplier(),
        }
    }

    /// Creates a manual policy. The interval is informational only.
    #[must_use]
    pub const fn manual(generation_type: GenerationType) -> Self {
        Self {
            rotation_type: RotationType::Manual,
            interval_days: 30,
            generation_type,
            notify_before_days: 0,
            max_retries: Self::default_max_retries(),
            backoff_multiplier: Self::default_backoff_multiplier(),
        }
    }

    /// Sets how many days ahead an upcoming rotation is announced.
    #[must_use]
    pub const fn with_notify_before(mut self, days: u32) -> Self {
        self.notify_before_days = days;
        self
    }

    /// Sets the retry behavior for failed scheduled rotations.
    #[must_use]
    pub const fn with_retries(mut self, max_retries: u32, backoff_multiplier: f64) -> Self {
        self.max_retries = max_retries;
        self.backoff_multiplier = backoff_multiplier;
        self
    }

    /// Returns true if the scheduler owns this secret's rotation.
    #[must_use]
    pub fn is_automatic(&self) -> bool {
        self.rotation_type == RotationType::Automatic
    }

    /// Returns the rotation interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::days(i64::from(self.interval_days))
    }

    /// Returns when a rotation one interval after `from` is due.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the date is out of range.
    pub fn next_after(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
        from.checked_add_signed(self.interval()).ok_or_else(|| {
            Error::validation(format!(
                "rotation interval of {} days is out of range",
                self.interval_days
            ))
        })
    }

    /// Validates the policy against a configured minimum interval.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the policy is malformed.
    pub fn validate(&self, min_interval_days: u32) -> Result<()> {
        let min = min_interval_days.max(1);
        if self.interval_days < min {
            return Err(Error::validation(format!(
                "rotation interval must be at least {min} day(s), got {}",
                self.interval_days
            )));
        }
        if self.interval_days > MAX_INTERVAL_DAYS {
            return Err(Error::validation(format!(
                "rotation interval must be at most {MAX_INTERVAL_DAYS} days, got {}",
                self.interval_days
            )));
        }
        if self.notify_before_days > self.interval_days {
            return Err(Error::validation(
                "notify_before_days cannot exceed interval_days",
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(Error::validation(format!(
                "backoff multiplier must be a finite number >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }
}

/// Metadata about a secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretMetadata {
    /// Path of the secret.
    pub path: SecretPath,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Arbitrary tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Who created the secret.
    pub created_by: String,
    /// When the secret was created.
    pub created_at: DateTime<Utc>,
    /// Who last changed the secret.
    pub updated_by: String,
    /// When the secret was last changed.
    pub updated_at: DateTime<Utc>,
    /// The current version, starting at 1.
    pub version: u32,
    /// Rotation policy, if any.
    #[serde(default)]
    pub rotation_policy: Option<RotationPolicy>,
    /// Access policy attached to this secret, if any.
    #[serde(default)]
    pub access_policy: Option<AccessPolicy>,
    /// Whether stored values are ciphertext.
    pub encrypted: bool,
    /// Backend holding the secret.
    pub provider: ProviderKind,
}

impl SecretMetadata {
    /// Creates version-1 metadata with the current timestamp.
    #[must_use]
    pub fn new(
        path: SecretPath,
        provider: ProviderKind,
        created_by: impl Into<String>,
        encrypted: bool,
    ) -> Self {
        let now = Utc::now();
        let created_by = created_by.into();
        Self {
            path,
            description: None,
            tags: BTreeMap::new(),
            updated_by: created_by.clone(),
            created_by,
            created_at: now,
            updated_at: now,
            version: 1,
            rotation_policy: None,
            access_policy: None,
            encrypted,
            provider,
        }
    }

    /// Increments the version and records who changed it.
    pub fn bump_version(&mut self, updated_by: impl Into<String>) {
        self.version += 1;
        self.updated_by = updated_by.into();
        self.updated_at = Utc::now();
    }

    /// Returns true if every `(key, value)` in `tags` is present.
    #[must_use]
    pub fn matches_tags(&self, tags: &BTreeMap<String, String>) -> bool {
        tags.iter().all(|(k, v)| self.tags.get(k) == Some(v))
    }
}

/// An immutable, numbered snapshot of a secret's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretVersion {
    /// Version number, starting at 1.
    pub version: u32,
    /// Value of this version (ciphertext when persisted).
    pub value: SecretValue,
    /// When the version was created.
    pub created_at: DateTime<Utc>,
    /// Who created the version.
    pub created_by: String,
    /// Whether this is the current version.
    pub active: bool,
}

/// A secret with its metadata and version history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    /// Generated identifier.
    pub id: SecretId,
    /// Path of the secret.
    pub path: SecretPath,
    /// Value of the requested (or current) version.
    pub value: SecretValue,
    /// Current metadata.
    pub metadata: SecretMetadata,
    /// Every version, oldest first.
    #[serde(default)]
    pub versions: Vec<SecretVersion>,
}

impl Secret {
    /// Returns the version with the given number.
    #[must_use]
    pub fn version(&self, version: u32) -> Option<&SecretVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    /// Returns the active version.
    #[must_use]
    pub fn active_version(&self) -> Option<&SecretVersion> {
        self.versions.iter().find(|v| v.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    // ===================
    // SecretPath Tests
    // ===================

    #[test_case("database/production/main" ; "nested path")]
    #[test_case("api-keys/github" ; "hyphenated segment")]
    #[test_case("a" ; "single char")]
    #[test_case("Service_A/KEY-1" ; "mixed case and underscore")]
    fn secret_path_valid(input: &str) {
        let path = SecretPath::new(input).expect("should be valid");
        assert_eq!(path.as_str(), input);
    }

    #[test_case("" ; "empty string")]
    #[test_case("/leading" ; "leading slash")]
    #[test_case("trailing/" ; "trailing slash")]
    #[test_case("a/../b" ; "parent traversal")]
    #[test_case("a//b" ; "empty segment")]
    #[test_case("my secret" ; "contains space")]
    #[test_case("a.b" ; "contains period")]
    #[test_case("a:b" ; "contains colon")]
    fn secret_path_invalid(input: &str) {
        let result = SecretPath::new(input);
        assert!(
            matches!(result, Err(Error::Validation { .. })),
            "expected '{input}' to be invalid"
        );
    }

    #[test]
    fn secret_path_length_bounds() {
        let max = "a".repeat(SecretPath::MAX_LENGTH);
        assert!(SecretPath::new(max).is_ok());
        let too_long = "a".repeat(SecretPath::MAX_LENGTH + 1);
        assert!(SecretPath::new(too_long).is_err());
    }

    #[test]
    fn secret_path_serde_rejects_invalid() {
        let result: std::result::Result<SecretPath, _> = serde_json::from_str(r#""/bad/""#);
        assert!(result.is_err());

        let ok: SecretPath = serde_json::from_str(r#""a/b""#).expect("deserialize");
        assert_eq!(ok.as_str(), "a/b");
    }

    #[test]
    fn secret_path_provider_prefix() {
        let path = SecretPath::new("aws/payments/stripe").expect("valid");
        assert_eq!(path.provider_prefix(), Some(ProviderKind::Aws));

        let path = SecretPath::new("vaultish/x").expect("valid");
        assert_eq!(path.provider_prefix(), None);

        let path = SecretPath::new("vault").expect("valid");
        assert_eq!(path.provider_prefix(), None);
    }

    proptest! {
        #[test]
        fn prop_generated_paths_validate(
            segments in proptest::collection::vec("[a-zA-Z0-9_-]{1,12}", 1..6),
        ) {
            let path = segments.join("/");
            prop_assert!(SecretPath::new(path).is_ok());
        }

        #[test]
        fn prop_paths_with_dots_never_validate(
            head in "[a-z]{1,8}",
            tail in "[a-z]{1,8}",
        ) {
            let path = format!("{head}.{tail}");
            prop_assert!(SecretPath::new(path).is_err());
        }
    }

    // ===================
    // SecretId Tests
    // ===================

    #[test]
    fn secret_id_parse_roundtrip() {
        let id = SecretId::generate();
        let parsed: SecretId = id.to_string().parse().expect("parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn secret_id_parse_rejects_garbage() {
        assert!("not-a-uuid".parse::<SecretId>().is_err());
    }

    // ===================
    // SecretValue Tests
    // ===================

    #[test]
    fn secret_value_debug_redacts_data() {
        let value = SecretValue::new("hunter2");
        let debug_str = format!("{value:?}");
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("hunter2"));
    }

    #[test]
    fn secret_value_into_inner() {
        let value = SecretValue::new("abc");
        assert_eq!(value.len(), 3);
        assert_eq!(value.into_inner(), "abc");
    }

    #[test]
    fn secret_value_equality() {
        assert_eq!(SecretValue::from("x1"), SecretValue::from("x1"));
        assert_ne!(SecretValue::from("x1"), SecretValue::from("x2"));
        assert_ne!(SecretValue::from("x1"), SecretValue::from("x10"));
    }

    #[test]
    fn secret_value_serializes_transparently() {
        let json = serde_json::to_string(&SecretValue::new("v")).expect("serialize");
        assert_eq!(json, r#""v""#);
    }

    // ===================
    // ProviderKind Tests
    // ===================

    #[test]
    fn provider_kind_parse_and_display() {
        for kind in ProviderKind::ALL {
            let parsed: ProviderKind = kind.as_str().parse().expect("parse");
            assert_eq!(parsed, kind);
            assert_eq!(kind.to_string(), kind.as_str());
        }
        assert!("gcp".parse::<ProviderKind>().is_err());
    }

    // ===================
    // AccessPolicy Tests
    // ===================

    #[test]
    fn access_policy_scope_coverage() {
        let policy = AccessPolicy::new("database/production");
        assert!(policy.covers("database/production"));
        assert!(policy.covers("database/production/main"));
        assert!(!policy.covers("database/production-old"));
        assert!(!policy.covers("database"));
        assert!(!policy.covers(""));

        let root = AccessPolicy::new("");
        assert!(root.covers(""));
        assert!(root.covers("anything/below"));

        let trailing = AccessPolicy::new("database/");
        assert!(trailing.covers("database/x"));
    }

    #[test]
    fn access_policy_grants_principal_and_role() {
        let policy = AccessPolicy::new("app")
            .allow_principals(["alice"])
            .allow_roles(["ops"])
            .allow_actions([Action::Read]);

        assert!(policy.grants(&Requester::new("alice"), Action::Read));
        assert!(!policy.grants(&Requester::new("alice"), Action::Write));
        assert!(policy.grants(&Requester::new("bob").with_role("ops"), Action::Read));
        assert!(!policy.grants(&Requester::new("bob"), Action::Read));
    }

    #[test]
    fn access_policy_wildcard_principal() {
        let policy = AccessPolicy::new("")
            .allow_principals([AccessPolicy::ANY_PRINCIPAL])
            .allow_actions([Action::List]);
        assert!(policy.grants(&Requester::new("anyone"), Action::List));
    }

    #[test]
    fn access_policy_expiry() {
        let past = Utc::now() - Duration::hours(1);
        let policy = AccessPolicy::new("")
            .allow_principals(["alice"])
            .allow_actions([Action::Read])
            .with_expiry(past);
        assert!(policy.is_expired());
        assert!(!policy.grants(&Requester::new("alice"), Action::Read));
    }

    #[test]
    fn system_rotation_policy_grants_system_only() {
        let policy = AccessPolicy::system_rotation();
        assert!(policy.grants(&Requester::system(), Action::Rotate));
        assert!(policy.grants(&Requester::system(), Action::Write));
        assert!(!policy.grants(&Requester::system(), Action::Delete));
        assert!(!policy.grants(&Requester::new("alice"), Action::Rotate));
    }

    // ===================
    // RotationPolicy Tests
    // ===================

    #[test]
    fn rotation_policy_validation() {
        let policy = RotationPolicy::automatic(30, GenerationType::ApiKey);
        assert!(policy.validate(1).is_ok());
        assert!(policy.validate(31).is_err());

        let zero = RotationPolicy::automatic(0, GenerationType::Password);
        assert!(zero.validate(0).is_err());

        let bad_backoff =
            RotationPolicy::automatic(7, GenerationType::Password).with_retries(3, 0.5);
        assert!(bad_backoff.validate(1).is_err());

        let nan_backoff =
            RotationPolicy::automatic(7, GenerationType::Password).with_retries(3, f64::NAN);
        assert!(nan_backoff.validate(1).is_err());

        let late_notice =
            RotationPolicy::automatic(7, GenerationType::Password).with_notify_before(8);
        assert!(late_notice.validate(1).is_err());
    }

    #[test_case(MAX_INTERVAL_DAYS, true ; "at the cap")]
    #[test_case(MAX_INTERVAL_DAYS + 1, false ; "just over the cap")]
    #[test_case(100_000_000, false ; "far beyond representable dates")]
    #[test_case(u32::MAX, false ; "max u32")]
    fn rotation_interval_upper_bound(interval_days: u32, valid: bool) {
        let policy = RotationPolicy::automatic(interval_days, GenerationType::ApiKey);
        let result = policy.validate(1);
        assert_eq!(result.is_ok(), valid);
        if !valid {
            assert!(matches!(result, Err(Error::Validation { .. })));
        }
    }

    #[test]
    fn next_after_reports_overflow_instead_of_panicking() {
        let policy = RotationPolicy::automatic(30, GenerationType::ApiKey);
        let now = Utc::now();
        assert_eq!(policy.next_after(now).expect("in range"), now + Duration::days(30));

        let huge = RotationPolicy::automatic(u32::MAX, GenerationType::ApiKey);
        assert!(matches!(
            huge.next_after(DateTime::<Utc>::MAX_UTC),
            Err(Error::Validation { .. })
        ));
        assert!(huge.next_after(now).is_err());
    }

    #[test]
    fn rotation_policy_serde_uses_type_field() {
        let policy = RotationPolicy::automatic(30, GenerationType::ApiKey);
        let value = serde_json::to_value(&policy).expect("serialize");
        assert_eq!(value["type"], "automatic");
        assert_eq!(value["generation_type"], "api_key");

        let parsed: RotationPolicy = serde_json::from_str(
            r#"{"type":"manual","interval_days":14,"generation_type":"password"}"#,
        )
        .expect("deserialize");
        assert!(!parsed.is_automatic());
        assert_eq!(parsed.max_retries, 3);
        assert!((parsed.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }

    // ===================
    // SecretMetadata Tests
    // ===================

    #[test]
    fn secret_metadata_new_starts_at_version_one() {
        let path = SecretPath::new("a/b").expect("valid");
        let meta = SecretMetadata::new(path, ProviderKind::Vault, "alice", true);
        assert_eq!(meta.version, 1);
        assert_eq!(meta.created_by, "alice");
        assert_eq!(meta.updated_by, "alice");
        assert!(meta.encrypted);
    }

    #[test]
    fn secret_metadata_bump_version() {
        let path = SecretPath::new("a/b").expect("valid");
        let mut meta = SecretMetadata::new(path, ProviderKind::Vault, "alice", true);
        let original_updated = meta.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(5));

        meta.bump_version("bob");

        assert_eq!(meta.version, 2);
        assert_eq!(meta.updated_by, "bob");
        assert_eq!(meta.created_by, "alice");
        assert!(meta.updated_at > original_updated);
    }

    #[test]
    fn secret_metadata_matches_tags() {
        let path = SecretPath::new("a/b").expect("valid");
        let mut meta = SecretMetadata::new(path, ProviderKind::Vault, "alice", true);
        meta.tags.insert("env".into(), "prod".into());
        meta.tags.insert("team".into(), "payments".into());

        let mut wanted = BTreeMap::new();
        assert!(meta.matches_tags(&wanted));
        wanted.insert("env".to_string(), "prod".to_string());
        assert!(meta.matches_tags(&wanted));
        wanted.insert("team".to_string(), "search".to_string());
        assert!(!meta.matches_tags(&wanted));
    }
}
