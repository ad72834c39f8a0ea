//! Secrets manager configuration.
//!
//! Every section has defaults, so a partial JSON document (or an empty one)
//! deserializes into a usable configuration. Call
//! [`ManagerConfig::validate`] before building a manager from it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{AccessPolicy, ProviderKind};

/// Default characters used for generated passwords.
pub const DEFAULT_PASSWORD_CHARSET: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*()-_=+[]{}";

/// Encryption-at-rest settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Whether values are encrypted before reaching a provider.
    pub enabled: bool,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Secret cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether decrypted secrets are cached.
    pub enabled: bool,
    /// Lifetime of a cache entry.
    pub ttl_seconds: u64,
    /// Maximum number of cached entries.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 300,
            max_entries: 10_000,
        }
    }
}

impl CacheConfig {
    /// Returns the entry lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Rotation scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    /// Smallest `interval_days` a rotation policy may use.
    pub min_interval_days: u32,
    /// How often the scheduler looks for due rotations.
    pub poll_interval_ms: u64,
    /// Delay before the first retry of a failed rotation.
    pub retry_base_delay_ms: u64,
    /// Upper bound on any retry delay.
    pub max_backoff_ms: u64,
    /// Rotations the background sweep runs at once.
    pub max_concurrent_rotations: usize,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            min_interval_days: 1,
            poll_interval_ms: 60_000,
            retry_base_delay_ms: 1_000,
            max_backoff_ms: 300_000,
            max_concurrent_rotations: 16,
        }
    }
}

impl RotationConfig {
    /// Returns the sweep period.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the first retry delay.
    #[must_use]
    pub const fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Returns the retry delay cap.
    #[must_use]
    pub const fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Audit trail settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Consecutive sink failures before audit health reports degraded.
    pub degraded_after_failures: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            degraded_after_failures: claw_audit::DEFAULT_DEGRADED_AFTER,
        }
    }
}

/// Base access policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Policies evaluated for every request.
    pub policies: Vec<AccessPolicy>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            policies: vec![AccessPolicy::system_rotation()],
        }
    }
}

/// Generated value settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Length of generated passwords.
    pub password_length: usize,
    /// Characters generated passwords are drawn from.
    pub password_charset: String,
    /// Length of generated API keys.
    pub api_key_length: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            password_length: 32,
            password_charset: DEFAULT_PASSWORD_CHARSET.to_string(),
            api_key_length: 40,
        }
    }
}

/// Configuration for a [`SecretsManager`](crate::SecretsManager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Provider used for paths without a provider prefix.
    pub default_provider: ProviderKind,
    /// Encryption at rest.
    pub encryption: EncryptionConfig,
    /// Decrypted-secret cache.
    pub cache: CacheConfig,
    /// Rotation scheduling.
    pub rotation: RotationConfig,
    /// Audit trail.
    pub audit: AuditConfig,
    /// Access control.
    pub access: AccessConfig,
    /// Value generation for rotations.
    pub generator: GeneratorConfig,
    /// Largest accepted value, in bytes.
    pub max_secret_size: usize,
    /// Bound on each provider call.
    pub provider_timeout_ms: u64,
    /// Extra attempts for failed idempotent provider reads.
    pub read_retries: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_provider: ProviderKind::Vault,
            encryption: EncryptionConfig::default(),
            cache: CacheConfig::default(),
            rotation: RotationConfig::default(),
            audit: AuditConfig::default(),
            access: AccessConfig::default(),
            generator: GeneratorConfig::default(),
            max_secret_size: 64 * 1024,
            provider_timeout_ms: 5_000,
            read_retries: 2,
        }
    }
}

impl ManagerConfig {
    /// Parses a configuration from JSON and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] for malformed JSON and
    /// [`Error::Config`] for invalid values.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the provider call bound.
    #[must_use]
    pub const fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    /// Checks that every setting is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(Error::Config {
                reason: reason.to_string(),
            })
        };

        if self.max_secret_size == 0 {
            return invalid("max_secret_size must be greater than zero");
        }
        if self.provider_timeout_ms == 0 {
            return invalid("provider_timeout_ms must be greater than zero");
        }
        if self.cache.enabled && self.cache.ttl_seconds == 0 {
            return invalid("cache.ttl_seconds must be greater than zero when the cache is enabled");
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            return invalid("cache.max_entries must be greater than zero when the cache is enabled");
        }
        if self.rotation.min_interval_days == 0 {
            return invalid("rotation.min_interval_days must be at least 1");
        }
        if self.rotation.poll_interval_ms == 0 {
            return invalid("rotation.poll_interval_ms must be greater than zero");
        }
        if self.rotation.max_concurrent_rotations == 0 {
            return invalid("rotation.max_concurrent_rotations must be at least 1");
        }
        if self.rotation.max_backoff_ms < self.rotation.retry_base_delay_ms {
            return invalid("rotation.max_backoff_ms must not be below rotation.retry_base_delay_ms");
        }
        if self.audit.degraded_after_failures == 0 {
            return invalid("audit.degraded_after_failures must be at least 1");
        }
        if self.generator.password_length == 0 || self.generator.api_key_length == 0 {
            return invalid("generated value lengths must be greater than zero");
        }
        if self.generator.password_charset.is_empty() {
            return invalid("generator.password_charset must not be empty");
        }
        Ok(())
    }
}
