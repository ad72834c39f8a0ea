//! # Claw Secrets
//!
//! Secret lifecycle orchestration for Clawbernetes:
//!
//! - **Provider abstraction**: one contract over Vault-, AWS- and Azure-style
//!   backends, selected by path prefix or a configured default
//! - **Versioning**: every update or rotation adds exactly one version;
//!   history is never overwritten
//! - **Encrypted at rest**: ChaCha20-Poly1305 with per-path derived keys and a
//!   rotatable key ring
//! - **Access control**: deny-by-default policies over read, write, delete,
//!   rotate and list
//! - **Rotation**: a background scheduler with retries and backoff
//! - **Caching**: bounded TTL cache of decrypted values, invalidated on every
//!   mutation
//! - **Audit**: one event per attempt, successful or not, via `claw-audit`
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use claw_secrets::{
//!     AccessPolicy, Action, ManagerConfig, MemoryProvider, ProviderKind, Requester,
//!     SecretRequest, SecretsManager,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> claw_secrets::Result<()> {
//! let mut config = ManagerConfig::default();
//! config.access.policies.push(
//!     AccessPolicy::new("database")
//!         .allow_principals(["alice"])
//!         .allow_actions([Action::Read, Action::Write]),
//! );
//!
//! let manager = SecretsManager::builder(config)
//!     .with_provider(Arc::new(MemoryProvider::new(ProviderKind::Vault)))
//!     .build()?;
//!
//! let alice = Requester::new("alice");
//! manager
//!     .store_secret(SecretRequest::new("database/production/main", "hunter2", alice.clone()))
//!     .await?;
//!
//! let secret = manager.get_secret("database/production/main", &alice, None).await?;
//! assert_eq!(secret.value.expose(), "hunter2");
//! assert_eq!(secret.metadata.version, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Considerations
//!
//! - Secret values use `zeroize` to clear memory on drop
//! - Constant-time comparison is used for secret values
//! - Debug output for secrets is redacted
//! - Access is decided before anything is fetched or decrypted, so a denial
//!   never reveals whether a path exists

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod access;
pub mod cache;
pub mod config;
pub mod encryption;
pub mod error;
pub mod generator;
pub mod locks;
pub mod manager;
pub mod provider;
pub mod request;
pub mod scheduler;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use types::{
    AccessPolicy, Action, GenerationType, MAX_INTERVAL_DAYS, ProviderKind, Requester,
    RotationPolicy, RotationType, SYSTEM_PRINCIPAL, Secret, SecretId, SecretMetadata, SecretPath,
    SecretValue, SecretVersion,
};

pub use access::AccessController;
pub use cache::SecretCache;
pub use config::ManagerConfig;
pub use encryption::{EncryptionService, SecretKey};
pub use generator::{CustomGenerator, ValueGenerator};
pub use manager::{
    ANONYMOUS_REQUESTER, HealthReport, ProviderHealth, SecretsManager, SecretsManagerBuilder,
};
pub use provider::{
    ListPage, ListQuery, MemoryProvider, ProviderRegistry, SecretProvider, StoreOptions,
    StoreReceipt,
};
pub use request::{
    ListFilters, ListResponse, PolicyUpdate, RotationOutcome, SecretRequest, SecretResponse,
    UpdateOptions,
};
pub use scheduler::{RotationEvent, RotationExecutor, RotationJob, RotationScheduler, SchedulerConfig};

pub use claw_audit::{AuditEvent, AuditEventType, AuditHealth, AuditSink};
