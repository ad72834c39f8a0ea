//! The secrets orchestrator.
//!
//! [`SecretsManager`] is the only component with a full view of a secret's
//! lifecycle. Every public operation runs the same pipeline: validate the
//! input, ask the [`AccessController`], consult the cache, call the owning
//! provider under a timeout, transform through the [`EncryptionService`],
//! and append one audit event whether the operation succeeded or not.
//!
//! Mutations of a path are serialized by [`PathLocks`]; the provider's
//! conditional write catches anything that slips past them. Rotation is an
//! update with a generated value, so scheduled and manual rotations share the
//! versioning and invalidation path of user updates.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::Utc;
use claw_audit::{
    AuditEvent, AuditEventType, AuditHealth, AuditLogger, AuditSink, EventMetadata,
    TracingAuditSink,
};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::access::AccessController;
use crate::cache::SecretCache;
use crate::config::ManagerConfig;
use crate::encryption::EncryptionService;
use crate::error::{Error, ErrorKind, Result};
use crate::generator::{CustomGenerator, ValueGenerator};
use crate::locks::PathLocks;
use crate::provider::{
    ListQuery, ProviderFuture, ProviderRegistry, SecretProvider, StoreOptions,
};
use crate::request::{
    ListFilters, ListResponse, PolicyUpdate, RotationOutcome, SecretRequest, SecretResponse,
    UpdateOptions,
};
use crate::scheduler::{RotationExecutor, RotationScheduler, SchedulerConfig};
use crate::types::{
    Action, ProviderKind, Requester, Secret, SecretId, SecretMetadata, SecretPath, SecretValue,
};

/// Delay before the first retry of a failed provider read; doubles per retry.
const READ_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Marker appended to a description by rotation.
const ROTATED_MARKER: &str = " (rotated at ";

/// Audit requester for attempts made without a requester id.
pub const ANONYMOUS_REQUESTER: &str = "<anonymous>";

/// Health of one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderHealth {
    /// Which provider.
    pub provider: ProviderKind,
    /// Whether its health check passed in time.
    pub healthy: bool,
    /// Failure message when unhealthy.
    pub error: Option<String>,
}

/// Aggregated health of the manager and its collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    /// One entry per registered provider.
    pub providers: Vec<ProviderHealth>,
    /// Audit trail health.
    pub audit: AuditHealth,
    /// Whether the background rotation sweep is running.
    pub scheduler_running: bool,
}

impl HealthReport {
    /// Returns true if every provider and the audit trail are healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.providers.iter().all(|p| p.healthy) && self.audit.is_healthy()
    }
}

/// Builder for [`SecretsManager`].
pub struct SecretsManagerBuilder {
    config: ManagerConfig,
    providers: Vec<Arc<dyn SecretProvider>>,
    encryption: Option<Arc<EncryptionService>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    custom_generator: Option<CustomGenerator>,
}

impl SecretsManagerBuilder {
    /// Registers a provider under the kind it reports.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn SecretProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Uses an existing encryption service instead of generating a key.
    #[must_use]
    pub fn with_encryption(mut self, encryption: Arc<EncryptionService>) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// Sets where audit events go. Defaults to [`TracingAuditSink`].
    #[must_use]
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    /// Installs the generator used by custom rotation policies.
    #[must_use]
    pub fn with_custom_generator(mut self, generator: CustomGenerator) -> Self {
        self.custom_generator = Some(generator);
        self
    }

    /// Builds the manager.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid or the
    /// default provider is not registered.
    pub fn build(self) -> Result<SecretsManager> {
        self.config.validate()?;

        let mut providers = ProviderRegistry::new(self.config.default_provider);
        for provider in self.providers {
            providers.register(provider);
        }
        providers.require(self.config.default_provider)?;

        let encryption = self
            .encryption
            .unwrap_or_else(|| Arc::new(EncryptionService::generate()));
        let sink = self
            .audit_sink
            .unwrap_or_else(|| Arc::new(TracingAuditSink::new()));
        let cache = if self.config.cache.enabled {
            SecretCache::new(self.config.cache.ttl(), self.config.cache.max_entries)
        } else {
            SecretCache::disabled()
        };
        cache.sync_key_epoch(encryption.key_version());

        let mut generator = ValueGenerator::new(self.config.generator.clone());
        if let Some(custom) = self.custom_generator {
            generator = generator.with_custom(custom);
        }

        info!(
            default_provider = %self.config.default_provider,
            providers = providers.all().len(),
            encryption = self.config.encryption.enabled,
            cache = self.config.cache.enabled,
            "secrets manager initialized"
        );

        Ok(SecretsManager {
            access: AccessController::new(self.config.access.policies.clone()),
            audit: AuditLogger::with_threshold(sink, self.config.audit.degraded_after_failures),
            scheduler: Arc::new(RotationScheduler::new(SchedulerConfig::from(
                &self.config.rotation,
            ))),
            locks: PathLocks::new(),
            config: self.config,
            providers,
            encryption,
            cache,
            generator,
        })
    }
}

/// Orchestrates secret storage, retrieval, rotation and deletion across
/// providers.
pub struct SecretsManager {
    config: ManagerConfig,
    providers: ProviderRegistry,
    encryption: Arc<EncryptionService>,
    access: AccessController,
    audit: AuditLogger,
    cache: SecretCache,
    scheduler: Arc<RotationScheduler>,
    generator: ValueGenerator,
    locks: PathLocks,
}

impl SecretsManager {
    /// Starts building a manager from `config`.
    #[must_use]
    pub fn builder(config: ManagerConfig) -> SecretsManagerBuilder {
        SecretsManagerBuilder {
            config,
            providers: Vec::new(),
            encryption: None,
            audit_sink: None,
            custom_generator: None,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Returns the provider registry.
    #[must_use]
    pub const fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Returns the access controller.
    #[must_use]
    pub const fn access_controller(&self) -> &AccessController {
        &self.access
    }

    /// Returns the encryption service.
    #[must_use]
    pub const fn encryption(&self) -> &Arc<EncryptionService> {
        &self.encryption
    }

    /// Returns the secret cache.
    #[must_use]
    pub const fn cache(&self) -> &SecretCache {
        &self.cache
    }

    /// Returns the rotation scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &Arc<RotationScheduler> {
        &self.scheduler
    }

    /// Returns the audit logger.
    #[must_use]
    pub const fn audit_logger(&self) -> &AuditLogger {
        &self.audit
    }

    // ------------------------------------------------------------------
    // Public operations
    // ------------------------------------------------------------------

    /// Stores a new secret at `request.path`.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for a malformed path, value or policy
    /// - [`Error::AccessDenied`] without write access
    /// - [`Error::AlreadyExists`] if the path is occupied
    /// - [`Error::Provider`] / [`Error::ProviderTimeout`] on backend failure
    pub async fn store_secret(&self, request: SecretRequest) -> Result<SecretResponse> {
        let started = Instant::now();
        let mut details = EventMetadata::new();
        let result = self.store_inner(&request, &mut details).await;
        self.record(
            AuditEventType::SecretStored,
            &request.path,
            &request.requester,
            started,
            details,
            result.as_ref().err(),
        );
        result
    }

    /// Reads the secret at `path`, the current version unless `version` is given.
    ///
    /// Values of every version are returned decrypted.
    ///
    /// # Errors
    ///
    /// - [`Error::AccessDenied`] without read access (even if nothing exists)
    /// - [`Error::NotFound`] if no provider has the path or version
    /// - [`Error::Encryption`] if a stored ciphertext fails authentication
    pub async fn get_secret(
        &self,
        path: &str,
        requester: &Requester,
        version: Option<u32>,
    ) -> Result<Secret> {
        let started = Instant::now();
        let mut details = EventMetadata::new();
        if let Some(version) = version {
            details.insert("requested_version".to_string(), json!(version));
        }
        let result = self.get_inner(path, requester, version, &mut details).await;
        self.record(
            AuditEventType::SecretAccessed,
            path,
            requester,
            started,
            details,
            result.as_ref().err(),
        );
        result
    }

    /// Writes `value` as the next version of the secret at `path`.
    ///
    /// Returns the new version number.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for a malformed path, value or policy
    /// - [`Error::AccessDenied`] without write access
    /// - [`Error::NotFound`] if the secret does not exist
    /// - [`Error::VersionConflict`] if a concurrent writer won
    pub async fn update_secret(
        &self,
        path: &str,
        value: SecretValue,
        requester: &Requester,
        options: UpdateOptions,
    ) -> Result<u32> {
        let started = Instant::now();
        let mut details = EventMetadata::new();
        let result = self
            .update_inner(path, &value, requester, options, &mut details)
            .await;
        self.record(
            AuditEventType::SecretUpdated,
            path,
            requester,
            started,
            details,
            result.as_ref().err(),
        );
        result
    }

    /// Deletes the secret at `path` with its whole history.
    ///
    /// # Errors
    ///
    /// - [`Error::AccessDenied`] without delete access
    /// - [`Error::NotFound`] if nothing exists at `path`
    pub async fn delete_secret(&self, path: &str, requester: &Requester) -> Result<()> {
        let started = Instant::now();
        let mut details = EventMetadata::new();
        let result = self.delete_inner(path, requester, &mut details).await;
        self.record(
            AuditEventType::SecretDeleted,
            path,
            requester,
            started,
            details,
            result.as_ref().err(),
        );
        result
    }

    /// Replaces the value of secret `secret_id` with one generated from its
    /// rotation policy.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if no provider knows the id
    /// - [`Error::AccessDenied`] without rotate access
    /// - [`Error::PolicyMissing`] if the secret has no rotation policy
    /// - [`Error::NotImplemented`] for unsupported generation types
    pub async fn rotate_secret(
        &self,
        secret_id: &SecretId,
        requester: &Requester,
    ) -> Result<RotationOutcome> {
        let started = Instant::now();
        let mut details = EventMetadata::new();
        details.insert("secret_id".to_string(), json!(secret_id.to_string()));
        let mut path = String::new();
        let result = self
            .rotate_inner(secret_id, requester, &mut path, &mut details)
            .await;
        self.record(
            AuditEventType::SecretRotated,
            &path,
            requester,
            started,
            details,
            result.as_ref().err(),
        );
        result
    }

    /// Lists metadata of the secrets `requester` may read.
    ///
    /// Items the requester cannot read are dropped silently; `total` and
    /// `has_more` count only visible items.
    ///
    /// # Errors
    ///
    /// - [`Error::AccessDenied`] without list access on the prefix
    /// - [`Error::Provider`] / [`Error::ProviderTimeout`] on backend failure
    pub async fn list_secrets(
        &self,
        requester: &Requester,
        filters: ListFilters,
    ) -> Result<ListResponse> {
        let started = Instant::now();
        let mut details = EventMetadata::new();
        let prefix = filters.prefix.clone().unwrap_or_default();
        let result = self.list_inner(requester, filters, &mut details).await;
        self.record(
            AuditEventType::SecretsListed,
            &prefix,
            requester,
            started,
            details,
            result.as_ref().err(),
        );
        result
    }

    /// Rotates the encryption key ring and flushes the cache.
    ///
    /// Returns the new key version. Existing ciphertexts stay readable.
    pub fn rotate_encryption_key(&self) -> u32 {
        let version = self.encryption.rotate_key();
        let flushed = self.cache.clear();
        self.cache.sync_key_epoch(version);
        info!(key_version = version, flushed, "cache flushed for new encryption key");
        version
    }

    /// Rebuilds the rotation schedule from provider metadata.
    ///
    /// Each secret with an automatic policy is scheduled at its last update
    /// plus the policy interval. Returns the number of scheduled secrets.
    ///
    /// # Errors
    ///
    /// Returns the first provider error.
    pub async fn resync_rotations(&self) -> Result<usize> {
        let query = ListQuery::all();
        let query = &query;
        let mut scheduled = 0;
        for provider in self.providers.all() {
            let kind = provider.kind();
            let page = self.read(kind, move || provider.list_secrets(query)).await?;
            for metadata in page.secrets {
                let Some(policy) = metadata.rotation_policy.as_ref().filter(|p| p.is_automatic())
                else {
                    continue;
                };
                let path = &metadata.path;
                let secret = self.read(kind, move || provider.get_secret(path, None)).await?;
                match policy.next_after(metadata.updated_at) {
                    Ok(due) => {
                        self.scheduler.schedule_at(secret.id, policy, due);
                        scheduled += 1;
                    }
                    Err(e) => warn!(path = %path, error = %e, "rotation not rescheduled"),
                }
            }
        }
        info!(scheduled, "rotation schedule rebuilt from providers");
        Ok(scheduled)
    }

    /// Checks every provider, the audit trail and the scheduler.
    pub async fn health_check(&self) -> HealthReport {
        let mut providers = Vec::new();
        for provider in self.providers.all() {
            let kind = provider.kind();
            let result = self.timed(kind, provider.health_check()).await;
            if let Err(e) = &result {
                warn!(provider = %kind, error = %e, "provider health check failed");
            }
            providers.push(ProviderHealth {
                provider: kind,
                healthy: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            });
        }
        HealthReport {
            providers,
            audit: self.audit.health(),
            scheduler_running: self.scheduler.is_running(),
        }
    }

    /// Starts the background rotation sweep.
    ///
    /// The scheduler holds the manager weakly, so dropping the last
    /// `Arc<SecretsManager>` also ends the sweep.
    pub fn start_rotation(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let executor: Weak<dyn RotationExecutor> = weak;
        self.scheduler.start(executor);
    }

    /// Stops the scheduler and closes every provider.
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        for provider in self.providers.all() {
            let kind = provider.kind();
            if let Err(e) = self.timed(kind, provider.close()).await {
                warn!(provider = %kind, error = %e, "failed to close provider");
            }
        }
        let flushed = self.cache.clear();
        info!(flushed, "secrets manager shut down");
    }

    // ------------------------------------------------------------------
    // Operation bodies
    // ------------------------------------------------------------------

    async fn store_inner(
        &self,
        request: &SecretRequest,
        details: &mut EventMetadata,
    ) -> Result<SecretResponse> {
        validate_requester(&request.requester)?;
        let path = SecretPath::new(request.path.as_str())?;
        self.validate_value(&request.value)?;
        if let Some(policy) = &request.rotation_policy {
            policy.validate(self.config.rotation.min_interval_days)?;
        }
        self.access
            .check_access(&request.requester, Action::Write, path.as_str(), None)?;
        if let Some(policy) = &request.access_policy {
            self.access
                .check_delegation(&request.requester, path.as_str(), policy)?;
        }

        let kind = self.providers.resolve_kind(&path, request.provider)?;
        let provider = self.providers.require(kind)?;
        details.insert("provider".to_string(), json!(kind.as_str()));

        let _guard = self.locks.lock(&path).await;

        let encrypted = self.config.encryption.enabled && !request.skip_encryption;
        let mut metadata =
            SecretMetadata::new(path.clone(), kind, request.requester.id.clone(), encrypted);
        metadata.description.clone_from(&request.description);
        metadata.tags.clone_from(&request.tags);
        metadata.rotation_policy.clone_from(&request.rotation_policy);
        metadata.access_policy.clone_from(&request.access_policy);

        let stored = self.seal(&path, &request.value, encrypted)?;
        let receipt = self
            .timed(
                kind,
                provider.store_secret(&path, &stored, &metadata, StoreOptions::default()),
            )
            .await?;
        metadata.version = receipt.version;
        self.cache.invalidate(&path);

        if let Some(policy) = &metadata.rotation_policy {
            if let Some(next) = self.scheduler.schedule_rotation(receipt.id, policy)? {
                details.insert("next_rotation".to_string(), json!(next.to_rfc3339()));
            }
        }
        details.insert("secret_id".to_string(), json!(receipt.id.to_string()));
        details.insert("version".to_string(), json!(receipt.version));
        details.insert("encrypted".to_string(), json!(encrypted));
        info!(
            path = %path,
            provider = %kind,
            secret_id = %receipt.id,
            encrypted,
            "secret stored"
        );

        Ok(SecretResponse {
            success: true,
            secret_id: receipt.id,
            path: path.to_string(),
            version: receipt.version,
            metadata,
        })
    }

    async fn get_inner(
        &self,
        path: &str,
        requester: &Requester,
        version: Option<u32>,
        details: &mut EventMetadata,
    ) -> Result<Secret> {
        validate_requester(requester)?;
        let path = SecretPath::new(path)?;
        self.cache.sync_key_epoch(self.encryption.key_version());

        if let Some(hit) = self.cache.get(&path, version) {
            self.access.check_access(
                requester,
                Action::Read,
                path.as_str(),
                hit.metadata.access_policy.as_ref(),
            )?;
            debug!(path = %path, version = ?version, "secret served from cache");
            details.insert("source".to_string(), json!("cache"));
            details.insert("version".to_string(), json!(hit.metadata.version));
            return Ok(hit);
        }

        let token = self.cache.fill_token();
        let raw = self.fetch_checked(&path, version, requester, Action::Read).await?;
        let secret = self.open(raw)?;
        details.insert("source".to_string(), json!("provider"));
        details.insert("provider".to_string(), json!(secret.metadata.provider.as_str()));
        details.insert("version".to_string(), json!(secret.metadata.version));

        if self.cache.put_if_unchanged(token, &path, version, secret.clone()) {
            debug!(path = %path, version = ?version, "secret cached");
        }
        Ok(secret)
    }

    async fn update_inner(
        &self,
        path: &str,
        value: &SecretValue,
        requester: &Requester,
        options: UpdateOptions,
        details: &mut EventMetadata,
    ) -> Result<u32> {
        validate_requester(requester)?;
        let path = SecretPath::new(path)?;
        self.validate_value(value)?;
        if let PolicyUpdate::Set(policy) = &options.rotation_policy {
            policy.validate(self.config.rotation.min_interval_days)?;
        }

        let _guard = self.locks.lock(&path).await;
        let current = self.fetch_checked(&path, None, requester, Action::Write).await?;
        details.insert("previous_version".to_string(), json!(current.metadata.version));

        let metadata = self.apply_update(current, value, &requester.id, options).await?;
        details.insert("version".to_string(), json!(metadata.version));
        details.insert("provider".to_string(), json!(metadata.provider.as_str()));
        Ok(metadata.version)
    }

    async fn delete_inner(
        &self,
        path: &str,
        requester: &Requester,
        details: &mut EventMetadata,
    ) -> Result<()> {
        validate_requester(requester)?;
        let path = SecretPath::new(path)?;

        let guard = self.locks.lock(&path).await;
        let current = self.fetch_checked(&path, None, requester, Action::Delete).await?;
        let kind = current.metadata.provider;
        let provider = self.providers.require(kind)?;

        self.timed(kind, provider.delete_secret(&path)).await?;
        let cancelled = self.scheduler.cancel_rotation(&current.id);
        self.cache.invalidate(&path);
        drop(guard);
        self.locks.prune();

        details.insert("secret_id".to_string(), json!(current.id.to_string()));
        details.insert("provider".to_string(), json!(kind.as_str()));
        details.insert("versions".to_string(), json!(current.metadata.version));
        info!(path = %path, secret_id = %current.id, rotation_cancelled = cancelled, "secret deleted");
        Ok(())
    }

    async fn rotate_inner(
        &self,
        secret_id: &SecretId,
        requester: &Requester,
        audit_path: &mut String,
        details: &mut EventMetadata,
    ) -> Result<RotationOutcome> {
        validate_requester(requester)?;
        let found = self.find_by_id(secret_id).await?;
        *audit_path = found.path.to_string();

        self.access.check_access(
            requester,
            Action::Rotate,
            found.path.as_str(),
            found.metadata.access_policy.as_ref(),
        )?;
        if found.metadata.rotation_policy.is_none() {
            return Err(Error::PolicyMissing {
                id: secret_id.to_string(),
            });
        }

        let path = found.path;
        let kind = found.metadata.provider;
        let provider = self.providers.require(kind)?;
        let _guard = self.locks.lock(&path).await;

        // Re-read under the lock; the path may have changed hands meanwhile.
        let current = self.read(kind, || provider.get_secret(&path, None)).await?;
        if current.id != *secret_id {
            return Err(Error::not_found(secret_id.to_string()));
        }
        let policy = current
            .metadata
            .rotation_policy
            .clone()
            .ok_or_else(|| Error::PolicyMissing {
                id: secret_id.to_string(),
            })?;

        let new_value = self.generator.generate(policy.generation_type, &current.metadata)?;
        let old_version = current.metadata.version;
        let description =
            rotation_description(current.metadata.description.as_deref(), Utc::now());
        let options = UpdateOptions::default().with_description(description);

        let metadata = self
            .apply_update(current, &new_value, &requester.id, options)
            .await?;
        let next_rotation = self.scheduler.schedule_rotation(*secret_id, &policy)?;

        details.insert("generation_type".to_string(), json!(policy.generation_type.as_str()));
        details.insert("old_version".to_string(), json!(old_version));
        details.insert("new_version".to_string(), json!(metadata.version));
        if let Some(next) = next_rotation {
            details.insert("next_rotation".to_string(), json!(next.to_rfc3339()));
        }
        info!(
            path = %path,
            secret_id = %secret_id,
            old_version,
            new_version = metadata.version,
            "secret rotated"
        );

        Ok(RotationOutcome {
            secret_id: *secret_id,
            old_version,
            new_version: metadata.version,
            new_value,
            next_rotation,
        })
    }

    async fn list_inner(
        &self,
        requester: &Requester,
        filters: ListFilters,
        details: &mut EventMetadata,
    ) -> Result<ListResponse> {
        validate_requester(requester)?;
        let prefix = filters.prefix.clone().unwrap_or_default();
        self.access
            .check_access(requester, Action::List, &prefix, None)?;

        let providers = match filters.provider {
            Some(kind) => vec![self.providers.require(kind)?],
            None => self.providers.all(),
        };
        let query = ListQuery {
            prefix: filters.prefix.clone(),
            tags: filters.tags.clone(),
            limit: None,
            offset: 0,
        };

        let mut visible = Vec::new();
        let mut scanned = 0;
        for provider in providers {
            let query = &query;
            let page = self
                .read(provider.kind(), move || provider.list_secrets(query))
                .await?;
            scanned += page.secrets.len();
            visible.extend(page.secrets.into_iter().filter(|metadata| {
                query.matches(metadata)
                    && self.access.is_allowed(
                        requester,
                        Action::Read,
                        metadata.path.as_str(),
                        metadata.access_policy.as_ref(),
                    )
            }));
        }
        visible.sort_by(|a, b| a.path.as_str().cmp(b.path.as_str()));

        let total = visible.len();
        let secrets: Vec<SecretMetadata> = visible
            .into_iter()
            .skip(filters.offset)
            .take(filters.limit.unwrap_or(usize::MAX))
            .collect();
        let has_more = filters.offset.saturating_add(secrets.len()) < total;

        details.insert("returned".to_string(), json!(secrets.len()));
        details.insert("total".to_string(), json!(total));
        details.insert("hidden".to_string(), json!(scanned.saturating_sub(total)));
        Ok(ListResponse {
            secrets,
            total,
            has_more,
        })
    }

    // ------------------------------------------------------------------
    // Shared steps
    // ------------------------------------------------------------------

    /// Writes the next version of `current`. The caller holds the path lock
    /// and has already authorized the write.
    async fn apply_update(
        &self,
        current: Secret,
        value: &SecretValue,
        updated_by: &str,
        options: UpdateOptions,
    ) -> Result<SecretMetadata> {
        let path = current.path;
        let kind = current.metadata.provider;
        let provider = self.providers.require(kind)?;

        let mut metadata = current.metadata;
        if let Some(description) = options.description {
            metadata.description = Some(description);
        }
        if let Some(tags) = options.tags {
            metadata.tags = tags;
        }
        match &options.rotation_policy {
            PolicyUpdate::Keep => {}
            PolicyUpdate::Set(policy) => metadata.rotation_policy = Some(policy.clone()),
            PolicyUpdate::Remove => metadata.rotation_policy = None,
        }
        metadata.bump_version(updated_by);

        let stored = self.seal(&path, value, metadata.encrypted)?;
        let written = self
            .timed(
                kind,
                provider.update_secret(&path, &stored, &metadata, metadata.version),
            )
            .await;
        // Drop cached copies whether or not the write landed.
        self.cache.invalidate(&path);
        if let Err(e) = written {
            if e.kind() == ErrorKind::VersionConflict {
                warn!(path = %path, error = %e, "concurrent write detected");
            }
            return Err(e);
        }

        match options.rotation_policy {
            PolicyUpdate::Keep => {}
            PolicyUpdate::Set(policy) => {
                self.scheduler.schedule_rotation(current.id, &policy)?;
            }
            PolicyUpdate::Remove => {
                self.scheduler.cancel_rotation(&current.id);
            }
        }
        info!(path = %path, version = metadata.version, updated_by, "secret updated");
        Ok(metadata)
    }

    /// Fetches the raw record and authorizes `action` against it.
    ///
    /// When the fetch fails, the caller still gets [`Error::AccessDenied`]
    /// unless the base policies would have allowed the action.
    async fn fetch_checked(
        &self,
        path: &SecretPath,
        version: Option<u32>,
        requester: &Requester,
        action: Action,
    ) -> Result<Secret> {
        let raw = match self.fetch(path, version).await {
            Ok(raw) => raw,
            Err(e) => {
                self.access
                    .check_access(requester, action, path.as_str(), None)?;
                return Err(e);
            }
        };
        self.access.check_access(
            requester,
            action,
            path.as_str(),
            raw.metadata.access_policy.as_ref(),
        )?;
        Ok(raw)
    }

    /// Reads the raw (still sealed) record from the provider that owns `path`.
    async fn fetch(&self, path: &SecretPath, version: Option<u32>) -> Result<Secret> {
        let candidates = self.providers.read_candidates(path);
        if candidates.is_empty() {
            return Err(Error::Config {
                reason: format!("no provider configured for '{path}'"),
            });
        }

        let mut missing = None;
        for provider in candidates {
            match self
                .read(provider.kind(), move || provider.get_secret(path, version))
                .await
            {
                Err(e) if e.kind() == ErrorKind::NotFound => missing = missing.or(Some(e)),
                other => return other,
            }
        }
        Err(missing.unwrap_or_else(|| Error::not_found(path.as_str())))
    }

    async fn find_by_id(&self, secret_id: &SecretId) -> Result<Secret> {
        for provider in self.providers.all() {
            let found = self
                .read(provider.kind(), move || provider.get_secret_by_id(secret_id))
                .await?;
            if let Some(secret) = found {
                return Ok(secret);
            }
        }
        Err(Error::not_found(secret_id.to_string()))
    }

    /// Runs an idempotent provider read, retrying retryable failures.
    async fn read<'a, T, F>(&self, kind: ProviderKind, call: F) -> Result<T>
    where
        F: Fn() -> ProviderFuture<'a, T>,
    {
        let mut attempt = 0;
        loop {
            match self.timed(kind, call()).await {
                Err(e) if e.is_retryable() && attempt < self.config.read_retries => {
                    attempt += 1;
                    let delay = READ_RETRY_DELAY * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        provider = %kind,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "provider read failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }

    /// Bounds a provider call by the configured timeout.
    async fn timed<T>(&self, kind: ProviderKind, call: ProviderFuture<'_, T>) -> Result<T> {
        let timeout_ms = self.config.provider_timeout_ms;
        tokio::time::timeout(self.config.provider_timeout(), call)
            .await
            .unwrap_or_else(|_| {
                warn!(provider = %kind, timeout_ms, "provider call timed out");
                Err(Error::ProviderTimeout {
                    provider: kind.to_string(),
                    timeout_ms,
                })
            })
    }

    fn seal(&self, path: &SecretPath, value: &SecretValue, encrypt: bool) -> Result<SecretValue> {
        if encrypt {
            self.encryption.encrypt(path, value)
        } else {
            Ok(value.clone())
        }
    }

    /// Decrypts the value and every historical version of a raw record.
    fn open(&self, mut secret: Secret) -> Result<Secret> {
        if !secret.metadata.encrypted {
            return Ok(secret);
        }
        let path = secret.path.clone();
        let corrupt = |e: Error| {
            error!(path = %path, error = %e, "stored ciphertext failed to decrypt");
            e
        };
        secret.value = self
            .encryption
            .decrypt(&secret.path, &secret.value)
            .map_err(corrupt)?;
        for version in &mut secret.versions {
            version.value = self
                .encryption
                .decrypt(&secret.path, &version.value)
                .map_err(corrupt)?;
        }
        Ok(secret)
    }

    fn validate_value(&self, value: &SecretValue) -> Result<()> {
        if value.is_empty() {
            return Err(Error::validation("secret value cannot be empty"));
        }
        if value.len() > self.config.max_secret_size {
            return Err(Error::validation(format!(
                "secret value is {} bytes, maximum is {}",
                value.len(),
                self.config.max_secret_size
            )));
        }
        Ok(())
    }

    /// Appends the audit event for one operation.
    fn record(
        &self,
        event_type: AuditEventType,
        path: &str,
        requester: &Requester,
        started: Instant,
        details: EventMetadata,
        error: Option<&Error>,
    ) {
        let event_type = match error {
            None => event_type,
            Some(Error::AccessDenied { .. }) => AuditEventType::AccessDenied,
            Some(_) => event_type.failure_variant(),
        };
        // Blank requesters are rejected, but the attempt is still recorded.
        let requester_id = if requester.id.trim().is_empty() {
            ANONYMOUS_REQUESTER
        } else {
            requester.id.as_str()
        };
        let mut builder = AuditEvent::builder()
            .event_type(event_type)
            .secret_path(path)
            .requester(requester_id)
            .metadata_map(details)
            .duration_ms(started.elapsed().as_millis() as u64);
        if let Some(e) = error {
            builder = builder.error(e.to_string());
        }

        match builder.build() {
            Ok(event) => self.audit.log_event(&event),
            Err(e) => error!(
                target: "claw_audit::ops",
                error = %e,
                event_type = %event_type,
                path,
                "failed to build audit event"
            ),
        }
    }
}

impl RotationExecutor for SecretsManager {
    fn execute_rotation<'a>(
        &'a self,
        secret_id: &'a SecretId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.rotate_secret(secret_id, &Requester::system())
                .await
                .map(|_| ())
        })
    }
}

impl std::fmt::Debug for SecretsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsManager")
            .field("providers", &self.providers)
            .field("encryption", &self.config.encryption.enabled)
            .field("cache", &self.cache)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

fn validate_requester(requester: &Requester) -> Result<()> {
    if requester.id.trim().is_empty() {
        return Err(Error::validation("requester id cannot be empty"));
    }
    Ok(())
}

/// Description recorded on a rotated secret: the original text, without any
/// earlier rotation note, followed by the rotation time.
fn rotation_description(existing: Option<&str>, at: chrono::DateTime<Utc>) -> String {
    let stamp = at.to_rfc3339();
    match existing.map(|d| d.split(ROTATED_MARKER).next().unwrap_or(d)) {
        Some(base) if !base.is_empty() => format!("{base}{ROTATED_MARKER}{stamp})"),
        _ => format!("rotated at {stamp}"),
    }
}
