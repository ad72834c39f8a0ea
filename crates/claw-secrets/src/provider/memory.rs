//! In-memory provider.
//!
//! Holds every version of every secret in a sorted map. Supports fault
//! injection (unhealthy status, artificial latency, failing reads or
//! writes) so callers can exercise timeout and retry paths.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

use super::{ListPage, ListQuery, ProviderFuture, SecretProvider, StoreOptions, StoreReceipt};
use crate::error::{Error, Result};
use crate::types::{
    ProviderKind, Secret, SecretId, SecretMetadata, SecretPath, SecretValue, SecretVersion,
};

/// A stored secret with its full history.
#[derive(Clone)]
struct StoredSecret {
    id: SecretId,
    metadata: SecretMetadata,
    versions: Vec<SecretVersion>,
}

impl StoredSecret {
    fn to_secret(&self, version: Option<u32>) -> Result<Secret> {
        let path = &self.metadata.path;
        let selected = match version {
            Some(v) => self
                .versions
                .iter()
                .find(|sv| sv.version == v)
                .ok_or_else(|| Error::not_found(format!("{path}@{v}")))?,
            None => self
                .versions
                .iter()
                .find(|sv| sv.active)
                .ok_or_else(|| Error::Provider {
                    provider: self.metadata.provider.to_string(),
                    reason: format!("record for {path} has no active version"),
                })?,
        };
        Ok(Secret {
            id: self.id,
            path: path.clone(),
            value: selected.value.clone(),
            metadata: self.metadata.clone(),
            versions: self.versions.clone(),
        })
    }
}

/// Provider that keeps secrets in process memory.
pub struct MemoryProvider {
    kind: ProviderKind,
    secrets: RwLock<BTreeMap<String, StoredSecret>>,
    healthy: AtomicBool,
    closed: AtomicBool,
    latency_ms: AtomicU64,
    failing_reads: AtomicU32,
    failing_writes: AtomicU32,
}

impl MemoryProvider {
    /// Creates an empty provider that reports itself as `kind`.
    #[must_use]
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            secrets: RwLock::new(BTreeMap::new()),
            healthy: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            failing_reads: AtomicU32::new(0),
            failing_writes: AtomicU32::new(0),
        }
    }

    /// Adds artificial latency to every operation.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    /// Changes the artificial latency.
    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    /// Sets what [`health_check`](SecretProvider::health_check) reports.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Makes the next `n` reads fail with a provider error.
    pub fn fail_next_reads(&self, n: u32) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` writes (store, update, delete) fail with a provider error.
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Returns true once [`close`](SecretProvider::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns the number of stored secrets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.secrets.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.secrets.read().is_empty()
    }

    /// Returns the value exactly as persisted for `path` at `version`.
    #[must_use]
    pub fn raw_value(&self, path: &SecretPath, version: u32) -> Option<SecretValue> {
        self.secrets
            .read()
            .get(path.as_str())?
            .versions
            .iter()
            .find(|v| v.version == version)
            .map(|v| v.value.clone())
    }

    /// Replaces the persisted value for `path` at `version`, bypassing every
    /// check. Returns false if there is no such version.
    pub fn replace_raw_value(&self, path: &SecretPath, version: u32, value: SecretValue) -> bool {
        let mut secrets = self.secrets.write();
        let Some(stored) = secrets.get_mut(path.as_str()) else {
            return false;
        };
        match stored.versions.iter_mut().find(|v| v.version == version) {
            Some(slot) => {
                slot.value = value;
                true
            }
            None => false,
        }
    }

    async fn simulate_io(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(self.failure("provider is closed"));
        }
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        Ok(())
    }

    fn injected(&self, counter: &AtomicU32, what: &str) -> Result<()> {
        let triggered = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if triggered {
            return Err(self.failure(format!("injected {what} failure")));
        }
        Ok(())
    }

    fn failure(&self, reason: impl Into<String>) -> Error {
        Error::Provider {
            provider: self.kind.to_string(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Debug for MemoryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryProvider")
            .field("kind", &self.kind)
            .field("secrets", &self.len())
            .field("healthy", &self.healthy.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SecretProvider for MemoryProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn store_secret<'a>(
        &'a self,
        path: &'a SecretPath,
        value: &'a SecretValue,
        metadata: &'a SecretMetadata,
        options: StoreOptions,
    ) -> ProviderFuture<'a, StoreReceipt> {
        Box::pin(async move {
            self.simulate_io().await?;
            self.injected(&self.failing_writes, "write")?;

            let mut secrets = self.secrets.write();
            if !options.overwrite && secrets.contains_key(path.as_str()) {
                return Err(Error::AlreadyExists {
                    path: path.to_string(),
                });
            }

            let id = SecretId::generate();
            let mut metadata = metadata.clone();
            metadata.version = 1;
            let first = SecretVersion {
                version: 1,
                value: value.clone(),
                created_at: metadata.created_at,
                created_by: metadata.created_by.clone(),
                active: true,
            };
            secrets.insert(
                path.as_str().to_string(),
                StoredSecret {
                    id,
                    metadata,
                    versions: vec![first],
                },
            );
            Ok(StoreReceipt { id, version: 1 })
        })
    }

    fn get_secret<'a>(
        &'a self,
        path: &'a SecretPath,
        version: Option<u32>,
    ) -> ProviderFuture<'a, Secret> {
        Box::pin(async move {
            self.simulate_io().await?;
            self.injected(&self.failing_reads, "read")?;

            let secrets = self.secrets.read();
            let stored = secrets
                .get(path.as_str())
                .ok_or_else(|| Error::not_found(path.as_str()))?;
            stored.to_secret(version)
        })
    }

    fn update_secret<'a>(
        &'a self,
        path: &'a SecretPath,
        value: &'a SecretValue,
        metadata: &'a SecretMetadata,
        version: u32,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.simulate_io().await?;
            self.injected(&self.failing_writes, "write")?;

            let mut secrets = self.secrets.write();
            let stored = secrets
                .get_mut(path.as_str())
                .ok_or_else(|| Error::not_found(path.as_str()))?;

            let next = stored.metadata.version + 1;
            if version != next {
                return Err(Error::VersionConflict {
                    path: path.to_string(),
                    expected: version,
                    found: next,
                });
            }

            for existing in &mut stored.versions {
                existing.active = false;
            }
            stored.versions.push(SecretVersion {
                version,
                value: value.clone(),
                created_at: metadata.updated_at,
                created_by: metadata.updated_by.clone(),
                active: true,
            });
            stored.metadata = metadata.clone();
            stored.metadata.version = version;
            Ok(())
        })
    }

    fn delete_secret<'a>(&'a self, path: &'a SecretPath) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.simulate_io().await?;
            self.injected(&self.failing_writes, "write")?;

            self.secrets
                .write()
                .remove(path.as_str())
                .map(|_| ())
                .ok_or_else(|| Error::not_found(path.as_str()))
        })
    }

    fn list_secrets<'a>(&'a self, query: &'a ListQuery) -> ProviderFuture<'a, ListPage> {
        Box::pin(async move {
            self.simulate_io().await?;
            self.injected(&self.failing_reads, "read")?;

            let secrets = self.secrets.read();
            let matching: Vec<&SecretMetadata> = secrets
                .values()
                .map(|s| &s.metadata)
                .filter(|m| query.matches(m))
                .collect();
            let total = matching.len();
            let page = matching
                .into_iter()
                .skip(query.offset)
                .take(query.limit.unwrap_or(usize::MAX))
                .cloned()
                .collect();
            Ok(ListPage {
                secrets: page,
                total,
            })
        })
    }

    fn get_secret_by_id<'a>(&'a self, id: &'a SecretId) -> ProviderFuture<'a, Option<Secret>> {
        Box::pin(async move {
            self.simulate_io().await?;
            self.injected(&self.failing_reads, "read")?;

            let secrets = self.secrets.read();
            secrets
                .values()
                .find(|s| s.id == *id)
                .map(|s| s.to_secret(None))
                .transpose()
        })
    }

    fn health_check(&self) -> ProviderFuture<'_, ()> {
        Box::pin(async move {
            self.simulate_io().await?;
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(self.failure("backend reported unhealthy"))
            }
        })
    }

    fn close(&self) -> ProviderFuture<'_, ()> {
        Box::pin(async move {
            self.closed.store(true, Ordering::SeqCst);
            tracing::debug!(provider = %self.kind, "provider closed");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(path: &str) -> SecretPath {
        SecretPath::new(path).expect("valid path")
    }

    fn meta(path: &str) -> SecretMetadata {
        SecretMetadata::new(p(path), ProviderKind::Vault, "alice", false)
    }

    async fn stored(provider: &MemoryProvider, path: &str, value: &str) -> StoreReceipt {
        provider
            .store_secret(
                &p(path),
                &SecretValue::new(value),
                &meta(path),
                StoreOptions::default(),
            )
            .await
            .expect("store")
    }

    #[tokio::test]
    async fn store_then_get() {
        let provider = MemoryProvider::new(ProviderKind::Vault);
        let receipt = stored(&provider, "a/b", "v1").await;
        assert_eq!(receipt.version, 1);

        let secret = provider.get_secret(&p("a/b"), None).await.expect("get");
        assert_eq!(secret.id, receipt.id);
        assert_eq!(secret.value.expose(), "v1");
        assert_eq!(secret.versions.len(), 1);
        assert!(secret.versions[0].active);
    }

    #[tokio::test]
    async fn store_existing_path_fails_without_overwrite() {
        let provider = MemoryProvider::new(ProviderKind::Vault);
        let first = stored(&provider, "a/b", "v1").await;

        let again = provider
            .store_secret(&p("a/b"), &SecretValue::new("x"), &meta("a/b"), StoreOptions::default())
            .await;
        assert!(matches!(again, Err(Error::AlreadyExists { .. })));

        let replaced = provider
            .store_secret(&p("a/b"), &SecretValue::new("x"), &meta("a/b"), StoreOptions::overwrite())
            .await
            .expect("overwrite");
        assert_ne!(replaced.id, first.id);
    }

    #[tokio::test]
    async fn update_is_conditional_on_next_version() {
        let provider = MemoryProvider::new(ProviderKind::Vault);
        stored(&provider, "a/b", "v1").await;

        let mut m = meta("a/b");
        m.bump_version("bob");
        provider
            .update_secret(&p("a/b"), &SecretValue::new("v2"), &m, 2)
            .await
            .expect("update to v2");

        let stale = provider
            .update_secret(&p("a/b"), &SecretValue::new("again"), &m, 2)
            .await;
        assert!(matches!(
            stale,
            Err(Error::VersionConflict {
                expected: 2,
                found: 3,
                ..
            })
        ));

        let secret = provider.get_secret(&p("a/b"), None).await.expect("get");
        assert_eq!(secret.metadata.version, 2);
        assert_eq!(secret.value.expose(), "v2");
        assert_eq!(secret.versions.iter().filter(|v| v.active).count(), 1);
        assert_eq!(secret.active_version().map(|v| v.version), Some(2));

        let v1 = provider.get_secret(&p("a/b"), Some(1)).await.expect("v1");
        assert_eq!(v1.value.expose(), "v1");
    }

    #[tokio::test]
    async fn missing_version_and_path_are_not_found() {
        let provider = MemoryProvider::new(ProviderKind::Vault);
        stored(&provider, "a/b", "v1").await;

        let missing_version = provider.get_secret(&p("a/b"), Some(7)).await;
        assert!(matches!(missing_version, Err(Error::NotFound { resource }) if resource == "a/b@7"));

        let missing_path = provider.get_secret(&p("x/y"), None).await;
        assert!(matches!(missing_path, Err(Error::NotFound { .. })));

        let missing_delete = provider.delete_secret(&p("x/y")).await;
        assert!(matches!(missing_delete, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn list_filters_and_paginates_sorted() {
        let provider = MemoryProvider::new(ProviderKind::Vault);
        for path in ["db/c", "db/a", "api/x", "db/b"] {
            stored(&provider, path, "v").await;
        }

        let query = ListQuery::all().with_prefix("db/").with_limit(2);
        let page = provider.list_secrets(&query).await.expect("list");
        assert_eq!(page.total, 3);
        let paths: Vec<&str> = page.secrets.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(paths, ["db/a", "db/b"]);

        let query = ListQuery {
            offset: 2,
            ..ListQuery::all().with_prefix("db/")
        };
        let page = provider.list_secrets(&query).await.expect("list");
        assert_eq!(page.secrets.len(), 1);
        assert_eq!(page.secrets[0].path.as_str(), "db/c");
    }

    #[tokio::test]
    async fn lookup_by_id() {
        let provider = MemoryProvider::new(ProviderKind::Vault);
        let receipt = stored(&provider, "a/b", "v1").await;

        let found = provider.get_secret_by_id(&receipt.id).await.expect("lookup");
        assert_eq!(found.map(|s| s.path), Some(p("a/b")));

        let missing = provider
            .get_secret_by_id(&SecretId::generate())
            .await
            .expect("lookup");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let provider = MemoryProvider::new(ProviderKind::Aws);
        provider.fail_next_writes(1);

        let failed = provider
            .store_secret(&p("a/b"), &SecretValue::new("v"), &meta("a/b"), StoreOptions::default())
            .await;
        assert!(matches!(failed, Err(ref e) if e.is_retryable()));
        assert!(provider.is_empty());

        stored(&provider, "a/b", "v").await;

        provider.fail_next_reads(2);
        assert!(provider.get_secret(&p("a/b"), None).await.is_err());
        assert!(provider.get_secret(&p("a/b"), None).await.is_err());
        assert!(provider.get_secret(&p("a/b"), None).await.is_ok());
    }

    #[tokio::test]
    async fn health_and_close() {
        let provider = MemoryProvider::new(ProviderKind::Azure);
        assert!(provider.health_check().await.is_ok());

        provider.set_healthy(false);
        assert!(provider.health_check().await.is_err());

        provider.close().await.expect("close");
        assert!(provider.is_closed());
        assert!(provider.get_secret(&p("a/b"), None).await.is_err());
    }

    #[tokio::test]
    async fn raw_value_access() {
        let provider = MemoryProvider::new(ProviderKind::Vault);
        stored(&provider, "a/b", "v1").await;

        assert_eq!(
            provider.raw_value(&p("a/b"), 1).map(|v| v.into_inner()),
            Some("v1".to_string())
        );
        assert!(provider.replace_raw_value(&p("a/b"), 1, SecretValue::new("x")));
        assert!(!provider.replace_raw_value(&p("a/b"), 2, SecretValue::new("x")));
        assert_eq!(
            provider.raw_value(&p("a/b"), 1).map(|v| v.into_inner()),
            Some("x".to_string())
        );
    }
}
