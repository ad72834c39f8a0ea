//! Backend provider contract.
//!
//! A [`SecretProvider`] is a thin translator between the orchestrator and one
//! backend store. Providers persist whatever value they are handed (ciphertext
//! when encryption is enabled) and never interpret it.
//!
//! Concrete adapters for remote stores live outside this crate; the
//! [`MemoryProvider`] here backs tests and local development.

mod memory;
mod registry;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

pub use memory::MemoryProvider;
pub use registry::ProviderRegistry;

use crate::error::Result;
use crate::types::{ProviderKind, Secret, SecretId, SecretMetadata, SecretPath, SecretValue};

/// Boxed future returned by provider operations.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Options for storing a new secret.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreOptions {
    /// Replace an existing secret at the same path instead of failing.
    pub overwrite: bool,
}

impl StoreOptions {
    /// Options that replace an existing secret.
    #[must_use]
    pub const fn overwrite() -> Self {
        Self { overwrite: true }
    }
}

/// Identifier and version assigned by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreReceipt {
    /// Generated secret identifier.
    pub id: SecretId,
    /// Stored version (always 1 for a new secret).
    pub version: u32,
}

/// Listing query passed to a provider.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Only paths starting with this prefix.
    pub prefix: Option<String>,
    /// Only secrets carrying every one of these tags.
    pub tags: BTreeMap<String, String>,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Number of matching results to skip.
    pub offset: usize,
}

impl ListQuery {
    /// Query matching everything.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter by path prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Filter by tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Limit number of results.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if `metadata` passes the prefix and tag filters.
    #[must_use]
    pub fn matches(&self, metadata: &SecretMetadata) -> bool {
        self.prefix
            .as_deref()
            .is_none_or(|prefix| metadata.path.has_prefix(prefix))
            && metadata.matches_tags(&self.tags)
    }
}

/// One page of listing results.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Matching metadata, sorted by path.
    pub secrets: Vec<SecretMetadata>,
    /// Number of matches before pagination.
    pub total: usize,
}

/// A backend secret store.
///
/// All operations are bounded by the caller with a timeout; implementations
/// need not enforce one themselves.
pub trait SecretProvider: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> ProviderKind;

    /// Persists a new secret at version 1.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the path is occupied and `options.overwrite`
    /// is false.
    fn store_secret<'a>(
        &'a self,
        path: &'a SecretPath,
        value: &'a SecretValue,
        metadata: &'a SecretMetadata,
        options: StoreOptions,
    ) -> ProviderFuture<'a, StoreReceipt>;

    /// Fetches a secret. `value` holds the requested version (or the
    /// current one) and `versions` holds the full history.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the path or version does not exist.
    fn get_secret<'a>(
        &'a self,
        path: &'a SecretPath,
        version: Option<u32>,
    ) -> ProviderFuture<'a, Secret>;

    /// Appends `version` with `value` and replaces the metadata.
    ///
    /// This is a conditional write: it succeeds only if `version` is exactly
    /// one past the stored current version.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the path does not exist and `VersionConflict` if
    /// `version` is not the next version.
    fn update_secret<'a>(
        &'a self,
        path: &'a SecretPath,
        value: &'a SecretValue,
        metadata: &'a SecretMetadata,
        version: u32,
    ) -> ProviderFuture<'a, ()>;

    /// Removes a secret and its history.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the path does not exist.
    fn delete_secret<'a>(&'a self, path: &'a SecretPath) -> ProviderFuture<'a, ()>;

    /// Lists metadata matching `query`.
    fn list_secrets<'a>(&'a self, query: &'a ListQuery) -> ProviderFuture<'a, ListPage>;

    /// Looks a secret up by identifier.
    fn get_secret_by_id<'a>(&'a self, id: &'a SecretId) -> ProviderFuture<'a, Option<Secret>>;

    /// Fails if the backend is unhealthy.
    fn health_check(&self) -> ProviderFuture<'_, ()>;

    /// Releases backend connections.
    fn close(&self) -> ProviderFuture<'_, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(path: &str, tags: &[(&str, &str)]) -> SecretMetadata {
        let path = SecretPath::new(path).expect("valid path");
        let mut meta = SecretMetadata::new(path, ProviderKind::Vault, "test", false);
        for (k, v) in tags {
            meta.tags.insert((*k).to_string(), (*v).to_string());
        }
        meta
    }

    #[test]
    fn list_query_matches_prefix_and_tags() {
        let meta = metadata("db/prod/main", &[("env", "prod")]);

        assert!(ListQuery::all().matches(&meta));
        assert!(ListQuery::all().with_prefix("db/").matches(&meta));
        assert!(!ListQuery::all().with_prefix("api/").matches(&meta));
        assert!(ListQuery::all().with_tag("env", "prod").matches(&meta));
        assert!(!ListQuery::all().with_tag("env", "dev").matches(&meta));
        assert!(
            !ListQuery::all()
                .with_prefix("db/")
                .with_tag("team", "x")
                .matches(&meta)
        );
    }

    #[test]
    fn store_options_default_does_not_overwrite() {
        assert!(!StoreOptions::default().overwrite);
        assert!(StoreOptions::overwrite().overwrite);
    }
}
