//! Closed registry of configured providers.

use std::sync::Arc;

use super::SecretProvider;
use crate::error::{Error, Result};
use crate::types::{ProviderKind, SecretPath};

/// The providers available to the orchestrator, one slot per [`ProviderKind`].
///
/// Lookups go through an exhaustive `match`, so a new provider kind cannot be
/// added without deciding how it is registered.
#[derive(Clone)]
pub struct ProviderRegistry {
    vault: Option<Arc<dyn SecretProvider>>,
    aws: Option<Arc<dyn SecretProvider>>,
    azure: Option<Arc<dyn SecretProvider>>,
    default_kind: ProviderKind,
}

impl ProviderRegistry {
    /// Creates an empty registry whose unprefixed paths resolve to `default_kind`.
    #[must_use]
    pub fn new(default_kind: ProviderKind) -> Self {
        Self {
            vault: None,
            aws: None,
            azure: None,
            default_kind,
        }
    }

    /// Registers `provider` under the kind it reports.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn SecretProvider>) -> Self {
        self.register(provider);
        self
    }

    /// Registers `provider` under the kind it reports, replacing any previous one.
    pub fn register(&mut self, provider: Arc<dyn SecretProvider>) {
        let slot = match provider.kind() {
            ProviderKind::Vault => &mut self.vault,
            ProviderKind::Aws => &mut self.aws,
            ProviderKind::Azure => &mut self.azure,
        };
        *slot = Some(provider);
    }

    /// Returns the kind used for unprefixed paths.
    #[must_use]
    pub const fn default_kind(&self) -> ProviderKind {
        self.default_kind
    }

    /// Returns the provider registered for `kind`.
    #[must_use]
    pub fn get(&self, kind: ProviderKind) -> Option<&Arc<dyn SecretProvider>> {
        match kind {
            ProviderKind::Vault => self.vault.as_ref(),
            ProviderKind::Aws => self.aws.as_ref(),
            ProviderKind::Azure => self.azure.as_ref(),
        }
    }

    /// Returns the provider registered for `kind` or a configuration error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no provider of that kind is registered.
    pub fn require(&self, kind: ProviderKind) -> Result<&Arc<dyn SecretProvider>> {
        self.get(kind).ok_or_else(|| Error::Config {
            reason: format!("provider '{kind}' is not configured"),
        })
    }

    /// Resolves which provider kind owns `path`: the path prefix if there is
    /// one, otherwise `explicit`, otherwise the default.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `explicit` contradicts the path prefix.
    pub fn resolve_kind(
        &self,
        path: &SecretPath,
        explicit: Option<ProviderKind>,
    ) -> Result<ProviderKind> {
        match (path.provider_prefix(), explicit) {
            (Some(prefixed), Some(requested)) if prefixed != requested => {
                Err(Error::validation(format!(
                    "path '{path}' selects provider '{prefixed}' but '{requested}' was requested"
                )))
            }
            (Some(prefixed), _) => Ok(prefixed),
            (None, Some(requested)) => Ok(requested),
            (None, None) => Ok(self.default_kind),
        }
    }

    /// Resolves the provider that owns `path`.
    ///
    /// # Errors
    ///
    /// See [`resolve_kind`](Self::resolve_kind) and [`require`](Self::require).
    pub fn resolve_for_path(
        &self,
        path: &SecretPath,
        explicit: Option<ProviderKind>,
    ) -> Result<&Arc<dyn SecretProvider>> {
        self.require(self.resolve_kind(path, explicit)?)
    }

    /// Providers to try, in order, when reading an unprefixed path: the
    /// default first, then the others in declaration order.
    #[must_use]
    pub fn read_candidates(&self, path: &SecretPath) -> Vec<&Arc<dyn SecretProvider>> {
        if let Some(kind) = path.provider_prefix() {
            return self.get(kind).into_iter().collect();
        }
        std::iter::once(self.default_kind)
            .chain(
                ProviderKind::ALL
                    .into_iter()
                    .filter(|k| *k != self.default_kind),
            )
            .filter_map(|k| self.get(k))
            .collect()
    }

    /// Every registered provider, in declaration order.
    #[must_use]
    pub fn all(&self) -> Vec<&Arc<dyn SecretProvider>> {
        ProviderKind::ALL
            .into_iter()
            .filter_map(|k| self.get(k))
            .collect()
    }

    /// Returns true if no provider is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.all().is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<ProviderKind> = self.all().iter().map(|prov| prov.kind()).collect();
        f.debug_struct("ProviderRegistry")
            .field("providers", &kinds)
            .field("default", &self.default_kind)
            .finish()
    }
}
