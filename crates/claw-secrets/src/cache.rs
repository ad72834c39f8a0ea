//! Bounded TTL cache of decrypted secrets.
//!
//! Entries are keyed by `path:latest` or `path:<version>`. A secondary
//! index from path to its keys makes [`SecretCache::invalidate`] touch only
//! the entries of that path. Removal is always atomic under the write lock;
//! entries are never mutated in place.
//!
//! A reader that misses, fetches from a provider and then fills the cache
//! takes a [`FillToken`] before fetching. If any invalidation happens in
//! between, [`SecretCache::put_if_unchanged`] drops the fill instead of
//! re-inserting a value that may predate the invalidating write.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::types::{Secret, SecretPath};

/// Builds the cache key for a path and optional version.
#[must_use]
pub fn cache_key(path: &SecretPath, version: Option<u32>) -> String {
    match version {
        Some(v) => format!("{path}:{v}"),
        None => format!("{path}:latest"),
    }
}

struct CacheEntry {
    secret: Secret,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    by_path: HashMap<String, HashSet<String>>,
    invalidations: u64,
    key_epoch: Option<u32>,
}

impl CacheState {
    fn remove_key(&mut self, key: &str) -> bool {
        let Some((path, _)) = key.rsplit_once(':') else {
            return self.entries.remove(key).is_some();
        };
        if let Some(keys) = self.by_path.get_mut(path) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_path.remove(path);
            }
        }
        self.entries.remove(key).is_some()
    }

    fn remove_path(&mut self, path: &str) -> usize {
        let Some(keys) = self.by_path.remove(path) else {
            return 0;
        };
        keys.iter()
            .filter(|k| self.entries.remove(k.as_str()).is_some())
            .count()
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove_key(key);
        }
        expired.len()
    }

    fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        self.by_path.clear();
        self.invalidations += 1;
        removed
    }
}

/// Snapshot of the cache's invalidation counter, taken before a provider read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillToken(u64);

/// Bounded, TTL-based store of decrypted secrets.
pub struct SecretCache {
    state: RwLock<CacheState>,
    ttl: Duration,
    max_entries: usize,
    enabled: bool,
}

impl SecretCache {
    /// Creates an enabled cache.
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            ttl,
            max_entries: max_entries.max(1),
            enabled: true,
        }
    }

    /// Creates a cache that never stores anything.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(Duration::ZERO, 1)
        }
    }

    /// Returns true if the cache stores entries.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the entry lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the number of stored entries, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Returns the cached secret for `path`/`version` if present and unexpired.
    #[must_use]
    pub fn get(&self, path: &SecretPath, version: Option<u32>) -> Option<Secret> {
        if !self.enabled {
            return None;
        }
        let key = cache_key(path, version);
        let now = Instant::now();
        {
            let state = self.state.read();
            match state.entries.get(&key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.secret.clone()),
                Some(_) => {}
            }
        }

        let mut state = self.state.write();
        if state.entries.get(&key).is_some_and(|e| e.is_expired(now)) {
            state.remove_key(&key);
            tracing::debug!(key = %key, "expired cache entry removed");
        }
        None
    }

    /// Takes a snapshot to pass to [`put_if_unchanged`](Self::put_if_unchanged).
    #[must_use]
    pub fn fill_token(&self) -> FillToken {
        FillToken(self.state.read().invalidations)
    }

    /// Stores `secret` under `path`/`version` with a fresh expiry.
    pub fn put(&self, path: &SecretPath, version: Option<u32>, secret: Secret) {
        if !self.enabled {
            return;
        }
        let mut state = self.state.write();
        self.insert(&mut state, path, version, secret);
    }

    /// Stores `secret` only if nothing was invalidated since `token` was taken.
    ///
    /// Returns true if the entry was stored.
    pub fn put_if_unchanged(
        &self,
        token: FillToken,
        path: &SecretPath,
        version: Option<u32>,
        secret: Secret,
    ) -> bool {
        if !self.enabled {
            return false;
        }
        let mut state = self.state.write();
        if state.invalidations != token.0 {
            tracing::debug!(path = %path, "cache fill discarded after concurrent invalidation");
            return false;
        }
        self.insert(&mut state, path, version, secret);
        true
    }

    fn insert(
        &self,
        state: &mut CacheState,
        path: &SecretPath,
        version: Option<u32>,
        secret: Secret,
    ) {
        let key = cache_key(path, version);
        let now = Instant::now();

        if !state.entries.contains_key(&key) && state.entries.len() >= self.max_entries {
            state.purge_expired(now);
            if state.entries.len() >= self.max_entries {
                let victim = state
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(victim) = victim {
                    state.remove_key(&victim);
                }
            }
        }

        state
            .by_path
            .entry(path.as_str().to_string())
            .or_default()
            .insert(key.clone());
        state.entries.insert(
            key,
            CacheEntry {
                secret,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Removes every entry for exactly `path`, whatever the version.
    ///
    /// Returns the number of removed entries.
    pub fn invalidate(&self, path: &SecretPath) -> usize {
        let mut state = self.state.write();
        state.invalidations += 1;
        let removed = state.remove_path(path.as_str());
        if removed > 0 {
            tracing::debug!(path = %path, removed, "cache invalidated");
        }
        removed
    }

    /// Removes every entry whose path starts with `prefix`.
    ///
    /// Returns the number of removed entries.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut state = self.state.write();
        state.invalidations += 1;
        let paths: Vec<String> = state
            .by_path
            .keys()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect();
        paths.iter().map(|p| state.remove_path(p)).sum()
    }

    /// Removes every entry.
    pub fn clear(&self) -> usize {
        let removed = self.state.write().clear();
        tracing::debug!(removed, "cache cleared");
        removed
    }

    /// Records the encryption key version the cache is filled under.
    ///
    /// Flushes everything when `key_version` differs from the last one seen.
    /// Returns true if a flush happened.
    pub fn sync_key_epoch(&self, key_version: u32) -> bool {
        let mut state = self.state.write();
        match state.key_epoch {
            Some(seen) if seen == key_version => false,
            None => {
                state.key_epoch = Some(key_version);
                false
            }
            Some(_) => {
                state.key_epoch = Some(key_version);
                let removed = state.clear();
                tracing::info!(key_version, removed, "cache flushed after key rotation");
                true
            }
        }
    }

    /// Drops expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.state.write().purge_expired(Instant::now())
    }
}

impl std::fmt::Debug for SecretCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCache")
            .field("entries", &self.len())
            .field("ttl", &self.ttl)
            .field("max_entries", &self.max_entries)
            .field("enabled", &self.enabled)
            .finish()
    }
}
