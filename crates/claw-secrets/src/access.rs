//! Access control for secrets.
//!
//! This module provides policy-based access control for secrets. A request
//! is allowed only if some unexpired policy covering the path grants the
//! action to the requester or one of its roles; everything else is denied.
//! Denials are returned to the caller as [`Error::AccessDenied`], which the
//! orchestrator records in the audit trail.

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::types::{AccessPolicy, Action, Requester};

/// Controller for evaluating access policies.
///
/// Holds the base policies supplied by configuration. A secret may carry an
/// additional policy in its metadata; that policy is passed per check and
/// applies to its own secret regardless of its scope. Only actions the
/// attaching requester already holds on the path may be granted that way
/// (see [`AccessController::check_delegation`]).
#[derive(Debug, Default)]
pub struct AccessController {
    policies: RwLock<Vec<AccessPolicy>>,
}

impl AccessController {
    /// Creates a controller with the given base policies.
    #[must_use]
    pub fn new(policies: Vec<AccessPolicy>) -> Self {
        Self {
            policies: RwLock::new(policies),
        }
    }

    /// Adds a base policy.
    pub fn add_policy(&self, policy: AccessPolicy) {
        self.policies.write().push(policy);
    }

    /// Returns a snapshot of the base policies.
    #[must_use]
    pub fn policies(&self) -> Vec<AccessPolicy> {
        self.policies.read().clone()
    }

    /// Returns true if `requester` may perform `action` on `path`.
    ///
    /// `path` may be a full secret path or a list prefix (the empty string
    /// is the root).
    #[must_use]
    pub fn is_allowed(
        &self,
        requester: &Requester,
        action: Action,
        path: &str,
        secret_policy: Option<&AccessPolicy>,
    ) -> bool {
        if secret_policy.is_some_and(|p| p.grants(requester, action)) {
            return true;
        }
        self.policies
            .read()
            .iter()
            .any(|p| p.covers(path) && p.grants(requester, action))
    }

    /// Checks if `requester` may perform `action` on `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccessDenied`] when no policy grants the action.
    pub fn check_access(
        &self,
        requester: &Requester,
        action: Action,
        path: &str,
        secret_policy: Option<&AccessPolicy>,
    ) -> Result<()> {
        if self.is_allowed(requester, action, path, secret_policy) {
            return Ok(());
        }

        tracing::warn!(
            requester = %requester,
            action = %action,
            path = %path,
            "access denied"
        );
        Err(Error::AccessDenied {
            reason: format!("{requester} may not {action} '{path}'"),
        })
    }

    /// Checks that `requester` may attach `policy` to the secret at `path`.
    ///
    /// Every action the policy grants must already be granted to the
    /// requester on `path` by the base policies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccessDenied`] naming the first action the requester
    /// does not hold.
    pub fn check_delegation(
        &self,
        requester: &Requester,
        path: &str,
        policy: &AccessPolicy,
    ) -> Result<()> {
        let Some(action) = policy
            .actions
            .iter()
            .find(|a| !self.is_allowed(requester, **a, path, None))
        else {
            return Ok(());
        };

        tracing::warn!(
            requester = %requester,
            action = %action,
            path = %path,
            "attached policy exceeds requester's own access"
        );
        Err(Error::AccessDenied {
            reason: format!("{requester} may not grant {action} on '{path}'"),
        })
    }
}
