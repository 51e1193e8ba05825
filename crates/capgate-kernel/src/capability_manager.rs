//! [`CapabilityManager`] – per-identity capability grants.
//!
//! The upstream session layer normally populates a context's held
//! capabilities.  When it does not, the embedding application resolves them
//! from this manager (see
//! [`ContextBuilder::resolve_with`][crate::context::ContextBuilder::resolve_with]).

use std::collections::{HashMap, HashSet};

use capgate_types::{Capability, GateError};

use crate::algebra::CapabilityAlgebra;

/// Manages the set of capability grants for each identity.
///
/// # Example
///
/// ```
/// use capgate_kernel::{algebra::file_algebra, CapabilityManager};
/// use capgate_types::FileCap;
///
/// let algebra = file_algebra();
/// let mut mgr = CapabilityManager::new();
/// mgr.grant("alice", FileCap::write("/x"));
///
/// assert!(mgr.check("alice", &FileCap::read("/x"), &algebra).is_ok());
/// assert!(mgr.check("alice", &FileCap::delete("/x"), &algebra).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct CapabilityManager<C: Capability> {
    grants: HashMap<String, HashSet<C>>,
}

impl<C: Capability> Default for CapabilityManager<C> {
    fn default() -> Self {
        Self {
            grants: HashMap::new(),
        }
    }
}

impl<C: Capability> CapabilityManager<C> {
    /// Create an empty manager with no grants.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `cap` to `identity`.  Duplicate grants are silently ignored.
    pub fn grant(&mut self, identity: &str, cap: C) {
        self.grants
            .entry(identity.to_string())
            .or_default()
            .insert(cap);
    }

    /// Revoke `cap` from `identity`.  No-ops if the identity or capability is
    /// not present.
    pub fn revoke(&mut self, identity: &str, cap: &C) {
        if let Some(set) = self.grants.get_mut(identity) {
            set.remove(cap);
        }
    }

    /// Drop every grant held by `identity`.
    pub fn revoke_all(&mut self, identity: &str) {
        self.grants.remove(identity);
    }

    /// The capabilities explicitly granted to `identity`.  Empty for unknown
    /// identities.
    pub fn held_for(&self, identity: &str) -> HashSet<C> {
        self.grants.get(identity).cloned().unwrap_or_default()
    }

    /// Return `Ok(())` when some grant of `identity` implies `cap`.
    pub fn check(
        &self,
        identity: &str,
        cap: &C,
        algebra: &CapabilityAlgebra<C>,
    ) -> Result<(), GateError<C>> {
        let has = self
            .grants
            .get(identity)
            .is_some_and(|set| algebra.satisfied_by(set, cap));
        if has {
            Ok(())
        } else {
            Err(GateError::InsufficientCapabilities {
                missing: vec![cap.clone()],
            })
        }
    }

    /// Identities with at least one grant, sorted.
    pub fn identities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .grants
            .iter()
            .filter(|(_, set)| !set.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}
