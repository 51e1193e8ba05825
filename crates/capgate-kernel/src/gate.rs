//! [`CapabilityGate`] – the capability check every dispatch passes through.
//!
//! Given the capabilities a context holds and the capabilities an intent
//! requires, the gate succeeds iff every required capability is implied by
//! *some* held capability.  On failure it returns
//! [`GateError::InsufficientCapabilities`] carrying only the unsatisfied
//! requirements, in the order they were required.
//!
//! The check is pure, synchronous computation over the precomputed closure
//! and never touches reactor state.
//!
//! # Example
//!
//! ```
//! use std::collections::HashSet;
//! use capgate_kernel::{algebra::file_algebra, CapabilityGate};
//! use capgate_types::{FileCap, GateError};
//!
//! let gate = CapabilityGate::new(file_algebra());
//! let held: HashSet<FileCap> = [FileCap::write("/x")].into();
//!
//! assert!(gate.authorize(&held, &[FileCap::read("/x")]).is_ok());
//! assert_eq!(
//!     gate.authorize(&held, &[FileCap::delete("/x")]),
//!     Err(GateError::InsufficientCapabilities { missing: vec![FileCap::delete("/x")] }),
//! );
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use capgate_types::{Capability, GateError};
use tracing::debug;

use crate::algebra::CapabilityAlgebra;

/// Shared, cheaply clonable capability checker.
#[derive(Debug)]
pub struct CapabilityGate<C: Capability> {
    algebra: Arc<CapabilityAlgebra<C>>,
}

impl<C: Capability> Clone for CapabilityGate<C> {
    fn clone(&self) -> Self {
        Self {
            algebra: Arc::clone(&self.algebra),
        }
    }
}

impl<C: Capability> CapabilityGate<C> {
    pub fn new(algebra: CapabilityAlgebra<C>) -> Self {
        Self {
            algebra: Arc::new(algebra),
        }
    }

    pub fn from_shared(algebra: Arc<CapabilityAlgebra<C>>) -> Self {
        Self { algebra }
    }

    pub fn algebra(&self) -> &CapabilityAlgebra<C> {
        &self.algebra
    }

    /// Required capabilities not implied by anything in `held`, deduplicated
    /// and in first-required order.
    pub fn missing(&self, held: &HashSet<C>, required: &[C]) -> Vec<C> {
        let mut missing: Vec<C> = Vec::new();
        for cap in required {
            if !self.algebra.satisfied_by(held, cap) && !missing.contains(cap) {
                missing.push(cap.clone());
            }
        }
        missing
    }

    /// Return `Ok(())` when `held` satisfies every capability in `required`.
    ///
    /// An empty requirement list is always satisfied, including by an empty
    /// held set.
    ///
    /// # Errors
    ///
    /// [`GateError::InsufficientCapabilities`] listing the unsatisfied
    /// requirements.
    pub fn authorize(&self, held: &HashSet<C>, required: &[C]) -> Result<(), GateError<C>> {
        let missing = self.missing(held, required);
        if missing.is_empty() {
            Ok(())
        } else {
            debug!(
                required = required.len(),
                missing = missing.len(),
                "capability check rejected"
            );
            Err(GateError::InsufficientCapabilities { missing })
        }
    }
}
