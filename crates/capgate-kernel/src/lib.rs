//! `capgate-kernel` – Capability Algebra & Context
//!
//! The pure, synchronous half of the dispatch core.  Nothing here blocks,
//! spawns, or performs I/O.
//!
//! # Modules
//!
//! - [`algebra`] – [`ImplicationTable`][algebra::ImplicationTable] and
//!   [`CapabilityAlgebra`][algebra::CapabilityAlgebra]: implication with a
//!   precomputed, cycle-checked closure, direct `grants`, and `compose`.
//! - [`gate`] – [`CapabilityGate`][gate::CapabilityGate]: decides whether a
//!   held capability set satisfies an intent's requirements and reports the
//!   missing ones.
//! - [`capability_manager`] – [`CapabilityManager`][capability_manager::CapabilityManager]:
//!   identity → granted capabilities, used when a context is built without
//!   explicit capabilities.
//! - [`context`] – [`Context`][context::Context]: immutable caller identity,
//!   capabilities and trace metadata with `propagate` and strategy-based
//!   `compose`.
//! - [`registry`] – [`Registry`][registry::Registry]: name → component lookup
//!   created at startup and shared read-mostly.

pub mod algebra;
pub mod capability_manager;
pub mod context;
pub mod gate;
pub mod registry;

pub use algebra::{CapabilityAlgebra, ImplicationCycle, ImplicationTable, file_algebra};
pub use capability_manager::CapabilityManager;
pub use context::{CompositionStrategy, Context, ContextBuilder, UnknownStrategy};
pub use gate::CapabilityGate;
pub use registry::Registry;
