//! The [`Intent`] trait.
//!
//! Intents are closed enums: each variant carries a plain-data payload and
//! the trait maps a value to the capabilities it requires.  Routing matches
//! on the variant exhaustively, so there is no runtime "unknown operation"
//! branch for statically known variants.

use std::fmt;

use capgate_types::Capability;

/// A typed request with a derivable capability requirement.
pub trait Intent: Clone + fmt::Debug + Send + Sync + 'static {
    /// The capability type requirements are expressed in.
    type Capability: Capability;

    /// Stable variant name, used for routing and audit logs.
    fn name(&self) -> &'static str;

    /// Capabilities a caller must hold (directly or by implication).
    ///
    /// Must be pure and total: it depends on the payload alone and never
    /// panics.
    fn required_capabilities(&self) -> Vec<Self::Capability>;
}
