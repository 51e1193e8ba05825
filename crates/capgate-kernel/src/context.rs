//! [`Context`] – the immutable, propagating bag of caller identity, held
//! capabilities, and trace metadata.
//!
//! A context is built once per request with [`Context::builder`] and never
//! mutated afterwards.  Moving to a downstream unit goes through
//! [`Context::propagate`], which keeps identity, session, capabilities and
//! correlation id but always mints a fresh per-hop id.  Two contexts are
//! combined with [`Context::compose`] under a named [`CompositionStrategy`].
//!
//! # Example
//!
//! ```
//! use capgate_kernel::{CompositionStrategy, Context};
//! use capgate_types::FileCap;
//!
//! let root: Context<FileCap> = Context::builder("alice")
//!     .session("sess-1")
//!     .capabilities([FileCap::write("/x")])
//!     .build();
//!
//! let hop = root.propagate("files");
//! assert_ne!(hop.hop_id(), root.hop_id());
//! assert_eq!(hop.correlation_id(), root.correlation_id());
//! assert_eq!(hop.trace(), ["files".to_string()]);
//!
//! let extra = Context::builder("alice").capabilities([FileCap::read("/y")]).build();
//! let merged = hop.compose(&extra, CompositionStrategy::Merge);
//! assert_eq!(merged.capabilities().len(), 2);
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use capgate_types::Capability;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::capability_manager::CapabilityManager;

// ────────────────────────────────────────────────────────────────────────────
// CompositionStrategy
// ────────────────────────────────────────────────────────────────────────────

/// The statically enumerated ways two contexts can be combined.
///
/// Every strategy is total: it is defined for every combination of present
/// and absent fields.  Where a scalar is present in both arguments, the
/// second argument wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompositionStrategy {
    /// Union of capabilities and metadata; scalars present in the second
    /// argument override the first; traces are concatenated.
    Merge,
    /// The second argument replaces the first wholesale.
    Override,
    /// Intersection of capabilities; everything else as [`Merge`](Self::Merge).
    IntersectCapabilities,
}

impl CompositionStrategy {
    pub const ALL: [CompositionStrategy; 3] = [
        CompositionStrategy::Merge,
        CompositionStrategy::Override,
        CompositionStrategy::IntersectCapabilities,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompositionStrategy::Merge => "merge",
            CompositionStrategy::Override => "override",
            CompositionStrategy::IntersectCapabilities => "intersect-capabilities",
        }
    }
}

impl fmt::Display for CompositionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing a strategy name that is not in
/// [`CompositionStrategy::ALL`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown composition strategy '{0}' (expected merge, override or intersect-capabilities)")]
pub struct UnknownStrategy(pub String);

impl FromStr for CompositionStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CompositionStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s.trim())
            .ok_or_else(|| UnknownStrategy(s.to_string()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Context
// ────────────────────────────────────────────────────────────────────────────

/// Caller identity, held capabilities, and trace metadata for one hop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context<C: Capability> {
    identity: String,
    session_id: Option<String>,
    capabilities: HashSet<C>,
    /// Shared by every hop derived from the same request.
    correlation_id: Uuid,
    /// Unique to this hop; never inherited.
    hop_id: Uuid,
    parent_hop: Option<Uuid>,
    /// Units this context has been propagated to, oldest first.
    trace: Vec<String>,
    metadata: BTreeMap<String, serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl<C: Capability> Context<C> {
    pub fn builder(identity: impl Into<String>) -> ContextBuilder<C> {
        ContextBuilder {
            identity: identity.into(),
            session_id: None,
            capabilities: None,
            correlation_id: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn capabilities(&self) -> &HashSet<C> {
        &self.capabilities
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn hop_id(&self) -> Uuid {
        self.hop_id
    }

    pub fn parent_hop(&self) -> Option<Uuid> {
        self.parent_hop
    }

    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }

    pub fn metadata_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether `cap` is held verbatim (no implication).
    pub fn holds(&self, cap: &C) -> bool {
        self.capabilities.contains(cap)
    }

    /// Derive the context handed to `target`.
    ///
    /// Identity, session, capabilities, correlation id and metadata carry
    /// over; the hop id is regenerated, the parent hop points at `self`, and
    /// `target` is appended to the trace.
    pub fn propagate(&self, target: &str) -> Self {
        let mut trace = self.trace.clone();
        trace.push(target.to_string());
        Self {
            identity: self.identity.clone(),
            session_id: self.session_id.clone(),
            capabilities: self.capabilities.clone(),
            correlation_id: self.correlation_id,
            hop_id: Uuid::new_v4(),
            parent_hop: Some(self.hop_id),
            trace,
            metadata: self.metadata.clone(),
            created_at: Utc::now(),
        }
    }

    /// Combine `self` (first) with `other` (second) under `strategy`.
    ///
    /// The result is always a new hop whose parent is `other`.
    pub fn compose(&self, other: &Self, strategy: CompositionStrategy) -> Self {
        let capabilities = match strategy {
            CompositionStrategy::Merge => {
                self.capabilities.union(&other.capabilities).cloned().collect()
            }
            CompositionStrategy::Override => other.capabilities.clone(),
            CompositionStrategy::IntersectCapabilities => self
                .capabilities
                .intersection(&other.capabilities)
                .cloned()
                .collect(),
        };

        let (session_id, trace, metadata) = match strategy {
            CompositionStrategy::Override => (
                other.session_id.clone(),
                other.trace.clone(),
                other.metadata.clone(),
            ),
            CompositionStrategy::Merge | CompositionStrategy::IntersectCapabilities => {
                let mut metadata = self.metadata.clone();
                metadata.extend(other.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
                let mut trace = self.trace.clone();
                trace.extend(other.trace.iter().cloned());
                (
                    other.session_id.clone().or_else(|| self.session_id.clone()),
                    trace,
                    metadata,
                )
            }
        };

        Self {
            identity: other.identity.clone(),
            session_id,
            capabilities,
            correlation_id: other.correlation_id,
            hop_id: Uuid::new_v4(),
            parent_hop: Some(other.hop_id),
            trace,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// A copy of this context with one metadata entry set, as a new hop.
    pub fn with_metadata(&self, key: impl Into<String>, value: serde_json::Value) -> Self {
        let mut metadata = self.metadata.clone();
        metadata.insert(key.into(), value);
        Self {
            metadata,
            hop_id: Uuid::new_v4(),
            parent_hop: Some(self.hop_id),
            created_at: Utc::now(),
            ..self.clone()
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ContextBuilder
// ────────────────────────────────────────────────────────────────────────────

/// Assembles a root [`Context`].
///
/// Capabilities are either supplied explicitly or resolved from a
/// [`CapabilityManager`]; when neither happens the context holds nothing.
#[derive(Debug, Clone)]
pub struct ContextBuilder<C: Capability> {
    identity: String,
    session_id: Option<String>,
    capabilities: Option<HashSet<C>>,
    correlation_id: Option<Uuid>,
    metadata: BTreeMap<String, serde_json::Value>,
}

impl<C: Capability> ContextBuilder<C> {
    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn capabilities(mut self, caps: impl IntoIterator<Item = C>) -> Self {
        self.capabilities
            .get_or_insert_with(HashSet::new)
            .extend(caps);
        self
    }

    pub fn grant(self, cap: C) -> Self {
        self.capabilities([cap])
    }

    pub fn correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Fill in capabilities from `manager` unless they were already supplied.
    pub fn resolve_with(mut self, manager: &CapabilityManager<C>) -> Self {
        if self.capabilities.is_none() {
            self.capabilities = Some(manager.held_for(&self.identity));
        }
        self
    }

    pub fn build(self) -> Context<C> {
        Context {
            identity: self.identity,
            session_id: self.session_id,
            capabilities: self.capabilities.unwrap_or_default(),
            correlation_id: self.correlation_id.unwrap_or_else(Uuid::new_v4),
            hop_id: Uuid::new_v4(),
            parent_hop: None,
            trace: Vec::new(),
            metadata: self.metadata,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capgate_types::FileCap;
    use serde_json::json;

    fn ctx(identity: &str, caps: &[FileCap]) -> Context<FileCap> {
        Context::builder(identity)
            .capabilities(caps.iter().cloned())
            .build()
    }

    #[test]
    fn builder_without_capabilities_holds_nothing() {
        let c: Context<FileCap> = Context::builder("anon").build();
        assert!(c.capabilities().is_empty());
        assert!(c.session_id().is_none());
        assert!(c.parent_hop().is_none());
    }

    #[test]
    fn resolve_with_uses_manager_grants() {
        let mut mgr = CapabilityManager::new();
        mgr.grant("alice", FileCap::write("/x"));
        let c = Context::builder("alice").resolve_with(&mgr).build();
        assert!(c.holds(&FileCap::write("/x")));
    }

    #[test]
    fn explicit_capabilities_win_over_manager() {
        let mut mgr = CapabilityManager::new();
        mgr.grant("alice", FileCap::admin("/x"));
        let c = Context::builder("alice")
            .grant(FileCap::read("/x"))
            .resolve_with(&mgr)
            .build();
        assert_eq!(c.capabilities().len(), 1);
        assert!(c.holds(&FileCap::read("/x")));
    }

    #[test]
    fn propagate_regenerates_hop_id_and_appends_trace() {
        let root = Context::builder("alice")
            .session("s1")
            .grant(FileCap::read("/x"))
            .metadata("tier", json!("gold"))
            .build();
        let a = root.propagate("router");
        let b = a.propagate("files");

        assert_ne!(a.hop_id(), root.hop_id());
        assert_ne!(b.hop_id(), a.hop_id());
        assert_eq!(b.parent_hop(), Some(a.hop_id()));
        assert_eq!(b.correlation_id(), root.correlation_id());
        assert_eq!(b.trace(), ["router".to_string(), "files".to_string()]);
        assert_eq!(b.identity(), "alice");
        assert_eq!(b.session_id(), Some("s1"));
        assert_eq!(b.capabilities(), root.capabilities());
        assert_eq!(b.metadata_value("tier"), Some(&json!("gold")));
        // The parent is untouched.
        assert!(root.trace().is_empty());
    }

    #[test]
    fn merge_unions_capabilities_and_second_wins_scalars() {
        let first = Context::builder("alice")
            .session("s1")
            .grant(FileCap::read("/a"))
            .metadata("k", json!(1))
            .metadata("only_first", json!(true))
            .build();
        let second = Context::builder("bob")
            .grant(FileCap::write("/b"))
            .metadata("k", json!(2))
            .build();

        let merged = first.compose(&second, CompositionStrategy::Merge);
        assert_eq!(merged.identity(), "bob");
        // Absent in the second argument, so the first's session survives.
        assert_eq!(merged.session_id(), Some("s1"));
        assert_eq!(merged.capabilities().len(), 2);
        assert_eq!(merged.metadata_value("k"), Some(&json!(2)));
        assert_eq!(merged.metadata_value("only_first"), Some(&json!(true)));
        assert_eq!(merged.correlation_id(), second.correlation_id());
        assert_ne!(merged.hop_id(), first.hop_id());
        assert_ne!(merged.hop_id(), second.hop_id());
    }

    #[test]
    fn override_takes_second_wholesale() {
        let first = Context::builder("alice")
            .session("s1")
            .grant(FileCap::read("/a"))
            .metadata("k", json!(1))
            .build();
        let second = ctx("bob", &[FileCap::write("/b")]);

        let out = first.compose(&second, CompositionStrategy::Override);
        assert_eq!(out.identity(), "bob");
        assert!(out.session_id().is_none());
        assert_eq!(out.capabilities(), second.capabilities());
        assert!(out.metadata().is_empty());
    }

    #[test]
    fn intersect_keeps_common_capabilities() {
        let first = ctx("alice", &[FileCap::read("/a"), FileCap::write("/b")]);
        let second = ctx("alice", &[FileCap::write("/b"), FileCap::delete("/c")]);
        let out = first.compose(&second, CompositionStrategy::IntersectCapabilities);
        assert_eq!(out.capabilities().len(), 1);
        assert!(out.holds(&FileCap::write("/b")));
    }

    #[test]
    fn compose_is_total_for_empty_contexts() {
        let a: Context<FileCap> = Context::builder("a").build();
        let b: Context<FileCap> = Context::builder("b").build();
        for strategy in CompositionStrategy::ALL {
            let out = a.compose(&b, strategy);
            assert!(out.capabilities().is_empty());
            assert!(out.session_id().is_none());
            assert!(out.trace().is_empty());
        }
    }

    #[test]
    fn strategy_parses_known_names_only() {
        assert_eq!(
            "merge".parse::<CompositionStrategy>().unwrap(),
            CompositionStrategy::Merge
        );
        assert_eq!(
            "intersect-capabilities".parse::<CompositionStrategy>().unwrap(),
            CompositionStrategy::IntersectCapabilities
        );
        let err = "first-wins".parse::<CompositionStrategy>().unwrap_err();
        assert_eq!(err, UnknownStrategy("first-wins".into()));
    }

    #[test]
    fn with_metadata_returns_new_hop() {
        let c = ctx("alice", &[]);
        let d = c.with_metadata("override", json!(true));
        assert!(c.metadata().is_empty());
        assert_eq!(d.metadata_value("override"), Some(&json!(true)));
        assert_eq!(d.parent_hop(), Some(c.hop_id()));
    }

    #[test]
    fn context_serializes_to_json() {
        let c = ctx("alice", &[FileCap::read("/x")]);
        let json = serde_json::to_string(&c).unwrap();
        let back: Context<FileCap> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
