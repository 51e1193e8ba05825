//! `capgate-types` – shared vocabulary for the dispatch core.
//!
//! Holds the [`Capability`] trait every permission type implements, the
//! sample [`FileCap`] capability type, and the error taxonomy
//! ([`GateError`]) returned by every layer above it.

use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Capability
// ────────────────────────────────────────────────────────────────────────────

/// An immutable, structurally comparable permission value.
///
/// A capability is an *operation* bound to a *scope*.  Implication tables are
/// declared over operations (`write ⇒ read`) and only ever relate
/// capabilities that share a scope, so `write("/x")` implies `read("/x")` but
/// never `read("/y")`.  Nullary tags (e.g. an `Admin` role) use `Self` as the
/// operation and have an empty scope.
pub trait Capability: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// The operation tag the implication table is keyed on.
    type Op: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// The operation this capability grants.
    fn op(&self) -> Self::Op;

    /// The same scope with a different operation.
    fn with_op(&self, op: Self::Op) -> Self;
}

/// Operations understood by [`FileCap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOp {
    Admin,
    Read,
    Write,
    Delete,
}

impl fmt::Display for FileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileOp::Admin => write!(f, "admin"),
            FileOp::Read => write!(f, "read"),
            FileOp::Write => write!(f, "write"),
            FileOp::Delete => write!(f, "delete"),
        }
    }
}

impl FromStr for FileOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(FileOp::Admin),
            "read" => Ok(FileOp::Read),
            "write" => Ok(FileOp::Write),
            "delete" => Ok(FileOp::Delete),
            other => Err(format!("unknown file operation '{other}'")),
        }
    }
}

/// File-system style capability: an operation on a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileCap {
    pub op: FileOp,
    pub path: String,
}

impl FileCap {
    pub fn new(op: FileOp, path: impl Into<String>) -> Self {
        Self {
            op,
            path: path.into(),
        }
    }

    pub fn admin(path: impl Into<String>) -> Self {
        Self::new(FileOp::Admin, path)
    }

    pub fn read(path: impl Into<String>) -> Self {
        Self::new(FileOp::Read, path)
    }

    pub fn write(path: impl Into<String>) -> Self {
        Self::new(FileOp::Write, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(FileOp::Delete, path)
    }
}

impl Capability for FileCap {
    type Op = FileOp;

    fn op(&self) -> FileOp {
        self.op
    }

    fn with_op(&self, op: FileOp) -> Self {
        Self {
            op,
            path: self.path.clone(),
        }
    }
}

impl fmt::Display for FileCap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.op, self.path)
    }
}

/// Parses the [`Display`](fmt::Display) form, e.g. `write(/x)`.
impl FromStr for FileCap {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (op, rest) = s
            .split_once('(')
            .ok_or_else(|| format!("expected op(path), got '{s}'"))?;
        let path = rest
            .strip_suffix(')')
            .filter(|p| !p.is_empty())
            .ok_or_else(|| format!("expected op(path), got '{s}'"))?;
        Ok(FileCap::new(op.trim().parse()?, path))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Temporal violations
// ────────────────────────────────────────────────────────────────────────────

/// Category of a failed temporal predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalViolationKind {
    OutsideAllowedWindow,
    MaintenanceWindow,
    DeadlinePassed,
    TooEarly,
}

impl fmt::Display for TemporalViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemporalViolationKind::OutsideAllowedWindow => write!(f, "outside allowed window"),
            TemporalViolationKind::MaintenanceWindow => write!(f, "maintenance window"),
            TemporalViolationKind::DeadlinePassed => write!(f, "deadline passed"),
            TemporalViolationKind::TooEarly => write!(f, "too early"),
        }
    }
}

/// The first temporal predicate that rejected a scheduling request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalViolation {
    pub kind: TemporalViolationKind,
    /// Name of the constraint that failed (e.g. `"business_hours"`).
    pub constraint: String,
    pub reason: String,
}

impl TemporalViolation {
    pub fn new(
        kind: TemporalViolationKind,
        constraint: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            constraint: constraint.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for TemporalViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.kind, self.constraint, self.reason)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// GateError
// ────────────────────────────────────────────────────────────────────────────

/// Error taxonomy shared by the gate, the reactors, and the scheduler.
///
/// Capability and temporal violations are routine outcomes of an
/// authorization system and are returned as values; nothing here is meant to
/// be escalated into a panic.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GateError<C> {
    /// The context lacks the listed capabilities.  Only the missing
    /// identifiers are reported, never the rest of the held set.
    #[error("Insufficient capabilities: missing {missing:?}")]
    InsufficientCapabilities { missing: Vec<C> },

    #[error("No reactor handles intent '{0}'")]
    UnknownIntent(String),

    #[error("Transition of '{intent}' failed: {reason}")]
    TransitionFailed {
        intent: String,
        reason: String,
        transient: bool,
    },

    #[error("Temporal constraint violated: {0}")]
    TemporalConstraintViolation(TemporalViolation),

    #[error("Transition of '{intent}' timed out after {after_ms} ms")]
    Timeout { intent: String, after_ms: u64 },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Scheduled operation not found: {0}")]
    OperationNotFound(Uuid),
}

impl<C> GateError<C> {
    /// Whether a caller-level retry policy may sensibly try again.
    ///
    /// Capability, temporal, and configuration errors never become valid by
    /// retrying the same request.
    pub fn is_retryable(&self) -> bool {
        match self {
            GateError::Timeout { .. } => true,
            GateError::TransitionFailed { transient, .. } => *transient,
            _ => false,
        }
    }

    /// Short machine-readable label, used in logs and operation outcomes.
    pub fn code(&self) -> &'static str {
        match self {
            GateError::InsufficientCapabilities { .. } => "insufficient_capabilities",
            GateError::UnknownIntent(_) => "unknown_intent",
            GateError::TransitionFailed { .. } => "transition_failed",
            GateError::TemporalConstraintViolation(_) => "temporal_constraint_violation",
            GateError::Timeout { .. } => "timeout",
            GateError::Configuration(_) => "configuration",
            GateError::Channel(_) => "channel",
            GateError::OperationNotFound(_) => "operation_not_found",
        }
    }
}

impl<C> From<TemporalViolation> for GateError<C> {
    fn from(v: TemporalViolation) -> Self {
        GateError::TemporalConstraintViolation(v)
    }
}
