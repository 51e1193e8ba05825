//! Temporal constraints – admission rules over `(time, context)`.
//!
//! Before an intent is scheduled, its execution time is passed through a
//! [`ConstraintSet`].  Every registered [`TemporalConstraint`] is evaluated in
//! order; the first violation is returned and the operation is **not**
//! scheduled.
//!
//! Built-in constraints:
//! - [`BusinessHours`] – an allowed daily window in a fixed UTC offset, with
//!   an optional per-context override flag.
//! - [`MaintenanceWindow`] – a closed period during which nothing may run.
//! - [`Deadline`] – nothing may run after a given instant.
//! - [`NotBefore`] – nothing may run before a given instant.
//! - [`FnConstraint`] – any closure.

use std::fmt;
use std::sync::Arc;

use capgate_kernel::Context;
use capgate_types::{Capability, TemporalViolation, TemporalViolationKind};
use chrono::{DateTime, FixedOffset, Offset, TimeZone, Timelike, Utc};
use thiserror::Error;

/// Metadata key that, when set to `true` in a context, lifts
/// [`BusinessHours`] restrictions for that context.
pub const DEFAULT_OVERRIDE_KEY: &str = "temporal.override";

const MAX_DEFERRAL_ROUNDS: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid constraint: {0}")]
pub struct InvalidConstraint(pub String);

// ────────────────────────────────────────────────────────────────────────────
// Constraint trait
// ────────────────────────────────────────────────────────────────────────────

/// A single temporal predicate.
pub trait TemporalConstraint<C: Capability>: Send + Sync {
    /// Identifier reported in violations.
    fn name(&self) -> &str;

    /// `Ok(())` when an operation may run at `at` under `context`.
    fn check(&self, at: DateTime<Utc>, context: &Context<C>) -> Result<(), TemporalViolation>;

    /// Earliest instant `>= at` this constraint would accept, if it can tell.
    fn next_valid(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let _ = at;
        None
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ConstraintSet
// ────────────────────────────────────────────────────────────────────────────

/// Ordered collection of constraints evaluated as a conjunction.
///
/// # Example
///
/// ```
/// use capgate_kernel::Context;
/// use capgate_scheduler::constraints::{BusinessHours, ConstraintSet};
/// use capgate_types::{FileCap, TemporalViolationKind};
/// use chrono::{TimeZone, Utc};
///
/// let set: ConstraintSet<FileCap> = ConstraintSet::new()
///     .with(BusinessHours::new(9, 17).unwrap());
/// let ctx = Context::builder("alice").build();
///
/// let morning = Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 0).unwrap();
/// assert!(set.validate(morning, &ctx).is_ok());
///
/// let evening = Utc.with_ymd_and_hms(2025, 1, 6, 20, 0, 0).unwrap();
/// let violation = set.validate(evening, &ctx).unwrap_err();
/// assert_eq!(violation.kind, TemporalViolationKind::OutsideAllowedWindow);
/// ```
pub struct ConstraintSet<C: Capability> {
    constraints: Vec<Arc<dyn TemporalConstraint<C>>>,
}

impl<C: Capability> Clone for ConstraintSet<C> {
    fn clone(&self) -> Self {
        Self {
            constraints: self.constraints.clone(),
        }
    }
}

impl<C: Capability> Default for ConstraintSet<C> {
    fn default() -> Self {
        Self {
            constraints: Vec::new(),
        }
    }
}

impl<C: Capability> fmt::Debug for ConstraintSet<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl<C: Capability> ConstraintSet<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a constraint.  Constraints are evaluated in insertion order.
    pub fn with(mut self, constraint: impl TemporalConstraint<C> + 'static) -> Self {
        self.push(Arc::new(constraint));
        self
    }

    pub fn push(&mut self, constraint: Arc<dyn TemporalConstraint<C>>) {
        self.constraints.push(constraint);
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.constraints.iter().map(|c| c.name()).collect()
    }

    /// Return the first violation, or `Ok(())` when every constraint holds.
    pub fn validate(&self, at: DateTime<Utc>, context: &Context<C>) -> Result<(), TemporalViolation> {
        for constraint in &self.constraints {
            constraint.check(at, context)?;
        }
        Ok(())
    }

    /// The earliest instant `>= at` that satisfies every constraint.
    ///
    /// Returns `None` when a failing constraint cannot name a later valid
    /// instant (e.g. a passed deadline) or the constraints keep pushing each
    /// other forward without settling.
    pub fn next_valid(&self, at: DateTime<Utc>, context: &Context<C>) -> Option<DateTime<Utc>> {
        let mut candidate = at;
        'rounds: for _ in 0..MAX_DEFERRAL_ROUNDS {
            for constraint in &self.constraints {
                if constraint.check(candidate, context).is_err() {
                    match constraint.next_valid(candidate) {
                        Some(next) if next > candidate => {
                            candidate = next;
                            continue 'rounds;
                        }
                        _ => return None,
                    }
                }
            }
            return Some(candidate);
        }
        None
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in constraints
// ────────────────────────────────────────────────────────────────────────────

/// Allows execution only between `start_hour` (inclusive) and `end_hour`
/// (exclusive) local time at a fixed UTC offset.
#[derive(Debug, Clone)]
pub struct BusinessHours {
    start_hour: u32,
    end_hour: u32,
    offset: FixedOffset,
    override_key: Option<String>,
}

impl BusinessHours {
    /// A UTC window honouring [`DEFAULT_OVERRIDE_KEY`].
    pub fn new(start_hour: u32, end_hour: u32) -> Result<Self, InvalidConstraint> {
        if start_hour >= end_hour || end_hour > 24 {
            return Err(InvalidConstraint(format!(
                "business hours must satisfy 0 <= start < end <= 24, got {start_hour}..{end_hour}"
            )));
        }
        Ok(Self {
            start_hour,
            end_hour,
            offset: Utc.fix(),
            override_key: Some(DEFAULT_OVERRIDE_KEY.to_string()),
        })
    }

    /// Interpret the hours at `offset_minutes` east of UTC.
    pub fn with_utc_offset(mut self, offset_minutes: i32) -> Result<Self, InvalidConstraint> {
        self.offset = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                InvalidConstraint(format!("utc offset out of range: {offset_minutes} minutes"))
            })?;
        Ok(self)
    }

    /// Use a different override flag, or none at all.
    pub fn with_override_key(mut self, key: Option<String>) -> Self {
        self.override_key = key;
        self
    }

    fn overridden<C: Capability>(&self, context: &Context<C>) -> bool {
        self.override_key
            .as_deref()
            .and_then(|key| context.metadata_value(key))
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    fn contains(&self, at: DateTime<Utc>) -> bool {
        let hour = at.with_timezone(&self.offset).hour();
        (self.start_hour..self.end_hour).contains(&hour)
    }
}

impl<C: Capability> TemporalConstraint<C> for BusinessHours {
    fn name(&self) -> &str {
        "business_hours"
    }

    fn check(&self, at: DateTime<Utc>, context: &Context<C>) -> Result<(), TemporalViolation> {
        if self.contains(at) || self.overridden(context) {
            return Ok(());
        }
        let local = at.with_timezone(&self.offset);
        Err(TemporalViolation::new(
            TemporalViolationKind::OutsideAllowedWindow,
            "business_hours",
            format!(
                "{} is outside {:02}:00-{:02}:00 ({})",
                local.format("%H:%M"),
                self.start_hour,
                self.end_hour,
                self.offset
            ),
        ))
    }

    fn next_valid(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.contains(at) {
            return Some(at);
        }
        let local = at.with_timezone(&self.offset);
        let day = if local.hour() < self.start_hour {
            local.date_naive()
        } else {
            local.date_naive().succ_opt()?
        };
        let opening = day.and_hms_opt(self.start_hour, 0, 0)?;
        self.offset
            .from_local_datetime(&opening)
            .single()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Forbids execution within `[start, end)`.
#[derive(Debug, Clone)]
pub struct MaintenanceWindow {
    pub label: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl MaintenanceWindow {
    pub fn new(
        label: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self, InvalidConstraint> {
        if end <= start {
            return Err(InvalidConstraint(
                "maintenance window must end after it starts".to_string(),
            ));
        }
        Ok(Self {
            label: label.into(),
            start,
            end,
        })
    }

    fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

impl<C: Capability> TemporalConstraint<C> for MaintenanceWindow {
    fn name(&self) -> &str {
        "maintenance_window"
    }

    fn check(&self, at: DateTime<Utc>, _context: &Context<C>) -> Result<(), TemporalViolation> {
        if !self.contains(at) {
            return Ok(());
        }
        Err(TemporalViolation::new(
            TemporalViolationKind::MaintenanceWindow,
            "maintenance_window",
            format!("'{}' runs until {}", self.label, self.end.to_rfc3339()),
        ))
    }

    fn next_valid(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        Some(if self.contains(at) { self.end } else { at })
    }
}

/// Forbids execution after `deadline`.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    pub deadline: DateTime<Utc>,
}

impl<C: Capability> TemporalConstraint<C> for Deadline {
    fn name(&self) -> &str {
        "deadline"
    }

    fn check(&self, at: DateTime<Utc>, _context: &Context<C>) -> Result<(), TemporalViolation> {
        if at <= self.deadline {
            return Ok(());
        }
        Err(TemporalViolation::new(
            TemporalViolationKind::DeadlinePassed,
            "deadline",
            format!(
                "{} is past the deadline {}",
                at.to_rfc3339(),
                self.deadline.to_rfc3339()
            ),
        ))
    }
}

/// Forbids execution before `earliest`.
#[derive(Debug, Clone, Copy)]
pub struct NotBefore {
    pub earliest: DateTime<Utc>,
}

impl<C: Capability> TemporalConstraint<C> for NotBefore {
    fn name(&self) -> &str {
        "not_before"
    }

    fn check(&self, at: DateTime<Utc>, _context: &Context<C>) -> Result<(), TemporalViolation> {
        if at >= self.earliest {
            return Ok(());
        }
        let early_by = self.earliest - at;
        Err(TemporalViolation::new(
            TemporalViolationKind::TooEarly,
            "not_before",
            format!(
                "{} ms before {}",
                early_by.num_milliseconds(),
                self.earliest.to_rfc3339()
            ),
        ))
    }

    fn next_valid(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        Some(at.max(self.earliest))
    }
}

/// A named closure.
pub struct FnConstraint<F> {
    name: String,
    predicate: F,
}

impl<F> FnConstraint<F> {
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

impl<C, F> TemporalConstraint<C> for FnConstraint<F>
where
    C: Capability,
    F: Fn(DateTime<Utc>, &Context<C>) -> Result<(), TemporalViolation> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, at: DateTime<Utc>, context: &Context<C>) -> Result<(), TemporalViolation> {
        (self.predicate)(at, context)
    }
}
