//! `capgate-scheduler` – time-based admission control for intent dispatch.
//!
//! # Modules
//!
//! - [`constraints`] – [`TemporalConstraint`] predicates over
//!   `(time, context)` ([`BusinessHours`], [`MaintenanceWindow`],
//!   [`Deadline`], [`NotBefore`], [`FnConstraint`]) composed into a
//!   [`ConstraintSet`] where the first failure wins.
//! - [`strategy`] – [`SchedulingStrategy`]: immediate, delayed, or
//!   bounded-concurrency FIFO.
//! - [`operation`] – [`ScheduledOperation`] records, [`OperationStatus`],
//!   [`CancelResult`], and [`SchedulerMetrics`].
//! - [`scheduler`] – [`Scheduler`]: schedule, execute, cancel, cleanup,
//!   metrics, and a periodic janitor.
//! - [`clock`] – [`Clock`] with [`SystemClock`] and a settable
//!   [`ManualClock`].

pub mod clock;
pub mod constraints;
pub mod operation;
pub mod scheduler;
pub mod strategy;

pub use clock::{Clock, ManualClock, SystemClock};
pub use constraints::{
    BusinessHours, ConstraintSet, DEFAULT_OVERRIDE_KEY, Deadline, FnConstraint,
    InvalidConstraint, MaintenanceWindow, NotBefore, TemporalConstraint,
};
pub use operation::{CancelResult, OperationStatus, Outcome, ScheduledOperation, SchedulerMetrics};
pub use scheduler::{Scheduler, SchedulerBuilder, SchedulerConfig};
pub use strategy::{SchedulingStrategy, StrategyError};
