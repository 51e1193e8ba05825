//! Scheduled operation records.

use std::fmt;

use capgate_kernel::Context;
use capgate_runtime::{Effect, Intent};
use capgate_types::GateError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

type Cap<I> = <I as Intent>::Capability;

/// What a finished operation produced.
pub type Outcome<I> = Result<Vec<Effect<Cap<I>>>, GateError<Cap<I>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Scheduled,
    /// Claimed for execution; can no longer be cancelled.
    Running,
    Executed,
    Failed,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationStatus::Executed | OperationStatus::Failed)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationStatus::Scheduled => "scheduled",
            OperationStatus::Running => "running",
            OperationStatus::Executed => "executed",
            OperationStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of [`Scheduler::cancel`][crate::Scheduler::cancel].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelResult {
    Cancelled,
    /// The operation was already claimed for execution (or finished); it
    /// will end as executed or failed.
    AlreadyExecuting,
    NotFound,
}

/// One entry in the scheduler's table.
#[derive(Debug, Clone)]
pub struct ScheduledOperation<I: Intent> {
    pub id: Uuid,
    pub intent: I,
    pub context: Context<Cap<I>>,
    pub execution_time: DateTime<Utc>,
    pub status: OperationStatus,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Set once the operation reaches a terminal status.
    pub outcome: Option<Outcome<I>>,
}

impl<I: Intent> ScheduledOperation<I> {
    pub(crate) fn new(
        intent: I,
        context: Context<Cap<I>>,
        execution_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            intent,
            context,
            execution_time,
            status: OperationStatus::Scheduled,
            scheduled_at: now,
            started_at: None,
            finished_at: None,
            outcome: None,
        }
    }

    /// Milliseconds between the requested execution time and the actual
    /// start, once started.
    pub fn start_delay_ms(&self) -> Option<i64> {
        self.started_at
            .map(|started| (started - self.execution_time).num_milliseconds())
    }

    pub fn error(&self) -> Option<&GateError<Cap<I>>> {
        self.outcome.as_ref().and_then(|o| o.as_ref().err())
    }

    pub fn effects(&self) -> &[Effect<Cap<I>>] {
        match &self.outcome {
            Some(Ok(effects)) => effects,
            _ => &[],
        }
    }
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerMetrics {
    /// Operations accepted since start.
    pub scheduled: u64,
    /// Entries currently waiting.
    pub pending: usize,
    /// Entries currently executing.
    pub running: usize,
    pub executed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Mean of (start − requested execution time) over started operations.
    pub avg_delay_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use capgate_runtime::files::FileIntent;
    use chrono::Duration;

    #[test]
    fn delay_is_measured_from_requested_time() {
        let now = Utc::now();
        let mut op = ScheduledOperation::new(
            FileIntent::read("/x"),
            Context::builder("alice").build(),
            now,
            now,
        );
        assert_eq!(op.start_delay_ms(), None);
        op.started_at = Some(now + Duration::milliseconds(250));
        assert_eq!(op.start_delay_ms(), Some(250));
        assert!(op.effects().is_empty());
    }

    #[test]
    fn terminal_statuses() {
        assert!(OperationStatus::Executed.is_terminal());
        assert!(OperationStatus::Failed.is_terminal());
        assert!(!OperationStatus::Running.is_terminal());
        assert!(!OperationStatus::Scheduled.is_terminal());
    }
}
