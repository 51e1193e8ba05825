//! [`Scheduler`] – temporal admission control around intent dispatch.
//!
//! `schedule_intent` validates the requested execution time against the
//! scheduler's [`ConstraintSet`], records a [`ScheduledOperation`], and
//! arranges for it to run according to the configured
//! [`SchedulingStrategy`]:
//!
//! - **immediate** – a due operation is executed inside the
//!   `schedule_intent` call; a future one gets a timer.
//! - **delayed** – one timer task per operation.
//! - **bounded-fifo** – a single queue task releases due operations in
//!   execution-time order, holding a semaphore permit per running operation
//!   so at most `max_concurrent` execute at once.
//!
//! Execution re-checks that the operation is due, claims it (status
//! `running`, no longer cancellable), re-validates the constraints at the
//! actual start time, dispatches through a [`DispatchTarget`], and records
//! `executed` or `failed` with the outcome.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use capgate_kernel::Context;
use capgate_runtime::{DispatchTarget, Intent};
use capgate_types::{GateError, TemporalViolation, TemporalViolationKind};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::constraints::{ConstraintSet, TemporalConstraint};
use crate::operation::{
    CancelResult, OperationStatus, Outcome, ScheduledOperation, SchedulerMetrics,
};
use crate::strategy::SchedulingStrategy;

type Cap<I> = <I as Intent>::Capability;

/// Longest single sleep of a timer before it re-reads the clock.
const MAX_TIMER_SLICE: Duration = Duration::from_secs(1);

type QueueEntry = Reverse<(DateTime<Utc>, u64, Uuid)>;

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    pub strategy: SchedulingStrategy,
    /// Transition timeout passed to the dispatch target.
    pub dispatch_timeout: Option<Duration>,
    /// Move an execution time that violates a constraint to the next
    /// instant all constraints accept, instead of rejecting it.
    pub defer_to_next_window: bool,
}

/// Configures and builds a [`Scheduler`].
pub struct SchedulerBuilder<I: Intent> {
    target: Arc<dyn DispatchTarget<I>>,
    constraints: ConstraintSet<Cap<I>>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl<I: Intent> SchedulerBuilder<I> {
    pub fn strategy(mut self, strategy: SchedulingStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn constraints(mut self, constraints: ConstraintSet<Cap<I>>) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn constraint(mut self, constraint: impl TemporalConstraint<Cap<I>> + 'static) -> Self {
        self.constraints = self.constraints.with(constraint);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.config.dispatch_timeout = Some(timeout);
        self
    }

    pub fn defer_to_next_window(mut self, defer: bool) -> Self {
        self.config.defer_to_next_window = defer;
        self
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the scheduler.  Must be called from within a Tokio runtime
    /// when the strategy is bounded-fifo (the queue task is spawned here).
    pub fn build(self) -> Scheduler<I> {
        let (queue, fifo) = match self.config.strategy {
            SchedulingStrategy::BoundedFifo { max_concurrent } => {
                let (tx, rx) = mpsc::unbounded_channel();
                (Some(tx), Some((rx, max_concurrent.max(1))))
            }
            _ => (None, None),
        };

        let inner = Arc::new(Inner {
            target: self.target,
            constraints: self.constraints,
            clock: self.clock,
            config: self.config,
            table: Mutex::new(HashMap::new()),
            timers: Mutex::new(HashMap::new()),
            queue,
            next_seq: AtomicU64::new(0),
            stats: Mutex::new(Stats::default()),
        });

        if let Some((rx, max_concurrent)) = fifo {
            tokio::spawn(run_fifo(
                Arc::downgrade(&inner),
                rx,
                Arc::new(Semaphore::new(max_concurrent)),
            ));
        }

        info!(
            strategy = %inner.config.strategy,
            constraints = ?inner.constraints,
            defer_to_next_window = inner.config.defer_to_next_window,
            "scheduler started"
        );
        Scheduler { inner }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scheduler
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Stats {
    scheduled: u64,
    executed: u64,
    failed: u64,
    cancelled: u64,
    delay_total_ms: f64,
    delay_samples: u64,
}

struct Inner<I: Intent> {
    target: Arc<dyn DispatchTarget<I>>,
    constraints: ConstraintSet<Cap<I>>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    table: Mutex<HashMap<Uuid, ScheduledOperation<I>>>,
    timers: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    queue: Option<mpsc::UnboundedSender<(DateTime<Utc>, u64, Uuid)>>,
    next_seq: AtomicU64,
    stats: Mutex<Stats>,
}

impl<I: Intent> Inner<I> {
    /// Real time left until `at` by the scheduler's clock; zero when due.
    fn until(&self, at: DateTime<Utc>) -> Duration {
        (at - self.clock.now()).to_std().unwrap_or(Duration::ZERO)
    }

    fn is_scheduled(&self, id: Uuid) -> bool {
        self.table
            .lock()
            .get(&id)
            .is_some_and(|op| op.status == OperationStatus::Scheduled)
    }
}

/// Temporal scheduler over one dispatch target.  Cheap to clone.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use capgate_kernel::{CapabilityGate, Context, file_algebra};
/// use capgate_runtime::ReactorHandle;
/// use capgate_runtime::files::{FileIntent, FileStore, FileStoreReactor};
/// use capgate_scheduler::{OperationStatus, Scheduler, SchedulingStrategy};
/// use capgate_types::FileCap;
/// use chrono::{Duration, Utc};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let files = ReactorHandle::builder(FileStoreReactor, FileStore::default(), CapabilityGate::new(file_algebra()))
///     .spawn();
/// let scheduler = Scheduler::builder(Arc::new(files))
///     .strategy(SchedulingStrategy::Immediate)
///     .build();
///
/// let ctx = Context::builder("alice").grant(FileCap::write("/x")).build();
/// let id = scheduler
///     .schedule_intent(FileIntent::write("/x", "hi"), ctx, Utc::now() - Duration::seconds(1))
///     .await
///     .unwrap();
/// assert_eq!(scheduler.get(id).unwrap().status, OperationStatus::Executed);
/// # }
/// ```
pub struct Scheduler<I: Intent> {
    inner: Arc<Inner<I>>,
}

impl<I: Intent> Clone for Scheduler<I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I: Intent> Scheduler<I> {
    pub fn builder(target: Arc<dyn DispatchTarget<I>>) -> SchedulerBuilder<I> {
        SchedulerBuilder {
            target,
            constraints: ConstraintSet::new(),
            clock: Arc::new(SystemClock),
            config: SchedulerConfig::default(),
        }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.inner.config.strategy
    }

    /// The scheduler clock's current time.
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Validate and record an operation, then arrange its execution.
    ///
    /// # Errors
    ///
    /// [`GateError::TemporalConstraintViolation`] with the first failing
    /// constraint (unless deferral is enabled and a later valid instant
    /// exists); nothing is recorded in that case.
    pub async fn schedule_intent(
        &self,
        intent: I,
        context: Context<Cap<I>>,
        execution_time: DateTime<Utc>,
    ) -> Result<Uuid, GateError<Cap<I>>> {
        let inner = &self.inner;
        let intent_name = intent.name();

        let execution_time = match inner.constraints.validate(execution_time, &context) {
            Ok(()) => execution_time,
            Err(violation) if inner.config.defer_to_next_window => {
                match inner.constraints.next_valid(execution_time, &context) {
                    Some(next) => {
                        info!(
                            intent = intent_name,
                            requested = %execution_time,
                            deferred_to = %next,
                            constraint = %violation.constraint,
                            "execution deferred to next valid window"
                        );
                        next
                    }
                    None => {
                        info!(intent = intent_name, %violation, "schedule rejected; no later window");
                        return Err(violation.into());
                    }
                }
            }
            Err(violation) => {
                info!(intent = intent_name, identity = %context.identity(), %violation, "schedule rejected");
                return Err(violation.into());
            }
        };

        let now = inner.clock.now();
        let op = ScheduledOperation::new(intent, context, execution_time, now);
        let id = op.id;
        inner.table.lock().insert(id, op);
        inner.stats.lock().scheduled += 1;
        info!(
            %id,
            intent = intent_name,
            execution_time = %execution_time,
            strategy = inner.config.strategy.name(),
            "operation scheduled"
        );

        let due = execution_time <= now;
        match inner.config.strategy {
            SchedulingStrategy::Immediate if due => {
                self.wake(id, execution_time, "inline").await;
            }
            SchedulingStrategy::Immediate | SchedulingStrategy::Delayed => {
                self.arm_timer(id, execution_time);
            }
            SchedulingStrategy::BoundedFifo { .. } => {
                let seq = inner.next_seq.fetch_add(1, Ordering::Relaxed);
                let queued = inner
                    .queue
                    .as_ref()
                    .is_some_and(|q| q.send((execution_time, seq, id)).is_ok());
                if !queued {
                    inner.table.lock().remove(&id);
                    inner.stats.lock().scheduled -= 1;
                    return Err(GateError::Channel("scheduler queue closed".to_string()));
                }
            }
        }
        Ok(id)
    }

    /// Run operation `id` if it is due and still scheduled.
    ///
    /// Returns the operation's status afterwards.  A wake-up for an
    /// operation that already left `scheduled` is a no-op reporting the
    /// current status.
    ///
    /// # Errors
    ///
    /// - [`GateError::OperationNotFound`] for an unknown or cancelled id.
    /// - [`GateError::TemporalConstraintViolation`] (`TooEarly`) when the
    ///   execution time has not been reached; the operation stays scheduled.
    pub async fn execute_scheduled(&self, id: Uuid) -> Result<OperationStatus, GateError<Cap<I>>> {
        let inner = &self.inner;
        let now = inner.clock.now();

        let (intent, context, execution_time) = {
            let mut table = inner.table.lock();
            let op = table.get_mut(&id).ok_or(GateError::OperationNotFound(id))?;
            if op.status != OperationStatus::Scheduled {
                debug!(%id, status = %op.status, "duplicate wake-up ignored");
                return Ok(op.status);
            }
            if now < op.execution_time {
                let early_ms = (op.execution_time - now).num_milliseconds();
                debug!(%id, early_ms, "early wake-up ignored");
                return Err(TemporalViolation::new(
                    TemporalViolationKind::TooEarly,
                    "execution_time",
                    format!("operation {id} is due in {early_ms} ms"),
                )
                .into());
            }
            op.status = OperationStatus::Running;
            op.started_at = Some(now);
            (op.intent.clone(), op.context.clone(), op.execution_time)
        };

        {
            let mut stats = inner.stats.lock();
            stats.delay_total_ms += (now - execution_time).num_milliseconds().max(0) as f64;
            stats.delay_samples += 1;
        }

        let intent_name = intent.name();
        debug!(%id, intent = intent_name, "executing scheduled operation");
        let outcome = match inner.constraints.validate(now, &context) {
            Err(violation) => Err(violation.into()),
            Ok(()) => {
                inner
                    .target
                    .dispatch_effects(intent, context, inner.config.dispatch_timeout)
                    .await
            }
        };
        Ok(self.finish(id, intent_name, outcome))
    }

    fn finish(&self, id: Uuid, intent_name: &str, outcome: Outcome<I>) -> OperationStatus {
        let inner = &self.inner;
        let now = inner.clock.now();
        let status = match &outcome {
            Ok(effects) => {
                info!(%id, intent = intent_name, effects = effects.len(), "operation executed");
                OperationStatus::Executed
            }
            Err(e) => {
                warn!(%id, intent = intent_name, code = e.code(), error = %e, "operation failed");
                OperationStatus::Failed
            }
        };

        if let Some(op) = inner.table.lock().get_mut(&id) {
            op.status = status;
            op.finished_at = Some(now);
            op.outcome = Some(outcome);
        }
        let mut stats = inner.stats.lock();
        match status {
            OperationStatus::Executed => stats.executed += 1,
            _ => stats.failed += 1,
        }
        status
    }

    /// Cancel an operation that has not started.
    pub fn cancel(&self, id: Uuid) -> CancelResult {
        let inner = &self.inner;
        let result = {
            let mut table = inner.table.lock();
            match table.get(&id).map(|op| op.status) {
                None => CancelResult::NotFound,
                Some(OperationStatus::Scheduled) => {
                    table.remove(&id);
                    CancelResult::Cancelled
                }
                Some(_) => CancelResult::AlreadyExecuting,
            }
        };
        if result == CancelResult::Cancelled {
            if let Some(timer) = inner.timers.lock().remove(&id) {
                timer.abort();
            }
            inner.stats.lock().cancelled += 1;
            info!(%id, "operation cancelled");
        } else {
            debug!(%id, ?result, "cancel refused");
        }
        result
    }

    /// Remove executed and failed entries that finished at least
    /// `retention` ago.  Scheduled and running entries are never removed.
    pub fn cleanup(&self, retention: Duration) -> usize {
        let now = self.inner.clock.now();
        let Some(cutoff) = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|r| now.checked_sub_signed(r))
        else {
            return 0;
        };

        let mut table = self.inner.table.lock();
        let before = table.len();
        table.retain(|_, op| {
            !(op.status.is_terminal() && op.finished_at.is_some_and(|t| t <= cutoff))
        });
        let removed = before - table.len();
        if removed > 0 {
            debug!(removed, remaining = table.len(), "scheduler cleanup");
        }
        removed
    }

    /// Run [`cleanup`][Self::cleanup] every `interval` until the scheduler
    /// is dropped.
    pub fn spawn_janitor(&self, interval: Duration, retention: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                Scheduler { inner }.cleanup(retention);
            }
            debug!("scheduler janitor stopped");
        })
    }

    pub fn get(&self, id: Uuid) -> Option<ScheduledOperation<I>> {
        self.inner.table.lock().get(&id).cloned()
    }

    /// All retained operations ordered by execution time.
    pub fn list(&self) -> Vec<ScheduledOperation<I>> {
        let mut ops: Vec<_> = self.inner.table.lock().values().cloned().collect();
        ops.sort_by_key(|op| (op.execution_time, op.scheduled_at));
        ops
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        let (pending, running) = {
            let table = self.inner.table.lock();
            let pending = table
                .values()
                .filter(|op| op.status == OperationStatus::Scheduled)
                .count();
            let running = table
                .values()
                .filter(|op| op.status == OperationStatus::Running)
                .count();
            (pending, running)
        };
        let stats = self.inner.stats.lock();
        SchedulerMetrics {
            scheduled: stats.scheduled,
            pending,
            running,
            executed: stats.executed,
            failed: stats.failed,
            cancelled: stats.cancelled,
            avg_delay_ms: if stats.delay_samples == 0 {
                0.0
            } else {
                stats.delay_total_ms / stats.delay_samples as f64
            },
        }
    }

    fn arm_timer(&self, id: Uuid, execution_time: DateTime<Utc>) {
        let weak = Arc::downgrade(&self.inner);
        // Held across the spawn so the task cannot remove its entry first.
        let mut timers = self.inner.timers.lock();
        let handle = tokio::spawn(async move {
            loop {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let wait = inner.until(execution_time);
                drop(inner);
                if wait.is_zero() {
                    break;
                }
                tokio::time::sleep(wait.min(MAX_TIMER_SLICE)).await;
            }
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.timers.lock().remove(&id);
            Scheduler { inner }.wake(id, execution_time, "timer").await;
        });
        timers.insert(id, handle);
    }

    /// Execution entry for timers, the queue, and inline runs.  An early
    /// wake-up puts the operation back in line for its execution time.
    async fn wake(&self, id: Uuid, execution_time: DateTime<Utc>, source: &'static str) {
        match self.execute_scheduled(id).await {
            Ok(_) => {}
            Err(GateError::TemporalConstraintViolation(v))
                if v.kind == TemporalViolationKind::TooEarly =>
            {
                self.requeue(id, execution_time, source);
            }
            Err(e) => debug!(%id, source, error = %e, "wake-up skipped"),
        }
    }

    fn requeue(&self, id: Uuid, execution_time: DateTime<Utc>, source: &'static str) {
        let inner = &self.inner;
        if !inner.is_scheduled(id) {
            return;
        }
        match &inner.queue {
            Some(queue) => {
                let seq = inner.next_seq.fetch_add(1, Ordering::Relaxed);
                if queue.send((execution_time, seq, id)).is_err() {
                    warn!(%id, "scheduler queue closed; early operation left scheduled");
                    return;
                }
            }
            None => self.arm_timer(id, execution_time),
        }
        debug!(%id, source, %execution_time, "early wake-up; operation re-armed");
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Bounded FIFO queue
// ────────────────────────────────────────────────────────────────────────────

async fn run_fifo<I: Intent>(
    weak: Weak<Inner<I>>,
    mut incoming: mpsc::UnboundedReceiver<(DateTime<Utc>, u64, Uuid)>,
    permits: Arc<Semaphore>,
) {
    let mut heap: BinaryHeap<QueueEntry> = BinaryHeap::new();
    loop {
        // Release every due entry in (execution time, arrival) order.
        let wait = loop {
            let Some(Reverse((at, _, id))) = heap.peek().copied() else {
                break None;
            };
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let wait = inner.until(at);
            if !wait.is_zero() {
                break Some(wait.min(MAX_TIMER_SLICE));
            }
            heap.pop();
            if !inner.is_scheduled(id) {
                continue;
            }
            drop(inner);

            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                return;
            };
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let scheduler = Scheduler { inner };
            tokio::spawn(async move {
                let _permit = permit;
                scheduler.wake(id, at, "queue").await;
            });
        };

        tokio::select! {
            entry = incoming.recv() => match entry {
                Some(entry) => heap.push(Reverse(entry)),
                None => break,
            },
            _ = tokio::time::sleep(wait.unwrap_or(MAX_TIMER_SLICE)), if wait.is_some() => {}
        }
    }
    debug!("scheduler queue stopped");
}
