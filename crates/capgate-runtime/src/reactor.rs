//! Reactors – capability-gated, sequentially processed state machines.
//!
//! A [`Reactor`] supplies a pure transition function
//! `(intent, state) -> Result<(new_state, emissions), ReactorError>`.
//! [`ReactorHandle`] wraps it in a single-writer worker: one task owns the
//! state and drains a mailbox, so dispatches to one instance never interleave
//! while different instances run fully in parallel.
//!
//! Each dispatch moves through the phases of [`DispatchPhase`]:
//!
//! 1. **CapabilityCheck** – on the caller's task, before the mailbox.  The
//!    context must imply every capability the intent requires; otherwise the
//!    caller receives [`GateError::InsufficientCapabilities`] and the reactor
//!    never sees the intent.
//! 2. **Processing** – the worker runs the transition on a snapshot of its
//!    state on the blocking pool, bounded by the dispatch timeout.
//! 3. **Emitting** – the new state is committed, and effects are queued on
//!    the reactor's FIFO emitter for asynchronous execution by the sink.
//!
//! A failed or timed-out transition leaves the committed state untouched.
//!
//! # Example
//!
//! ```
//! use capgate_kernel::{CapabilityGate, Context, file_algebra};
//! use capgate_runtime::files::{FileIntent, FileStore, FileStoreReactor};
//! use capgate_runtime::ReactorHandle;
//! use capgate_types::FileCap;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let handle = ReactorHandle::builder(
//!     FileStoreReactor,
//!     FileStore::default(),
//!     CapabilityGate::new(file_algebra()),
//! )
//! .spawn();
//!
//! let ctx = Context::builder("alice").grant(FileCap::write("/x")).build();
//! let done = handle
//!     .dispatch(FileIntent::write("/x", "hello"), ctx)
//!     .await
//!     .unwrap();
//! assert_eq!(done.state.get("/x"), Some("hello"));
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use capgate_kernel::{CapabilityGate, Context};
use capgate_types::GateError;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::bus::EffectBus;
use crate::effect::{Effect, Emission};
use crate::intent::Intent;
use crate::router::DispatchTarget;
use crate::sink::{EffectSink, TracingSink, spawn_emitter};

/// Capability type of a reactor's intents.
pub type CapOf<R> = <<R as Reactor>::Intent as Intent>::Capability;

/// Result of a dispatch against a [`ReactorHandle`].
pub type DispatchResult<R> =
    Result<Dispatched<<R as Reactor>::State, CapOf<R>>, GateError<CapOf<R>>>;

const DEFAULT_MAILBOX_CAPACITY: usize = 64;

// ────────────────────────────────────────────────────────────────────────────
// Reactor trait
// ────────────────────────────────────────────────────────────────────────────

/// Error returned by a transition function.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct ReactorError {
    pub reason: String,
    /// Whether retrying the same intent later may succeed.
    pub transient: bool,
}

impl ReactorError {
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            transient: false,
        }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            transient: true,
        }
    }

    /// Lifts the error into the gate taxonomy, tagged with the intent it
    /// was raised for.
    pub fn into_gate<C>(self, intent: impl Into<String>) -> GateError<C> {
        GateError::TransitionFailed {
            intent: intent.into(),
            reason: self.reason,
            transient: self.transient,
        }
    }
}

/// The new state plus the effects a transition wants emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<S> {
    pub state: S,
    pub emissions: Vec<Emission>,
}

impl<S> Transition<S> {
    pub fn to(state: S) -> Self {
        Self {
            state,
            emissions: Vec::new(),
        }
    }

    pub fn emit(mut self, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        self.emissions.push(Emission::new(kind, payload));
        self
    }
}

/// A state machine driven by intents.
///
/// `transition` must be deterministic in `(intent, state)`: no clocks, no
/// I/O, no shared mutable state.  Anything observable belongs in an emission.
pub trait Reactor: Send + Sync + 'static {
    type Intent: Intent;
    type State: Clone + fmt::Debug + Send + Sync + 'static;

    fn transition(
        &self,
        intent: &Self::Intent,
        state: &Self::State,
    ) -> Result<Transition<Self::State>, ReactorError>;
}

/// Lifecycle of a single dispatch, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPhase {
    Idle,
    CapabilityCheck,
    Processing,
    Emitting,
    Done,
    Rejected,
    Failed,
}

impl fmt::Display for DispatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DispatchPhase::Idle => "idle",
            DispatchPhase::CapabilityCheck => "capability_check",
            DispatchPhase::Processing => "processing",
            DispatchPhase::Emitting => "emitting",
            DispatchPhase::Done => "done",
            DispatchPhase::Rejected => "rejected",
            DispatchPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A committed transition: the new state and the effects it emitted (all
/// still [`Pending`][crate::effect::EffectStatus::Pending]).
#[derive(Debug, Clone)]
pub struct Dispatched<S, C: capgate_types::Capability> {
    pub state: S,
    pub effects: Vec<Effect<C>>,
}

// ────────────────────────────────────────────────────────────────────────────
// Mailbox protocol
// ────────────────────────────────────────────────────────────────────────────

enum Command<R: Reactor> {
    Dispatch {
        intent: R::Intent,
        context: Context<CapOf<R>>,
        timeout: Option<Duration>,
        reply: oneshot::Sender<DispatchResult<R>>,
    },
    Snapshot {
        reply: oneshot::Sender<R::State>,
    },
}

// ────────────────────────────────────────────────────────────────────────────
// Builder
// ────────────────────────────────────────────────────────────────────────────

/// Configures and spawns a [`ReactorHandle`].
pub struct ReactorBuilder<R: Reactor> {
    reactor: R,
    initial: R::State,
    gate: CapabilityGate<CapOf<R>>,
    name: String,
    sink: Arc<dyn EffectSink<CapOf<R>>>,
    bus: Option<EffectBus<CapOf<R>>>,
    default_timeout: Option<Duration>,
    mailbox_capacity: usize,
}

impl<R: Reactor> ReactorBuilder<R> {
    /// Registry name; also appended to each dispatched context's trace.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EffectSink<CapOf<R>>>) -> Self {
        self.sink = sink;
        self
    }

    /// Publish every settled effect on `bus`.
    pub fn bus(mut self, bus: EffectBus<CapOf<R>>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Timeout applied to dispatches that do not supply their own.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity.max(1);
        self
    }

    /// Spawn the worker and emitter tasks.  Must be called from within a
    /// Tokio runtime.
    pub fn spawn(self) -> ReactorHandle<R> {
        let name: Arc<str> = Arc::from(self.name.as_str());
        let (tx, rx) = mpsc::channel(self.mailbox_capacity);
        let emitter = spawn_emitter(Arc::clone(&name), self.sink, self.bus);
        tokio::spawn(run_worker(
            Arc::new(self.reactor),
            self.initial,
            rx,
            emitter,
            Arc::clone(&name),
        ));
        info!(reactor = %name, "reactor started");
        ReactorHandle {
            name,
            gate: self.gate,
            mailbox: tx,
            default_timeout: self.default_timeout,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ReactorHandle
// ────────────────────────────────────────────────────────────────────────────

/// Cloneable front door to one reactor instance.
pub struct ReactorHandle<R: Reactor> {
    name: Arc<str>,
    gate: CapabilityGate<CapOf<R>>,
    mailbox: mpsc::Sender<Command<R>>,
    default_timeout: Option<Duration>,
}

impl<R: Reactor> Clone for ReactorHandle<R> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            gate: self.gate.clone(),
            mailbox: self.mailbox.clone(),
            default_timeout: self.default_timeout,
        }
    }
}

impl<R: Reactor> fmt::Debug for ReactorHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactorHandle")
            .field("name", &self.name)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl<R: Reactor> ReactorHandle<R> {
    pub fn builder(
        reactor: R,
        initial: R::State,
        gate: CapabilityGate<CapOf<R>>,
    ) -> ReactorBuilder<R> {
        ReactorBuilder {
            reactor,
            initial,
            gate,
            name: std::any::type_name::<R>()
                .rsplit("::")
                .next()
                .unwrap_or("reactor")
                .to_string(),
            sink: Arc::new(TracingSink),
            bus: None,
            default_timeout: None,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dispatch under the handle's default timeout (if any).
    pub async fn dispatch(
        &self,
        intent: R::Intent,
        context: Context<CapOf<R>>,
    ) -> DispatchResult<R> {
        self.submit(intent, context, self.default_timeout).await
    }

    /// Dispatch with a caller-supplied timeout on the transition function.
    pub async fn dispatch_with_timeout(
        &self,
        intent: R::Intent,
        context: Context<CapOf<R>>,
        timeout: Duration,
    ) -> DispatchResult<R> {
        self.submit(intent, context, Some(timeout)).await
    }

    /// The currently committed state, read through the mailbox so it is
    /// ordered with respect to dispatches.
    pub async fn state(&self) -> Result<R::State, GateError<CapOf<R>>> {
        let (reply, rx) = oneshot::channel();
        self.mailbox
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| self.closed())?;
        rx.await.map_err(|_| self.closed())
    }

    async fn submit(
        &self,
        intent: R::Intent,
        context: Context<CapOf<R>>,
        timeout: Option<Duration>,
    ) -> DispatchResult<R> {
        let intent_name = intent.name();
        debug!(reactor = %self.name, intent = intent_name, phase = %DispatchPhase::CapabilityCheck);

        let required = intent.required_capabilities();
        if let Err(rejection) = self.gate.authorize(context.capabilities(), &required) {
            info!(
                reactor = %self.name,
                intent = intent_name,
                identity = %context.identity(),
                correlation_id = %context.correlation_id(),
                phase = %DispatchPhase::Rejected,
                "dispatch rejected"
            );
            return Err(rejection);
        }

        let context = context.propagate(&self.name);
        let (reply, rx) = oneshot::channel();
        self.mailbox
            .send(Command::Dispatch {
                intent,
                context,
                timeout,
                reply,
            })
            .await
            .map_err(|_| self.closed())?;
        rx.await.map_err(|_| self.closed())?
    }

    fn closed(&self) -> GateError<CapOf<R>> {
        GateError::Channel(format!("reactor '{}' mailbox closed", self.name))
    }
}

#[async_trait]
impl<R: Reactor> DispatchTarget<R::Intent> for ReactorHandle<R> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn dispatch_effects(
        &self,
        intent: R::Intent,
        context: Context<CapOf<R>>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Effect<CapOf<R>>>, GateError<CapOf<R>>> {
        self.submit(intent, context, timeout.or(self.default_timeout))
            .await
            .map(|done| done.effects)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Worker
// ────────────────────────────────────────────────────────────────────────────

async fn run_worker<R: Reactor>(
    reactor: Arc<R>,
    mut state: R::State,
    mut mailbox: mpsc::Receiver<Command<R>>,
    emitter: mpsc::UnboundedSender<Effect<CapOf<R>>>,
    name: Arc<str>,
) {
    while let Some(command) = mailbox.recv().await {
        match command {
            Command::Snapshot { reply } => {
                let _ = reply.send(state.clone());
            }
            Command::Dispatch {
                intent,
                context,
                timeout,
                reply,
            } => {
                let result = process(&reactor, &state, intent, &context, timeout, &name).await;
                let result = result.map(|(next, effects)| {
                    state = next.clone();
                    debug!(reactor = %name, effects = effects.len(), phase = %DispatchPhase::Emitting);
                    for effect in &effects {
                        if emitter.send(effect.clone()).is_err() {
                            warn!(reactor = %name, effect_id = %effect.id, "emitter stopped; effect not executed");
                        }
                    }
                    debug!(reactor = %name, phase = %DispatchPhase::Done);
                    Dispatched {
                        state: next,
                        effects,
                    }
                });
                // The caller may have given up waiting; the commit stands.
                let _ = reply.send(result);
            }
        }
    }
    debug!(reactor = %name, phase = %DispatchPhase::Idle, "mailbox closed; worker stopped");
}

async fn process<R: Reactor>(
    reactor: &Arc<R>,
    state: &R::State,
    intent: R::Intent,
    context: &Context<CapOf<R>>,
    timeout: Option<Duration>,
    name: &str,
) -> Result<(R::State, Vec<Effect<CapOf<R>>>), GateError<CapOf<R>>> {
    let intent_name = intent.name();
    debug!(reactor = %name, intent = intent_name, phase = %DispatchPhase::Processing);

    let job = {
        let reactor = Arc::clone(reactor);
        let snapshot = state.clone();
        tokio::task::spawn_blocking(move || reactor.transition(&intent, &snapshot))
    };

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, job).await {
            Ok(joined) => joined,
            Err(_) => {
                let after_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
                warn!(reactor = %name, intent = intent_name, after_ms, phase = %DispatchPhase::Failed, "transition timed out");
                return Err(GateError::Timeout {
                    intent: intent_name.to_string(),
                    after_ms,
                });
            }
        },
        None => job.await,
    };

    let transition = match joined {
        Ok(Ok(transition)) => transition,
        Ok(Err(error)) => {
            warn!(
                reactor = %name,
                intent = intent_name,
                identity = %context.identity(),
                reason = %error.reason,
                transient = error.transient,
                phase = %DispatchPhase::Failed,
                "transition failed"
            );
            return Err(error.into_gate(intent_name));
        }
        Err(join_error) => {
            warn!(reactor = %name, intent = intent_name, error = %join_error, phase = %DispatchPhase::Failed, "transition panicked");
            return Err(GateError::TransitionFailed {
                intent: intent_name.to_string(),
                reason: format!("transition aborted: {join_error}"),
                transient: false,
            });
        }
    };

    let effects = transition
        .emissions
        .into_iter()
        .map(|emission| Effect::pending(emission, intent_name, context))
        .collect();
    Ok((transition.state, effects))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::{FileIntent, FileStore, FileStoreReactor};
    use crate::effect::EffectStatus;
    use crate::sink::ChannelSink;
    use capgate_kernel::{Context, file_algebra};
    use capgate_types::FileCap;
    use serde_json::json;
    use std::time::Instant;

    // ------------------------------------------------------------------ helpers

    fn file_handle(seed: &[(&str, &str)]) -> ReactorHandle<FileStoreReactor> {
        let mut store = FileStore::default();
        for &(path, contents) in seed {
            store = store.with_file(path, contents);
        }
        ReactorHandle::builder(FileStoreReactor, store, CapabilityGate::new(file_algebra()))
            .name("files")
            .spawn()
    }

    fn ctx(caps: &[FileCap]) -> Context<FileCap> {
        Context::builder("alice")
            .capabilities(caps.iter().cloned())
            .build()
    }

    /// A counter whose transition can be told to fail or stall.
    #[derive(Debug, Clone)]
    enum CounterIntent {
        Add(i64),
        Fail,
        Stall(u64),
        Burst(usize),
    }

    impl Intent for CounterIntent {
        type Capability = FileCap;
        fn name(&self) -> &'static str {
            match self {
                CounterIntent::Add(_) => "Add",
                CounterIntent::Fail => "Fail",
                CounterIntent::Stall(_) => "Stall",
                CounterIntent::Burst(_) => "Burst",
            }
        }
        fn required_capabilities(&self) -> Vec<FileCap> {
            vec![FileCap::write("/counter")]
        }
    }

    struct Counter;

    impl Reactor for Counter {
        type Intent = CounterIntent;
        type State = i64;

        fn transition(&self, intent: &CounterIntent, state: &i64) -> Result<Transition<i64>, ReactorError> {
            match intent {
                CounterIntent::Add(n) => Ok(Transition::to(state + n).emit("counter.changed", json!(state + n))),
                CounterIntent::Fail => Err(ReactorError::transient("backend busy")),
                CounterIntent::Stall(ms) => {
                    std::thread::sleep(Duration::from_millis(*ms));
                    Ok(Transition::to(state + 1000))
                }
                CounterIntent::Burst(n) => {
                    let mut t = Transition::to(*state);
                    for i in 0..*n {
                        t = t.emit("counter.burst", json!(i));
                    }
                    Ok(t)
                }
            }
        }
    }

    fn counter_handle() -> ReactorHandle<Counter> {
        ReactorHandle::builder(Counter, 0, CapabilityGate::new(file_algebra()))
            .name("counter")
            .spawn()
    }

    fn counter_ctx() -> Context<FileCap> {
        ctx(&[FileCap::admin("/counter")])
    }

    // ------------------------------------------------------------------ capability gate

    #[tokio::test]
    async fn write_capability_allows_read() {
        let files = file_handle(&[("/x", "data")]);
        let done = files
            .dispatch(FileIntent::read("/x"), ctx(&[FileCap::write("/x")]))
            .await
            .unwrap();
        assert_eq!(done.effects.len(), 1);
        assert_eq!(done.effects[0].kind, "file.read");
        assert_eq!(done.effects[0].payload["contents"], json!("data"));
    }

    #[tokio::test]
    async fn delete_without_capability_is_rejected_with_missing_set() {
        let files = file_handle(&[("/x", "data")]);
        let result = files
            .dispatch(FileIntent::delete("/x"), ctx(&[FileCap::write("/x")]))
            .await;
        assert!(matches!(
            result,
            Err(GateError::InsufficientCapabilities { ref missing }) if missing == &vec![FileCap::delete("/x")]
        ));
    }

    #[tokio::test]
    async fn rejection_is_deterministic() {
        let files = file_handle(&[("/x", "data")]);
        let context = ctx(&[FileCap::read("/x")]);
        let first = files.dispatch(FileIntent::delete("/x"), context.clone()).await;
        let second = files.dispatch(FileIntent::delete("/x"), context).await;
        assert_eq!(first.unwrap_err(), second.unwrap_err());
    }

    // ------------------------------------------------------------------ no-op on failure

    #[tokio::test]
    async fn rejected_dispatch_leaves_state_untouched() {
        let counter = counter_handle();
        counter.dispatch(CounterIntent::Add(5), counter_ctx()).await.unwrap();
        let before = counter.state().await.unwrap();

        let result = counter.dispatch(CounterIntent::Add(1), ctx(&[])).await;
        assert!(matches!(result, Err(GateError::InsufficientCapabilities { .. })));
        assert_eq!(counter.state().await.unwrap(), before);
    }

    #[tokio::test]
    async fn failed_transition_leaves_state_untouched() {
        let counter = counter_handle();
        counter.dispatch(CounterIntent::Add(7), counter_ctx()).await.unwrap();

        let result = counter.dispatch(CounterIntent::Fail, counter_ctx()).await;
        let err = result.unwrap_err();
        assert!(matches!(
            err,
            GateError::TransitionFailed { ref intent, transient: true, .. } if intent == "Fail"
        ));
        assert!(err.is_retryable());
        assert_eq!(counter.state().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn timed_out_transition_is_not_committed() {
        let counter = counter_handle();
        let result = counter
            .dispatch_with_timeout(CounterIntent::Stall(200), counter_ctx(), Duration::from_millis(20))
            .await;
        assert_eq!(
            result.unwrap_err(),
            GateError::Timeout {
                intent: "Stall".into(),
                after_ms: 20
            }
        );
        assert_eq!(counter.state().await.unwrap(), 0);

        // The worker keeps serving dispatches afterwards.
        counter.dispatch(CounterIntent::Add(2), counter_ctx()).await.unwrap();
        assert_eq!(counter.state().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn default_timeout_applies_when_none_given() {
        let counter = ReactorHandle::builder(Counter, 0, CapabilityGate::new(file_algebra()))
            .default_timeout(Duration::from_millis(10))
            .spawn();
        let result = counter.dispatch(CounterIntent::Stall(150), counter_ctx()).await;
        assert!(matches!(result, Err(GateError::Timeout { .. })));
    }

    // ------------------------------------------------------------------ sequencing

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_dispatches_are_serialized() {
        let counter = counter_handle();
        let mut tasks = Vec::new();
        for _ in 0..50 {
            let c = counter.clone();
            tasks.push(tokio::spawn(async move {
                c.dispatch(CounterIntent::Add(1), counter_ctx()).await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        assert_eq!(counter.state().await.unwrap(), 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn small_mailbox_still_serves_every_dispatch() {
        let counter = ReactorHandle::builder(Counter, 0, CapabilityGate::new(file_algebra()))
            .mailbox_capacity(1)
            .spawn();
        let mut tasks = Vec::new();
        for _ in 0..10 {
            let c = counter.clone();
            tasks.push(tokio::spawn(async move {
                c.dispatch(CounterIntent::Add(1), counter_ctx()).await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        assert_eq!(counter.state().await.unwrap(), 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn distinct_instances_transition_in_parallel() {
        let first = counter_handle();
        let second = counter_handle();
        let started = Instant::now();
        let (a, b) = tokio::join!(
            first.dispatch(CounterIntent::Stall(300), counter_ctx()),
            second.dispatch(CounterIntent::Stall(300), counter_ctx()),
        );
        let elapsed = started.elapsed();
        a.unwrap();
        b.unwrap();
        assert!(elapsed < Duration::from_millis(550), "took {elapsed:?}");
        assert_eq!(first.state().await.unwrap(), 1000);
        assert_eq!(second.state().await.unwrap(), 1000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn gate_rejects_without_waiting_for_busy_worker() {
        let counter = counter_handle();
        let busy = {
            let c = counter.clone();
            tokio::spawn(async move { c.dispatch(CounterIntent::Stall(300), counter_ctx()).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        let started = Instant::now();
        let result = counter.dispatch(CounterIntent::Add(1), ctx(&[])).await;
        assert!(matches!(result, Err(GateError::InsufficientCapabilities { .. })));
        assert!(started.elapsed() < Duration::from_millis(100));

        busy.await.unwrap().unwrap();
        assert_eq!(counter.state().await.unwrap(), 1000);
    }

    // ------------------------------------------------------------------ effects

    #[tokio::test]
    async fn settled_effects_are_published_on_bus() {
        let bus = EffectBus::default();
        let mut all = bus.subscribe();
        let mut changes = bus.subscribe_kind("counter.changed");
        assert_eq!(bus.subscriber_count(), 2);

        let counter = ReactorHandle::builder(Counter, 0, CapabilityGate::new(file_algebra()))
            .bus(bus.clone())
            .spawn();
        counter.dispatch(CounterIntent::Burst(1), counter_ctx()).await.unwrap();
        counter.dispatch(CounterIntent::Add(3), counter_ctx()).await.unwrap();

        let burst = all.recv().await.unwrap();
        assert_eq!(burst.kind, "counter.burst");
        assert_eq!(burst.status, EffectStatus::Executed);

        let changed = changes.recv().await.unwrap();
        assert_eq!(changed.payload, json!(3));
        assert_eq!(changed.originating_intent, "Add");
    }

    #[tokio::test]
    async fn effects_reach_sink_in_emission_order() {
        let (sink, mut rx) = ChannelSink::new();
        let counter = ReactorHandle::builder(Counter, 0, CapabilityGate::new(file_algebra()))
            .sink(Arc::new(sink))
            .spawn();

        let done = counter.dispatch(CounterIntent::Burst(5), counter_ctx()).await.unwrap();
        assert_eq!(done.effects.len(), 5);
        for i in 0..5 {
            let effect = rx.recv().await.unwrap();
            assert_eq!(effect.payload, json!(i));
            assert_eq!(effect.originating_intent, "Burst");
        }
    }

    #[tokio::test]
    async fn effect_context_is_propagated_hop() {
        let counter = counter_handle();
        let context = counter_ctx();
        let done = counter.dispatch(CounterIntent::Add(1), context.clone()).await.unwrap();
        let origin = &done.effects[0].originating_context;
        assert_eq!(origin.parent_hop(), Some(context.hop_id()));
        assert_eq!(origin.trace(), ["counter".to_string()]);
        assert_eq!(origin.correlation_id(), context.correlation_id());
    }

    #[tokio::test]
    async fn default_name_is_type_name() {
        let handle = ReactorHandle::builder(Counter, 0, CapabilityGate::new(file_algebra())).spawn();
        assert_eq!(handle.name(), "Counter");
    }
}
