//! `capgate-runtime` – intent dispatch.
//!
//! Drives typed [`Intent`]s through capability-gated [`Reactor`]s and
//! delivers the resulting [`Effect`]s to external sinks.
//!
//! # Modules
//!
//! - [`intent`] – the [`Intent`] trait: a closed set of typed requests, each
//!   mapping to the capabilities it requires.
//! - [`reactor`] – the [`Reactor`] transition trait and [`ReactorHandle`], a
//!   single-writer worker per instance that checks capabilities, runs the
//!   transition under a timeout, and commits state only on success.
//! - [`effect`] – [`Effect`] descriptors stamped with their originating
//!   intent and context.
//! - [`sink`] – the [`EffectSink`] trait plus [`TracingSink`] and
//!   [`ChannelSink`]; effects reach a sink in emission order.
//! - [`bus`] – [`EffectBus`], a broadcast of settled effects.
//! - [`router`] – [`Router`], name-based routing over a
//!   [`Registry`][capgate_kernel::Registry] of [`DispatchTarget`]s.
//! - [`files`] – an in-memory file store reactor used by the shell.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing].

pub mod bus;
pub mod effect;
pub mod files;
pub mod intent;
pub mod reactor;
pub mod router;
pub mod sink;
pub mod telemetry;

pub use bus::{EffectBus, KindSubscriber};
pub use effect::{Effect, EffectStatus, Emission};
pub use intent::Intent;
pub use reactor::{
    CapOf, DispatchPhase, DispatchResult, Dispatched, Reactor, ReactorBuilder, ReactorError,
    ReactorHandle, Transition,
};
pub use router::{DispatchTarget, Router};
pub use sink::{ChannelSink, EffectSink, SinkError, TracingSink};
