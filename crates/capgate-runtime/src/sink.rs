//! Effect sinks – where emitted effects are actually executed.
//!
//! The dispatch core never performs I/O.  Every [`Effect`] a reactor emits is
//! handed to an [`EffectSink`] (logging, messaging, persistence – all external
//! collaborators) by a per-reactor emitter task.  The emitter consumes effects
//! strictly in emission order, but runs independently of the reactor's
//! mailbox, so a slow sink never holds up the next dispatch.
//!
//! # Overview
//!
//! - [`EffectSink`] – the trait every sink implements.
//! - [`TracingSink`] – logs each effect through `tracing`.
//! - [`ChannelSink`] – forwards effects to an mpsc receiver owned by an
//!   external consumer.

use std::sync::Arc;

use async_trait::async_trait;
use capgate_types::Capability;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bus::EffectBus;
use crate::effect::Effect;

/// Failure reported by a sink while executing an effect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("effect sink error: {0}")]
pub struct SinkError(pub String);

/// Every effect consumer must implement this trait.
///
/// # Contract
///
/// `execute` receives effects of a single reactor one at a time, in the
/// order they were emitted.  Returning `Err` marks the effect
/// [`Failed`][crate::effect::EffectStatus::Failed]; it does not affect the
/// reactor's committed state.
#[async_trait]
pub trait EffectSink<C: Capability>: Send + Sync {
    async fn execute(&self, effect: &Effect<C>) -> Result<(), SinkError>;
}

/// Logs every effect at `info` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl<C: Capability> EffectSink<C> for TracingSink {
    async fn execute(&self, effect: &Effect<C>) -> Result<(), SinkError> {
        info!(
            effect_id = %effect.id,
            kind = %effect.kind,
            intent = %effect.originating_intent,
            identity = %effect.originating_context.identity(),
            correlation_id = %effect.originating_context.correlation_id(),
            payload = %effect.payload,
            "effect"
        );
        Ok(())
    }
}

/// Forwards effects over an unbounded mpsc channel.
#[derive(Debug)]
pub struct ChannelSink<C: Capability> {
    tx: mpsc::UnboundedSender<Effect<C>>,
}

impl<C: Capability> ChannelSink<C> {
    /// Create a sink together with the receiver its effects arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Effect<C>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl<C: Capability> EffectSink<C> for ChannelSink<C> {
    async fn execute(&self, effect: &Effect<C>) -> Result<(), SinkError> {
        self.tx
            .send(effect.clone())
            .map_err(|_| SinkError("effect receiver dropped".to_string()))
    }
}

/// Spawn the FIFO emitter for one reactor and return its input side.
///
/// Each effect is executed on `sink`, settled as executed or failed, and the
/// settled copy is published on `bus` when one is attached.
pub(crate) fn spawn_emitter<C: Capability>(
    reactor: Arc<str>,
    sink: Arc<dyn EffectSink<C>>,
    bus: Option<EffectBus<C>>,
) -> mpsc::UnboundedSender<Effect<C>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Effect<C>>();
    tokio::spawn(async move {
        while let Some(effect) = rx.recv().await {
            let outcome = sink.execute(&effect).await.map_err(|e| e.to_string());
            if let Err(reason) = &outcome {
                warn!(%reactor, effect_id = %effect.id, kind = %effect.kind, %reason, "effect failed");
            }
            let settled = effect.settle(outcome);
            if let Some(bus) = &bus {
                bus.publish(settled);
            }
        }
        debug!(%reactor, "emitter stopped");
    });
    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{EffectStatus, Emission};
    use capgate_kernel::Context;
    use capgate_types::FileCap;
    use serde_json::json;

    struct FailingSink;

    #[async_trait]
    impl EffectSink<FileCap> for FailingSink {
        async fn execute(&self, _effect: &Effect<FileCap>) -> Result<(), SinkError> {
            Err(SinkError("unreachable backend".into()))
        }
    }

    fn effect(kind: &str) -> Effect<FileCap> {
        let ctx = Context::builder("tester").build();
        Effect::pending(Emission::new(kind, json!({})), "Test", &ctx)
    }

    #[tokio::test]
    async fn emitter_preserves_order() {
        let (sink, mut rx) = ChannelSink::new();
        let tx = spawn_emitter(Arc::from("t"), Arc::new(sink), None);
        for i in 0..20 {
            tx.send(effect(&format!("k{i}"))).unwrap();
        }
        for i in 0..20 {
            let got = rx.recv().await.unwrap();
            assert_eq!(got.kind, format!("k{i}"));
        }
    }

    #[tokio::test]
    async fn emitter_publishes_settled_effects() {
        let bus = EffectBus::default();
        let mut observed = bus.subscribe();
        let tx = spawn_emitter(Arc::from("t"), Arc::new(TracingSink), Some(bus.clone()));
        tx.send(effect("audit.ok")).unwrap();
        let settled = observed.recv().await.unwrap();
        assert_eq!(settled.status, EffectStatus::Executed);
    }

    #[tokio::test]
    async fn sink_failure_marks_effect_failed() {
        let bus = EffectBus::default();
        let mut observed = bus.subscribe();
        let tx = spawn_emitter(Arc::from("t"), Arc::new(FailingSink), Some(bus.clone()));
        tx.send(effect("file.written")).unwrap();
        let settled = observed.recv().await.unwrap();
        assert_eq!(settled.status, EffectStatus::Failed);
        assert!(settled.error.unwrap().contains("unreachable backend"));
    }

    #[tokio::test]
    async fn channel_sink_reports_dropped_receiver() {
        let (sink, rx) = ChannelSink::<FileCap>::new();
        drop(rx);
        assert!(sink.execute(&effect("x")).await.is_err());
    }
}
