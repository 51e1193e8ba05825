//! Effects – side-effect descriptors produced by reactors.
//!
//! A reactor never performs I/O itself.  Its transition function returns
//! [`Emission`]s; the runtime stamps each one with the originating intent and
//! context to form an [`Effect`] and hands it to an
//! [`EffectSink`][crate::sink::EffectSink] after the new state is committed.

use capgate_kernel::Context;
use capgate_types::Capability;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Execution state of an [`Effect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectStatus {
    Pending,
    Executed,
    Failed,
}

/// What a transition function asks to have done: a kind tag the sink
/// dispatches on and a plain-data payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emission {
    pub kind: String,
    pub payload: serde_json::Value,
}

impl Emission {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// An emitted side effect, tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effect<C: Capability> {
    pub id: Uuid,
    pub kind: String,
    pub payload: serde_json::Value,
    /// Variant name of the intent whose transition produced this effect.
    pub originating_intent: String,
    pub originating_context: Context<C>,
    pub status: EffectStatus,
    /// Sink error message when `status` is [`EffectStatus::Failed`].
    pub error: Option<String>,
    pub emitted_at: DateTime<Utc>,
}

impl<C: Capability> Effect<C> {
    /// Stamp `emission` with its origin.  Starts as [`EffectStatus::Pending`].
    pub fn pending(emission: Emission, intent: &str, context: &Context<C>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: emission.kind,
            payload: emission.payload,
            originating_intent: intent.to_string(),
            originating_context: context.clone(),
            status: EffectStatus::Pending,
            error: None,
            emitted_at: Utc::now(),
        }
    }

    pub(crate) fn settle(mut self, outcome: Result<(), String>) -> Self {
        match outcome {
            Ok(()) => self.status = EffectStatus::Executed,
            Err(reason) => {
                self.status = EffectStatus::Failed;
                self.error = Some(reason);
            }
        }
        self
    }
}
