//! [`EffectBus`] – broadcast of settled effects.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! observer (audit log, metrics exporter, UI stream) receives every settled
//! [`Effect`] without any single observer blocking the others or the
//! reactors that produced them.
//!
//! Publishing with no subscribers is a normal condition and reports zero
//! receivers instead of failing.

use capgate_types::Capability;
use tokio::sync::broadcast;
use tracing::warn;

use crate::effect::Effect;

/// Default channel capacity (number of buffered effects before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Shared effect bus.  Clone it cheaply – all clones share the same
/// underlying broadcast channel.
#[derive(Debug)]
pub struct EffectBus<C: Capability> {
    sender: broadcast::Sender<Effect<C>>,
}

impl<C: Capability> Clone for EffectBus<C> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<C: Capability> EffectBus<C> {
    /// Create a new bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a settled effect.  Returns the number of subscribers that were
    /// handed it.
    pub fn publish(&self, effect: Effect<C>) -> usize {
        self.sender.send(effect).unwrap_or(0)
    }

    /// Subscribe to every effect.
    pub fn subscribe(&self) -> broadcast::Receiver<Effect<C>> {
        self.sender.subscribe()
    }

    /// Subscribe to effects whose `kind` starts with `prefix`
    /// (e.g. `"file."`).
    pub fn subscribe_kind(&self, prefix: impl Into<String>) -> KindSubscriber<C> {
        KindSubscriber {
            prefix: prefix.into(),
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<C: Capability> Default for EffectBus<C> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// A subscriber that only delivers effects whose `kind` starts with the
/// given prefix.
pub struct KindSubscriber<C: Capability> {
    prefix: String,
    receiver: broadcast::Receiver<Effect<C>>,
}

impl<C: Capability> KindSubscriber<C> {
    /// Wait for the next matching effect.
    ///
    /// Returns `None` when the bus is closed and no further effects will
    /// arrive.
    pub async fn recv(&mut self) -> Option<Effect<C>> {
        loop {
            match self.receiver.recv().await {
                Ok(effect) if effect.kind.starts_with(&self.prefix) => return Some(effect),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(prefix = %self.prefix, lagged_by = n, "KindSubscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
