//! Scheduling strategies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How due operations are executed.  Chosen once per scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SchedulingStrategy {
    /// Due operations execute inline inside `schedule_intent`; operations
    /// in the future fall back to a single timer each.
    Immediate,
    /// One timer per operation; execution starts as soon as it fires.
    #[default]
    Delayed,
    /// Due operations queue in execution-time order and at most
    /// `max_concurrent` run at once.
    BoundedFifo { max_concurrent: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    #[error("unknown scheduling strategy '{0}' (expected immediate, delayed or bounded-fifo)")]
    Unknown(String),
    #[error("max_concurrent must be at least 1")]
    ZeroConcurrency,
    #[error("invalid max_concurrent '{0}'")]
    BadConcurrency(String),
}

impl SchedulingStrategy {
    pub const NAMES: [&'static str; 3] = ["immediate", "delayed", "bounded-fifo"];

    pub fn bounded_fifo(max_concurrent: usize) -> Result<Self, StrategyError> {
        if max_concurrent == 0 {
            return Err(StrategyError::ZeroConcurrency);
        }
        Ok(SchedulingStrategy::BoundedFifo { max_concurrent })
    }

    /// Build from a strategy name plus the separately configured
    /// concurrency bound (only used by `bounded-fifo`).
    pub fn from_config(name: &str, max_concurrent: usize) -> Result<Self, StrategyError> {
        match name.parse()? {
            SchedulingStrategy::BoundedFifo { .. } => Self::bounded_fifo(max_concurrent),
            other => Ok(other),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SchedulingStrategy::Immediate => "immediate",
            SchedulingStrategy::Delayed => "delayed",
            SchedulingStrategy::BoundedFifo { .. } => "bounded-fifo",
        }
    }
}

impl fmt::Display for SchedulingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingStrategy::BoundedFifo { max_concurrent } => {
                write!(f, "bounded-fifo:{max_concurrent}")
            }
            other => f.write_str(other.name()),
        }
    }
}

/// Accepts `immediate`, `delayed`, `bounded-fifo` (bound 1) and
/// `bounded-fifo:N`.
impl FromStr for SchedulingStrategy {
    type Err = StrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        match name.split_once(':') {
            Some(("bounded-fifo", n)) => {
                let n: usize = n
                    .parse()
                    .map_err(|_| StrategyError::BadConcurrency(n.to_string()))?;
                Self::bounded_fifo(n)
            }
            Some(_) => Err(StrategyError::Unknown(name.clone())),
            None => match name.as_str() {
                "immediate" => Ok(SchedulingStrategy::Immediate),
                "delayed" => Ok(SchedulingStrategy::Delayed),
                "bounded-fifo" => Self::bounded_fifo(1),
                _ => Err(StrategyError::Unknown(name.clone())),
            },
        }
    }
}
