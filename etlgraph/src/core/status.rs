//! Step state, node kind and output status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether the engine computes freshness for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A step whose freshness this engine computes and whose body it runs.
    Managed,
    /// An unmanaged input leaf; always treated as fresh.
    External,
}

/// The lifecycle state of a node during one planning/execution cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    /// Not classified yet.
    #[default]
    Unvisited,
    /// Stored checksum matches the freshly computed one.
    Fresh,
    /// Stored checksum differs, or a rebuild was forced.
    Stale,
    /// No checksum was ever recorded.
    NeverBuilt,
    /// The step body ran and failed.
    Failed,
    /// The step was never attempted because of an upstream failure or an abort.
    Skipped,
}

impl StepState {
    /// Returns true if the step needs to run.
    #[must_use]
    pub const fn is_dirty(self) -> bool {
        matches!(self, Self::Stale | Self::NeverBuilt)
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unvisited => write!(f, "unvisited"),
            Self::Fresh => write!(f, "fresh"),
            Self::Stale => write!(f, "stale"),
            Self::NeverBuilt => write!(f, "never-built"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// The status reported by a step body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStatus {
    /// The step completed successfully.
    Ok,
    /// The step failed.
    Fail,
}

impl fmt::Display for OutputStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Fail => write!(f, "fail"),
        }
    }
}
