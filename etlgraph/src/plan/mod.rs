//! Execution planning: scope selection, dirty-set intersection and
//! topological linearization.

mod planner;
mod request;

pub use planner::ExecutionPlanner;
pub use request::PlanRequest;

use crate::checksum::Checksum;
use crate::core::{StepIdentifier, StepState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Why a step is in the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanReason {
    /// No checksum was ever recorded.
    NeverBuilt,
    /// The stored checksum differs from the fresh one.
    Stale,
    /// The operator forced a rebuild.
    Forced,
}

impl PlanReason {
    /// Maps a dirty state to its reason.
    #[must_use]
    pub const fn from_state(state: StepState) -> Option<Self> {
        match state {
            StepState::NeverBuilt => Some(Self::NeverBuilt),
            StepState::Stale => Some(Self::Stale),
            _ => None,
        }
    }
}

impl fmt::Display for PlanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NeverBuilt => write!(f, "never-built"),
            Self::Stale => write!(f, "stale"),
            Self::Forced => write!(f, "forced"),
        }
    }
}

/// One step of an execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedStep {
    /// The step.
    pub id: StepIdentifier,
    /// Why it runs.
    pub reason: PlanReason,
    /// Planned steps that must succeed before this one starts.
    pub dependencies: BTreeSet<StepIdentifier>,
    /// Checksum to record once the step succeeds.
    pub checksum: Checksum,
}

/// Ordered steps such that every in-plan dependency precedes its dependent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    steps: Vec<PlannedStep>,
}

impl ExecutionPlan {
    /// Wraps already-ordered steps.
    #[must_use]
    pub fn new(steps: Vec<PlannedStep>) -> Self {
        Self { steps }
    }

    /// Returns the planned steps in order.
    #[must_use]
    pub fn steps(&self) -> &[PlannedStep] {
        &self.steps
    }

    /// Iterates over step identifiers in order.
    pub fn ids(&self) -> impl Iterator<Item = &StepIdentifier> {
        self.steps.iter().map(|s| &s.id)
    }

    /// Returns the number of planned steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if nothing needs to run.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns true if `step` is planned.
    #[must_use]
    pub fn contains(&self, step: &StepIdentifier) -> bool {
        self.steps.iter().any(|s| &s.id == step)
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            return writeln!(f, "Nothing to do: all selected steps are up to date.");
        }
        let width = self.steps.len().to_string().len();
        for (i, step) in self.steps.iter().enumerate() {
            writeln!(f, "{:>width$}. {} ({})", i + 1, step.id, step.reason)?;
        }
        Ok(())
    }
}
