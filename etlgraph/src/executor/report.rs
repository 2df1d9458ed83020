use crate::core::{StepIdentifier, StepState};
use crate::errors::StepExecutionError;
use crate::graph::StepGraph;
use crate::plan::PlanReason;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Why a planned step was never attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// A transitive dependency failed.
    UpstreamFailed {
        /// The failed step this one depends on.
        ancestor: StepIdentifier,
    },
    /// The run stopped dispatching after the first failure.
    StoppedAfterFailure {
        /// The step whose failure stopped the run.
        failed: StepIdentifier,
    },
    /// The run was cancelled.
    Cancelled {
        /// The cancellation reason.
        reason: String,
    },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpstreamFailed { ancestor } => write!(f, "upstream failure in {ancestor}"),
            Self::StoppedAfterFailure { failed } => write!(f, "run stopped after {failed} failed"),
            Self::Cancelled { reason } => write!(f, "cancelled: {reason}"),
        }
    }
}

/// The outcome of one planned step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StepResultKind {
    /// The body succeeded and its checksum was recorded.
    Succeeded,
    /// The body failed, panicked, or its checksum could not be recorded.
    Failed {
        /// What went wrong.
        error: String,
    },
    /// The body never ran.
    Skipped {
        /// Why.
        reason: SkipReason,
    },
}

/// The outcome of one planned step, with timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRunRecord {
    /// The step.
    pub step: StepIdentifier,
    /// Why the step was planned.
    pub reason: PlanReason,
    /// What happened.
    pub result: StepResultKind,
    /// Wall time of the body. `None` for skipped steps.
    pub duration: Option<Duration>,
}

impl StepRunRecord {
    /// Returns true if the step succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.result, StepResultKind::Succeeded)
    }

    /// Returns true if the step failed.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self.result, StepResultKind::Failed { .. })
    }

    /// Returns true if the step was skipped.
    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        matches!(self.result, StepResultKind::Skipped { .. })
    }
}

/// Per-step outcomes of one run, in plan order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// The run identifier.
    pub run_id: Uuid,
    /// One record per planned step, in plan order.
    pub records: Vec<StepRunRecord>,
    /// Wall time of the whole run.
    pub duration: Duration,
    /// Set if the run was cancelled.
    pub cancelled: bool,
}

impl ExecutionReport {
    /// An empty report for a run with nothing to do.
    #[must_use]
    pub const fn empty(run_id: Uuid) -> Self {
        Self {
            run_id,
            records: Vec::new(),
            duration: Duration::ZERO,
            cancelled: false,
        }
    }

    /// Returns the record of a step.
    #[must_use]
    pub fn record(&self, step: &StepIdentifier) -> Option<&StepRunRecord> {
        self.records.iter().find(|r| &r.step == step)
    }

    /// Iterates over succeeded steps.
    pub fn succeeded(&self) -> impl Iterator<Item = &StepRunRecord> {
        self.records.iter().filter(|r| r.is_success())
    }

    /// Iterates over failed steps.
    pub fn failures(&self) -> impl Iterator<Item = &StepRunRecord> {
        self.records.iter().filter(|r| r.is_failure())
    }

    /// Iterates over skipped steps.
    pub fn skipped(&self) -> impl Iterator<Item = &StepRunRecord> {
        self.records.iter().filter(|r| r.is_skipped())
    }

    /// Returns (succeeded, failed, skipped) counts.
    #[must_use]
    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.succeeded().count(),
            self.failures().count(),
            self.skipped().count(),
        )
    }

    /// Returns true if no step failed and the run was not cancelled.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.failures().next().is_none()
    }

    /// The first failure in plan order, as an error.
    #[must_use]
    pub fn first_error(&self) -> Option<StepExecutionError> {
        self.records.iter().find_map(|r| match &r.result {
            StepResultKind::Failed { error } => Some(StepExecutionError::new(r.step.as_str(), error.clone())),
            _ => None,
        })
    }

    /// Writes the terminal states into the graph.
    pub fn apply_to(&self, graph: &mut StepGraph) {
        for record in &self.records {
            let state = match record.result {
                StepResultKind::Succeeded => StepState::Fresh,
                StepResultKind::Failed { .. } => StepState::Failed,
                StepResultKind::Skipped { .. } => StepState::Skipped,
            };
            graph.set_state(&record.step, state);
        }
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (succeeded, failed, skipped) = self.counts();
        writeln!(
            f,
            "{succeeded} succeeded, {failed} failed, {skipped} skipped in {:.2}s",
            self.duration.as_secs_f64()
        )?;
        for record in &self.records {
            match &record.result {
                StepResultKind::Succeeded => {}
                StepResultKind::Failed { error } => {
                    let first_line = error.lines().next().unwrap_or_default();
                    writeln!(f, "  FAILED  {}: {first_line}", record.step)?;
                }
                StepResultKind::Skipped { reason } => {
                    writeln!(f, "  SKIPPED {} ({reason})", record.step)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> StepIdentifier {
        StepIdentifier::parse(s).unwrap()
    }

    fn report() -> ExecutionReport {
        ExecutionReport {
            run_id: Uuid::now_v7(),
            records: vec![
                StepRunRecord {
                    step: id("meadow://t/1/a"),
                    reason: PlanReason::NeverBuilt,
                    result: StepResultKind::Succeeded,
                    duration: Some(Duration::from_millis(5)),
                },
                StepRunRecord {
                    step: id("garden://t/1/b"),
                    reason: PlanReason::Stale,
                    result: StepResultKind::Failed {
                        error: "boom\ntraceback".to_string(),
                    },
                    duration: Some(Duration::from_millis(1)),
                },
                StepRunRecord {
                    step: id("grapher://t/1/c"),
                    reason: PlanReason::Stale,
                    result: StepResultKind::Skipped {
                        reason: SkipReason::UpstreamFailed {
                            ancestor: id("garden://t/1/b"),
                        },
                    },
                    duration: None,
                },
            ],
            duration: Duration::from_millis(10),
            cancelled: false,
        }
    }

    #[test]
    fn test_counts_and_success() {
        let report = report();
        assert_eq!(report.counts(), (1, 1, 1));
        assert!(!report.is_success());
        assert_eq!(report.first_error().unwrap().step, "garden://t/1/b");
        assert!(ExecutionReport::empty(Uuid::now_v7()).is_success());
    }

    #[test]
    fn test_display_lists_failures_and_skips() {
        let text = report().to_string();

        assert!(text.starts_with("1 succeeded, 1 failed, 1 skipped"));
        assert!(text.contains("FAILED  garden://t/1/b: boom"));
        assert!(!text.contains("traceback"));
        assert!(text.contains("SKIPPED grapher://t/1/c (upstream failure in garden://t/1/b)"));
    }

    #[test]
    fn test_cancelled_run_is_not_success() {
        let mut report = ExecutionReport::empty(Uuid::now_v7());
        report.cancelled = true;
        assert!(!report.is_success());
    }

    #[test]
    fn test_serializes_tagged_results() {
        let json = serde_json::to_value(&report()).unwrap();
        assert_eq!(json["records"][1]["result"]["result"], "failed");
        assert_eq!(json["records"][2]["result"]["reason"]["kind"], "upstream_failed");
    }
}
