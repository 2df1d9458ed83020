//! Lifecycle events emitted while planning and executing a run.

use crate::core::StepIdentifier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Event type names.
pub mod types {
    /// The execution plan was built.
    pub const PLAN_BUILT: &str = "plan.built";
    /// A step body was dispatched.
    pub const STEP_STARTED: &str = "step.started";
    /// A step succeeded and its checksum was recorded.
    pub const STEP_COMPLETED: &str = "step.completed";
    /// A step failed.
    pub const STEP_FAILED: &str = "step.failed";
    /// A step was never attempted.
    pub const STEP_SKIPPED: &str = "step.skipped";
    /// Every branch has drained.
    pub const RUN_COMPLETED: &str = "run.completed";
}

/// An event emitted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    /// The event type (e.g., "step.started").
    #[serde(rename = "type")]
    pub event_type: String,

    /// The run the event belongs to.
    pub run_id: Uuid,

    /// When the event occurred.
    pub timestamp: DateTime<Utc>,

    /// The event payload.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Value>,
}

impl EngineEvent {
    /// Creates an event with no payload.
    #[must_use]
    pub fn new(event_type: impl Into<String>, run_id: Uuid) -> Self {
        Self {
            event_type: event_type.into(),
            run_id,
            timestamp: Utc::now(),
            data: BTreeMap::new(),
        }
    }

    /// Adds a payload field.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Returns the step the event is about, if any.
    #[must_use]
    pub fn step(&self) -> Option<&str> {
        self.data.get("step").and_then(Value::as_str)
    }

    /// Creates a "plan.built" event.
    #[must_use]
    pub fn plan_built(run_id: Uuid, steps: usize, dry_run: bool) -> Self {
        Self::new(types::PLAN_BUILT, run_id)
            .add_data("steps", json!(steps))
            .add_data("dry_run", json!(dry_run))
    }

    /// Creates a "step.started" event.
    #[must_use]
    pub fn step_started(run_id: Uuid, step: &StepIdentifier) -> Self {
        Self::new(types::STEP_STARTED, run_id).add_data("step", json!(step.as_str()))
    }

    /// Creates a "step.completed" event.
    #[must_use]
    pub fn step_completed(run_id: Uuid, step: &StepIdentifier, duration: Duration) -> Self {
        Self::new(types::STEP_COMPLETED, run_id)
            .add_data("step", json!(step.as_str()))
            .add_data("duration_ms", json!(duration_ms(duration)))
    }

    /// Creates a "step.failed" event.
    #[must_use]
    pub fn step_failed(run_id: Uuid, step: &StepIdentifier, error: &str, duration: Duration) -> Self {
        Self::new(types::STEP_FAILED, run_id)
            .add_data("step", json!(step.as_str()))
            .add_data("error", json!(error))
            .add_data("duration_ms", json!(duration_ms(duration)))
    }

    /// Creates a "step.skipped" event.
    #[must_use]
    pub fn step_skipped(run_id: Uuid, step: &StepIdentifier, reason: &str) -> Self {
        Self::new(types::STEP_SKIPPED, run_id)
            .add_data("step", json!(step.as_str()))
            .add_data("reason", json!(reason))
    }

    /// Creates a "run.completed" event.
    #[must_use]
    pub fn run_completed(
        run_id: Uuid,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        duration: Duration,
    ) -> Self {
        Self::new(types::RUN_COMPLETED, run_id)
            .add_data("succeeded", json!(succeeded))
            .add_data("failed", json!(failed))
            .add_data("skipped", json!(skipped))
            .add_data("duration_ms", json!(duration_ms(duration)))
    }
}

fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step() -> StepIdentifier {
        StepIdentifier::parse("garden://who/2024/gho").unwrap()
    }

    #[test]
    fn test_step_events_carry_step() {
        let run_id = Uuid::now_v7();
        let event = EngineEvent::step_failed(run_id, &step(), "boom", Duration::from_millis(5));

        assert_eq!(event.event_type, types::STEP_FAILED);
        assert_eq!(event.step(), Some("garden://who/2024/gho"));
        assert_eq!(event.data["error"], json!("boom"));
        assert_eq!(event.run_id, run_id);
    }

    #[test]
    fn test_serialization() {
        let event = EngineEvent::plan_built(Uuid::nil(), 3, true);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "plan.built");
        assert_eq!(json["data"]["steps"], 3);

        let back: EngineEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_run_completed_has_no_step() {
        let event = EngineEvent::run_completed(Uuid::nil(), 1, 2, 3, Duration::ZERO);
        assert!(event.step().is_none());
        assert_eq!(event.data["skipped"], json!(3));
    }
}
