//! What a step body reports back to the scheduler.

use super::OutputStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The output of a step body.
///
/// The engine only looks at the status and error; metadata is carried through
/// to the run report for the host application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    /// The status of the execution.
    pub status: OutputStatus,

    /// Error message (for failed executions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Free-form metadata reported by the step body.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Default for StepOutput {
    fn default() -> Self {
        Self::ok()
    }
}

impl StepOutput {
    /// Creates a successful output.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            status: OutputStatus::Ok,
            error: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Creates a failure output with an error message.
    #[must_use]
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            status: OutputStatus::Fail,
            error: Some(error.into()),
            metadata: BTreeMap::new(),
        }
    }

    /// Adds a single metadata entry.
    #[must_use]
    pub fn add_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns true if the output indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == OutputStatus::Ok
    }

    /// Returns the error message, or a generic one for failures without a message.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        match self.status {
            OutputStatus::Ok => None,
            OutputStatus::Fail => Some(
                self.error
                    .clone()
                    .unwrap_or_else(|| "step reported failure".to_string()),
            ),
        }
    }
}
