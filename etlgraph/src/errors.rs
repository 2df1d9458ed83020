//! Error types for the etlgraph engine.
//!
//! Load-time errors (malformed identifiers, dangling references, cycles,
//! duplicate definitions) are fatal for the whole planning cycle and carry a
//! [`ContractErrorInfo`] with a stable code. Execution-time errors are local to
//! a single step and are collected into the run report instead of being
//! propagated.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for etlgraph operations.
#[derive(Debug, Error)]
pub enum EtlError {
    /// A step identifier could not be parsed.
    #[error("{0}")]
    MalformedIdentifier(#[from] MalformedIdentifierError),

    /// A dependency reference did not resolve to any known step or external.
    #[error("{0}")]
    DependencyResolution(#[from] DependencyResolutionError),

    /// The dependency graph contains a cycle.
    #[error("{0}")]
    CyclicDependency(#[from] CycleDetectedError),

    /// The declarative graph is structurally invalid (duplicates, empty, ...).
    #[error("{0}")]
    Validation(#[from] GraphValidationError),

    /// A step body failed.
    #[error("{0}")]
    StepExecution(#[from] StepExecutionError),

    /// A completed step's checksum could not be recorded.
    #[error("{0}")]
    ChecksumPersistence(#[from] ChecksumPersistenceError),

    /// An artifact belonging to a step or external leaf could not be read.
    #[error("{0}")]
    Artifact(#[from] ArtifactReadError),

    /// Invalid or unreadable configuration.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EtlError {
    /// Returns the diagnostic info attached to load-time errors, if any.
    #[must_use]
    pub fn error_info(&self) -> Option<&ContractErrorInfo> {
        match self {
            Self::DependencyResolution(e) => Some(&e.error_info),
            Self::CyclicDependency(e) => Some(&e.error_info),
            Self::Validation(e) => e.error_info.as_ref(),
            _ => None,
        }
    }

    /// Returns the stable diagnostic code of load-time errors.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::MalformedIdentifier(_) => Some(MalformedIdentifierError::CODE),
            other => other.error_info().map(|info| info.code.as_str()),
        }
    }

    /// Returns a fix hint: the one attached to the error, else the default for its code.
    #[must_use]
    pub fn hint(&self) -> Option<&str> {
        self.error_info()
            .and_then(|info| info.fix_hint.as_deref())
            .or_else(|| self.code().and_then(ContractSuggestions::get))
    }
}

/// Metadata about a graph error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "ETL-DAG-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: BTreeMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a step identifier string cannot be parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Malformed step identifier '{input}': {reason}")]
pub struct MalformedIdentifierError {
    /// The offending input.
    pub input: String,
    /// Why it was rejected.
    pub reason: String,
}

impl MalformedIdentifierError {
    /// Diagnostic code for malformed identifiers.
    pub const CODE: &'static str = "ETL-ID-MALFORMED";

    /// Creates a new malformed identifier error.
    #[must_use]
    pub fn new(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// Error raised when a dependency reference cannot be resolved.
#[derive(Debug, Clone, Error)]
#[error("Step '{step}' depends on '{reference}' which cannot be resolved: {reason}")]
pub struct DependencyResolutionError {
    /// The step declaring the dependency.
    pub step: String,
    /// The unresolved reference, as written.
    pub reference: String,
    /// Why resolution failed.
    pub reason: String,
    /// Diagnostic info.
    pub error_info: ContractErrorInfo,
}

impl DependencyResolutionError {
    /// Creates a new dependency resolution error.
    #[must_use]
    pub fn new(
        step: impl Into<String>,
        reference: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        let step = step.into();
        let reference = reference.into();
        let info = ContractErrorInfo::new(
            "ETL-DAG-MISSING_DEP",
            format!("Dependency '{reference}' of '{step}' not found"),
        )
        .with_fix_hint(
            "Define the dependency as a step, make sure the snapshot exists, \
             or reference an existing file.",
        )
        .with_context_entry("step", step.clone())
        .with_context_entry("reference", reference.clone());

        Self {
            step,
            reference,
            reason: reason.into(),
            error_info: info,
        }
    }
}

/// Error raised when a cycle is detected in the step graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in step graph: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of steps forming the cycle; the first element is repeated at the end.
    pub cycle_path: Vec<String>,
    /// Diagnostic info.
    pub error_info: ContractErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "ETL-DAG-CYCLE",
            format!("Step graph contains a dependency cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the dependencies in the cycle to break it.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

/// Error raised when the declarative graph is structurally invalid.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GraphValidationError {
    /// The error message.
    pub message: String,
    /// The steps involved in the error.
    pub steps: Vec<String>,
    /// Optional diagnostic info.
    pub error_info: Option<ContractErrorInfo>,
}

impl GraphValidationError {
    /// Creates a new graph validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            steps: Vec::new(),
            error_info: None,
        }
    }

    /// Error for a step defined more than once.
    #[must_use]
    pub fn duplicate_step(step: impl Into<String>, origin: impl Into<String>) -> Self {
        let step = step.into();
        Self::new(format!("Step '{step}' is defined more than once"))
            .with_steps(vec![step.clone()])
            .with_error_info(
                ContractErrorInfo::new("ETL-DAG-DUPLICATE", format!("Duplicate definition of '{step}'"))
                    .with_context_entry("origin", origin)
                    .with_fix_hint("Keep a single definition of each step across all included files."),
            )
    }

    /// Error for a dependency listed twice by the same step.
    #[must_use]
    pub fn duplicate_dependency(step: impl Into<String>, dependency: impl Into<String>) -> Self {
        let step = step.into();
        let dependency = dependency.into();
        Self::new(format!("Step '{step}' lists dependency '{dependency}' more than once"))
            .with_steps(vec![step, dependency.clone()])
            .with_error_info(
                ContractErrorInfo::new(
                    "ETL-DAG-DUPLICATE_DEP",
                    format!("Duplicate dependency '{dependency}'"),
                )
                .with_fix_hint("Remove the repeated entry from the dependency list."),
            )
    }

    /// Sets the steps involved.
    #[must_use]
    pub fn with_steps(mut self, steps: Vec<String>) -> Self {
        self.steps = steps;
        self
    }

    /// Sets the diagnostic info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }
}

/// Error raised when a step body fails.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Step '{step}' failed: {message}")]
pub struct StepExecutionError {
    /// The failed step.
    pub step: String,
    /// The underlying failure.
    pub message: String,
}

impl StepExecutionError {
    /// Creates a new step execution error.
    #[must_use]
    pub fn new(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            message: message.into(),
        }
    }
}

/// Error raised when a completed step's checksum cannot be written.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Could not record checksum for '{step}': {message}")]
pub struct ChecksumPersistenceError {
    /// The step whose record failed.
    pub step: String,
    /// The underlying failure.
    pub message: String,
}

impl ChecksumPersistenceError {
    /// Creates a new checksum persistence error.
    #[must_use]
    pub fn new(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            message: message.into(),
        }
    }
}

/// Error raised when an artifact cannot be read for fingerprinting.
#[derive(Debug, Error)]
#[error("Could not read artifact '{}' of '{owner}': {source}", path.display())]
pub struct ArtifactReadError {
    /// The step or external leaf owning the artifact.
    pub owner: String,
    /// The artifact path.
    pub path: PathBuf,
    /// The underlying IO error.
    #[source]
    pub source: std::io::Error,
}

impl ArtifactReadError {
    /// Creates a new artifact read error.
    #[must_use]
    pub fn new(owner: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self {
            owner: owner.into(),
            path: path.into(),
            source,
        }
    }
}

/// Error raised for invalid configuration or dependency files.
#[derive(Debug, Clone, Error)]
#[error("Configuration error in {origin}: {message}")]
pub struct ConfigError {
    /// Where the bad value came from (file path or environment variable).
    pub origin: String,
    /// What is wrong with it.
    pub message: String,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            message: message.into(),
        }
    }
}

/// Provides default suggestions for graph error codes.
pub struct ContractSuggestions;

impl ContractSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "ETL-DAG-CYCLE" => Some(
                "Check the step dependencies for circular references. \
                 A step may only depend on steps of the same or an earlier channel.",
            ),
            "ETL-DAG-MISSING_DEP" => Some(
                "Ensure every dependency is defined in the DAG, exists as a snapshot, \
                 or is an existing file. Check for typos and version mismatches.",
            ),
            "ETL-DAG-DUPLICATE" => Some(
                "A step may be defined in a single DAG file only. \
                 Remove the duplicate from one of the included files.",
            ),
            "ETL-DAG-DUPLICATE_DEP" => Some("Each dependency may be listed once per step."),
            "ETL-ID-MALFORMED" => Some(
                "Step identifiers look like `channel://namespace/version/name`, \
                 for example `garden://who/2024-03-01/gho`.",
            ),
            _ => None,
        }
    }
}
