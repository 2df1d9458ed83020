//! Plan and project fixtures.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::checksum::Checksum;
use crate::config::EngineConfig;
use crate::core::StepIdentifier;
use crate::plan::{ExecutionPlan, PlanReason, PlannedStep};

/// Parses a step identifier.
pub fn id(s: &str) -> StepIdentifier {
    StepIdentifier::parse(s).unwrap()
}

/// Builds a plan from `(step, dependencies)` pairs, in the given order.
pub fn plan_of(steps: &[(&str, &[&str])]) -> ExecutionPlan {
    ExecutionPlan::new(
        steps
            .iter()
            .map(|(step, deps)| PlannedStep {
                id: id(step),
                reason: PlanReason::NeverBuilt,
                dependencies: deps.iter().map(|d| id(d)).collect::<BTreeSet<_>>(),
                checksum: Checksum::of_bytes(step.as_bytes()),
            })
            .collect(),
    )
}

/// Builds a plan where each step depends on the previous one.
pub fn chain_plan(steps: &[&str]) -> ExecutionPlan {
    let pairs: Vec<(&str, Vec<&str>)> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (*s, if i == 0 { Vec::new() } else { vec![steps[i - 1]] }))
        .collect();
    let borrowed: Vec<(&str, &[&str])> = pairs.iter().map(|(s, d)| (*s, d.as_slice())).collect();
    plan_of(&borrowed)
}

/// A throwaway project directory with a DAG file, step sources and a
/// checksum directory.
#[derive(Debug)]
pub struct Project {
    dir: TempDir,
}

impl Project {
    /// Creates an empty project.
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("steps")).unwrap();
        Self { dir }
    }

    /// The project root.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Root of the step sources.
    pub fn steps_dir(&self) -> PathBuf {
        self.root().join("steps")
    }

    /// Where checksums are recorded.
    pub fn checksum_dir(&self) -> PathBuf {
        self.root().join("checksums")
    }

    /// The root DAG file.
    pub fn dag_file(&self) -> PathBuf {
        self.root().join("dag.toml")
    }

    /// Writes the root DAG file.
    pub fn write_dag(&self, content: &str) {
        fs::write(self.dag_file(), content).unwrap();
    }

    /// Writes the source file of a step and returns its path.
    pub fn write_step(&self, step: &str, content: &str) -> PathBuf {
        let step = id(step);
        let dir = self.steps_dir().join(step.relative_dir());
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{}.py", step.short_name()));
        fs::write(&path, content).unwrap();
        path
    }

    /// Writes a file relative to the project root and returns its path.
    pub fn write_file(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    /// An engine configuration pointing at this project.
    pub fn config(&self) -> EngineConfig {
        EngineConfig::new()
            .with_dag_file(self.dag_file())
            .with_steps_dir(self.steps_dir())
            .with_checksum_dir(self.checksum_dir())
    }
}
