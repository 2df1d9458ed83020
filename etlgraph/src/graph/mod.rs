//! Step graph: declarative specs, loading and the validated DAG.

mod dag;
mod loader;
mod spec;

pub use dag::{StepGraph, StepNode};
pub use loader::{GraphLoader, KnownSteps};
pub use spec::{DagFile, DagSpec, ExternalDeclaration, StepRecord};
