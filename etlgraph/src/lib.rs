//! # etlgraph
//!
//! An incremental, checksum-driven build engine for data pipelines.
//!
//! Steps are declared in a dependency file and identified by URIs such as
//! `garden://who/2024-03-01/gho`. Each run:
//!
//! - **Loads** the graph, resolving dependencies and rejecting cycles
//! - **Checksums** every step from its own files and its upstream checksums
//! - **Classifies** steps as fresh, stale or never built against the stored checksums
//! - **Plans** the dirty part of the requested scope in dependency order
//! - **Executes** the plan on a bounded worker pool, recording checksums of successful steps
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use etlgraph::prelude::*;
//!
//! let engine = Engine::new(EngineConfig::load(None)?)?;
//! let outcome = engine
//!     .run(&PlanRequest::new().with_pattern("garden://who"))
//!     .await?;
//!
//! if let Some(report) = &outcome.report {
//!     println!("{report}");
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod checksum;
pub mod config;
pub mod core;
pub mod engine;
pub mod errors;
pub mod events;
pub mod executor;
pub mod graph;
pub mod plan;
pub mod staleness;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::checksum::{
        ArtifactSource, Checksum, ChecksumEngine, ExternalPolicy, FsArtifactSource,
        MemoryArtifactSource,
    };
    pub use crate::config::EngineConfig;
    pub use crate::core::{
        Channel, ExternalRef, NodeKey, StepIdentifier, StepOutput, StepPattern, StepState,
    };
    pub use crate::engine::{Engine, PlanOutcome, RunOutcome};
    pub use crate::errors::{
        ContractErrorInfo, CycleDetectedError, DependencyResolutionError, EtlError,
        MalformedIdentifierError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executor::{
        CommandRunner, ExecutionReport, FailureMode, FnRunner, ParallelScheduler,
        RunnerRegistry, StepContext, StepRunner,
    };
    pub use crate::graph::{DagSpec, GraphLoader, StepGraph};
    pub use crate::plan::{ExecutionPlan, ExecutionPlanner, PlanRequest};
    pub use crate::staleness::StalenessResolver;
    pub use crate::store::{ChecksumStore, FileChecksumStore, InMemoryChecksumStore};
}
