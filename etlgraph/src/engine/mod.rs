//! The engine: load → checksum → staleness → plan → execute.
//!
//! Planning is a pure function of the DAG, the artifacts, the stored
//! checksums and the request. Only execution writes to the checksum store.

#[cfg(test)]
mod integration_tests;

use crate::cancellation::CancellationToken;
use crate::checksum::{ArtifactSource, ChecksumEngine, ChecksumMap, FsArtifactSource};
use crate::config::EngineConfig;
use crate::core::StepIdentifier;
use crate::errors::EtlError;
use crate::events::{EngineEvent, EventSink, LoggingEventSink};
use crate::executor::{ExecutionReport, ParallelScheduler, RunnerRegistry};
use crate::graph::{DagSpec, GraphLoader, KnownSteps, StepGraph};
use crate::plan::{ExecutionPlan, ExecutionPlanner, PlanRequest};
use crate::staleness::{StalenessReport, StalenessResolver};
use crate::store::{ChecksumStore, FileChecksumStore};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Everything a planning cycle produced.
#[derive(Debug)]
pub struct PlanOutcome {
    /// Identifier shared by the plan event and the run that follows.
    pub run_id: Uuid,
    /// The graph, with the scope's staleness states written in.
    pub graph: StepGraph,
    /// Steps selected by the request's patterns.
    pub focal: BTreeSet<StepIdentifier>,
    /// Fresh full hashes of every node.
    pub checksums: ChecksumMap,
    /// Classification of the scope.
    pub staleness: StalenessReport,
    /// The ordered plan.
    pub plan: ExecutionPlan,
}

impl PlanOutcome {
    /// Returns true if the request's patterns selected no step at all.
    #[must_use]
    pub fn matched_nothing(&self) -> bool {
        self.focal.is_empty()
    }
}

/// The result of [`Engine::run`].
#[derive(Debug)]
pub struct RunOutcome {
    /// The planning cycle. The graph carries terminal states after execution.
    pub planned: PlanOutcome,
    /// Per-step outcomes; `None` on a dry run.
    pub report: Option<ExecutionReport>,
}

impl RunOutcome {
    /// Returns true for a dry run or a run where every attempted step succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.report.as_ref().map_or(true, ExecutionReport::is_success)
    }

    /// The first step failure in plan order, if any.
    #[must_use]
    pub fn first_error(&self) -> Option<EtlError> {
        self.report
            .as_ref()
            .and_then(ExecutionReport::first_error)
            .map(EtlError::from)
    }
}

/// Incremental build engine.
#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn ChecksumStore>,
    source: Arc<dyn ArtifactSource>,
    runners: Arc<RunnerRegistry>,
    events: Arc<dyn EventSink>,
    cancellation: Arc<CancellationToken>,
}

impl Engine {
    /// Creates an engine backed by the filesystem locations in `config`, with
    /// command runners built from its templates.
    pub fn new(config: EngineConfig) -> Result<Self, EtlError> {
        let runners = RunnerRegistry::from_templates(&config.runner_templates()?);
        Ok(Self {
            store: Arc::new(FileChecksumStore::new(&config.checksum_dir)),
            source: Arc::new(FsArtifactSource::new(&config.steps_dir)),
            runners: Arc::new(runners),
            events: Arc::new(LoggingEventSink::default()),
            cancellation: Arc::new(CancellationToken::new()),
            config,
        })
    }

    /// Replaces the checksum store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ChecksumStore>) -> Self {
        self.store = store;
        self
    }

    /// Replaces the artifact source.
    #[must_use]
    pub fn with_artifact_source(mut self, source: Arc<dyn ArtifactSource>) -> Self {
        self.source = source;
        self
    }

    /// Replaces the runner registry.
    #[must_use]
    pub fn with_runners(mut self, runners: RunnerRegistry) -> Self {
        self.runners = Arc::new(runners);
        self
    }

    /// Replaces the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Shares a cancellation token with the engine.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: Arc<CancellationToken>) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the cancellation token; cancelling it aborts the current run.
    #[must_use]
    pub fn cancellation(&self) -> Arc<CancellationToken> {
        Arc::clone(&self.cancellation)
    }

    /// Loads the configured DAG file and builds the graph, resolving
    /// undeclared snapshot dependencies against the steps directory.
    pub fn load_graph(&self) -> Result<StepGraph, EtlError> {
        let spec = DagSpec::load(&self.config.dag_file)?;
        let known = KnownSteps::discover(&self.config.steps_dir);
        debug!(known = known.len(), "Discovered snapshot steps");
        self.build_graph(&spec, known)
    }

    /// Builds a graph from an already-loaded declarative collection.
    pub fn build_graph(&self, spec: &DagSpec, known: KnownSteps) -> Result<StepGraph, EtlError> {
        GraphLoader::new()
            .with_known_steps(known)
            .with_external_policy(self.config.external_policy)
            .load(spec)
    }

    /// Runs one planning cycle over the configured DAG.
    pub async fn plan(&self, request: &PlanRequest) -> Result<PlanOutcome, EtlError> {
        let graph = self.load_graph()?;
        self.plan_graph(graph, request).await
    }

    /// Runs one planning cycle over `graph`.
    pub async fn plan_graph(&self, mut graph: StepGraph, request: &PlanRequest) -> Result<PlanOutcome, EtlError> {
        let started = Instant::now();
        let run_id = Uuid::now_v7();

        let checksums = ChecksumEngine::new(Arc::clone(&self.source)).compute(&graph)?;

        let planner = ExecutionPlanner::new(request.clone());
        let focal = planner.focal(&graph);
        let forced = planner.forced(&focal);
        let scope = planner.scope(&graph, &focal);

        let scope_steps: Vec<StepIdentifier> = scope.iter().cloned().collect();
        let stored = self.store.snapshot(&scope_steps).await?;
        let staleness = StalenessResolver::resolve(&mut graph, &scope_steps, &checksums, &stored, &forced);
        let plan = planner.build(&graph, &scope, &staleness, &checksums);

        info!(
            run_id = %run_id,
            nodes = graph.len(),
            focal = focal.len(),
            scope = scope.len(),
            planned = plan.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "Plan built"
        );
        self.events
            .emit(&EngineEvent::plan_built(run_id, plan.len(), request.dry_run));

        Ok(PlanOutcome {
            run_id,
            graph,
            focal,
            checksums,
            staleness,
            plan,
        })
    }

    /// Executes a plan.
    pub async fn execute(&self, plan: &ExecutionPlan, run_id: Uuid) -> ExecutionReport {
        ParallelScheduler::new(Arc::clone(&self.runners), Arc::clone(&self.store))
            .with_workers(self.config.workers)
            .with_failure_mode(self.config.failure_mode)
            .with_events(Arc::clone(&self.events))
            .with_cancellation(Arc::clone(&self.cancellation))
            .with_steps_dir(self.config.steps_dir.clone())
            .execute(plan, run_id)
            .await
    }

    /// Plans over the configured DAG and, unless the request is a dry run,
    /// executes the plan.
    pub async fn run(&self, request: &PlanRequest) -> Result<RunOutcome, EtlError> {
        let planned = self.plan(request).await?;
        Ok(self.finish(planned, request).await)
    }

    /// Plans over `graph` and, unless the request is a dry run, executes the plan.
    pub async fn run_graph(&self, graph: StepGraph, request: &PlanRequest) -> Result<RunOutcome, EtlError> {
        let planned = self.plan_graph(graph, request).await?;
        Ok(self.finish(planned, request).await)
    }

    async fn finish(&self, mut planned: PlanOutcome, request: &PlanRequest) -> RunOutcome {
        if request.dry_run {
            info!(planned = planned.plan.len(), "Dry run; nothing executed");
            return RunOutcome {
                planned,
                report: None,
            };
        }

        let report = self.execute(&planned.plan, planned.run_id).await;
        report.apply_to(&mut planned.graph);
        RunOutcome {
            planned,
            report: Some(report),
        }
    }
}
