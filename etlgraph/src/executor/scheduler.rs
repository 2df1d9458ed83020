//! Runs an execution plan on a bounded pool of tokio tasks.
//!
//! A step is dispatched once every in-plan dependency has succeeded and a
//! worker slot is free. Ready steps are dispatched in plan order. The
//! coordinator owns all bookkeeping; workers only run step bodies. Checksums
//! are recorded by the coordinator after a body succeeds, so a failed or
//! skipped step never leaves a record behind.

use super::report::{ExecutionReport, SkipReason, StepResultKind, StepRunRecord};
use super::runner::{RunnerRegistry, StepContext};
use crate::cancellation::CancellationToken;
use crate::core::StepOutput;
use crate::events::{EngineEvent, EventSink, NoOpEventSink};
use crate::plan::{ExecutionPlan, PlannedStep};
use crate::store::ChecksumStore;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What the scheduler does after a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Skip the failed step's dependents and keep running independent branches.
    #[default]
    ContinueOnFailure,
    /// Stop dispatching, let in-flight steps finish, skip the rest.
    StopOnFirstFailure,
}

type Completion = (usize, Result<StepOutput, JoinError>, Duration);

/// Bounded-parallelism plan executor.
#[derive(Debug, Clone)]
pub struct ParallelScheduler {
    workers: usize,
    failure_mode: FailureMode,
    runners: Arc<RunnerRegistry>,
    store: Arc<dyn ChecksumStore>,
    events: Arc<dyn EventSink>,
    cancellation: Arc<CancellationToken>,
    steps_dir: PathBuf,
}

impl ParallelScheduler {
    /// Creates a single-worker scheduler.
    #[must_use]
    pub fn new(runners: Arc<RunnerRegistry>, store: Arc<dyn ChecksumStore>) -> Self {
        Self {
            workers: 1,
            failure_mode: FailureMode::default(),
            runners,
            store,
            events: Arc::new(NoOpEventSink),
            cancellation: Arc::new(CancellationToken::new()),
            steps_dir: PathBuf::from("."),
        }
    }

    /// Sets the worker count. `0` means one worker per available core.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the failure mode.
    #[must_use]
    pub const fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Shares a cancellation token with the scheduler.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: Arc<CancellationToken>) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Sets the directory passed to step bodies.
    #[must_use]
    pub fn with_steps_dir(mut self, steps_dir: impl Into<PathBuf>) -> Self {
        self.steps_dir = steps_dir.into();
        self
    }

    /// Returns the number of concurrent step bodies this scheduler allows.
    #[must_use]
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        } else {
            self.workers
        }
    }

    /// Executes `plan` and reports every step's outcome in plan order.
    pub async fn execute(&self, plan: &ExecutionPlan, run_id: Uuid) -> ExecutionReport {
        let started = Instant::now();
        let steps = plan.steps();
        let workers = self.effective_workers();
        info!(run_id = %run_id, steps = steps.len(), workers, "Executing plan");

        let position: HashMap<_, _> = steps.iter().enumerate().map(|(i, s)| (&s.id, i)).collect();
        let mut remaining = vec![0usize; steps.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
        for (i, step) in steps.iter().enumerate() {
            for dep in &step.dependencies {
                if let Some(&d) = position.get(dep) {
                    remaining[i] += 1;
                    dependents[d].push(i);
                }
            }
        }

        let mut ready: BTreeSet<usize> = (0..steps.len()).filter(|&i| remaining[i] == 0).collect();
        let mut results: Vec<Option<(StepResultKind, Option<Duration>)>> = vec![None; steps.len()];
        let mut in_flight: FuturesUnordered<BoxFuture<'static, Completion>> = FuturesUnordered::new();
        let mut halted: Option<SkipReason> = None;

        loop {
            if halted.is_none() && self.cancellation.is_cancelled() {
                let reason = self.cancellation.reason().unwrap_or_default();
                warn!(run_id = %run_id, reason = %reason, "Run cancelled; draining in-flight steps");
                halted = Some(SkipReason::Cancelled { reason });
            }

            while halted.is_none() && in_flight.len() < workers {
                let Some(idx) = ready.pop_first() else { break };
                in_flight.push(self.dispatch(idx, &steps[idx], run_id));
            }

            let Some((idx, joined, duration)) = in_flight.next().await else {
                break;
            };
            let step = &steps[idx];

            let outcome = match joined {
                Ok(output) if output.is_success() => match self.store.put(&step.id, step.checksum).await {
                    Ok(()) => Ok(()),
                    Err(e) => Err(e.to_string()),
                },
                Ok(output) => Err(output.error_message().unwrap_or_default()),
                Err(e) if e.is_panic() => Err(format!("step body panicked: {e}")),
                Err(e) => Err(format!("step task aborted: {e}")),
            };

            match outcome {
                Ok(()) => {
                    info!(step = %step.id, duration_ms = duration.as_millis(), "Step completed");
                    self.events
                        .emit(&EngineEvent::step_completed(run_id, &step.id, duration));
                    results[idx] = Some((StepResultKind::Succeeded, Some(duration)));
                    for &child in &dependents[idx] {
                        remaining[child] -= 1;
                        if remaining[child] == 0 && results[child].is_none() {
                            ready.insert(child);
                        }
                    }
                }
                Err(message) => {
                    error!(step = %step.id, error = %message, "Step failed");
                    self.events
                        .emit(&EngineEvent::step_failed(run_id, &step.id, &message, duration));
                    results[idx] = Some((StepResultKind::Failed { error: message }, Some(duration)));

                    let reason = SkipReason::UpstreamFailed {
                        ancestor: step.id.clone(),
                    };
                    for skipped in Self::transitive_dependents(idx, &dependents) {
                        if results[skipped].is_none() {
                            ready.remove(&skipped);
                            self.skip(run_id, &steps[skipped], &reason);
                            results[skipped] = Some((
                                StepResultKind::Skipped {
                                    reason: reason.clone(),
                                },
                                None,
                            ));
                        }
                    }

                    if self.failure_mode == FailureMode::StopOnFirstFailure && halted.is_none() {
                        warn!(step = %step.id, "Stopping after first failure");
                        halted = Some(SkipReason::StoppedAfterFailure {
                            failed: step.id.clone(),
                        });
                    }
                }
            }
        }

        let leftover = halted.unwrap_or_else(|| SkipReason::Cancelled {
            reason: "run ended before the step became ready".to_string(),
        });
        let records: Vec<StepRunRecord> = steps
            .iter()
            .zip(results)
            .map(|(step, result)| {
                let (result, duration) = result.unwrap_or_else(|| {
                    self.skip(run_id, step, &leftover);
                    (
                        StepResultKind::Skipped {
                            reason: leftover.clone(),
                        },
                        None,
                    )
                });
                StepRunRecord {
                    step: step.id.clone(),
                    reason: step.reason,
                    result,
                    duration,
                }
            })
            .collect();

        let report = ExecutionReport {
            run_id,
            records,
            duration: started.elapsed(),
            cancelled: self.cancellation.is_cancelled(),
        };
        let (succeeded, failed, skipped) = report.counts();
        self.events.emit(&EngineEvent::run_completed(
            run_id,
            succeeded,
            failed,
            skipped,
            report.duration,
        ));
        info!(run_id = %run_id, succeeded, failed, skipped, "Run finished");
        report
    }

    fn dispatch(&self, idx: usize, step: &PlannedStep, run_id: Uuid) -> BoxFuture<'static, Completion> {
        let started = Instant::now();
        self.events.emit(&EngineEvent::step_started(run_id, &step.id));

        let Some(runner) = self.runners.resolve(step.id.channel()) else {
            let message = format!("no runner registered for channel '{}'", step.id.channel());
            return Box::pin(async move { (idx, Ok(StepOutput::fail(message)), Duration::ZERO) });
        };

        debug!(step = %step.id, runner = runner.name(), reason = %step.reason, "Dispatching step");
        let ctx = StepContext::new(step.id.clone(), step.checksum, run_id)
            .with_steps_dir(self.steps_dir.clone())
            .with_cancellation(Arc::clone(&self.cancellation));
        let handle = tokio::spawn(async move { runner.run(&ctx).await });

        Box::pin(async move {
            let joined = handle.await;
            (idx, joined, started.elapsed())
        })
    }

    fn skip(&self, run_id: Uuid, step: &PlannedStep, reason: &SkipReason) {
        let reason = reason.to_string();
        info!(step = %step.id, reason = %reason, "Step skipped");
        self.events
            .emit(&EngineEvent::step_skipped(run_id, &step.id, &reason));
    }

    fn transitive_dependents(root: usize, dependents: &[Vec<usize>]) -> Vec<usize> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<usize> = dependents[root].iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                queue.extend(dependents[next].iter().copied());
            }
        }
        seen.into_iter().collect()
    }
}
