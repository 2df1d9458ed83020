//! Mock runners and stores.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::checksum::Checksum;
use crate::core::{StepIdentifier, StepOutput};
use crate::errors::{ChecksumPersistenceError, EtlError};
use crate::executor::{StepContext, StepRunner};
use crate::store::{ChecksumStore, InMemoryChecksumStore};

type StartHook = Box<dyn Fn(&StepIdentifier) + Send + Sync>;

fn parse_all<'a>(steps: impl IntoIterator<Item = &'a str>) -> BTreeSet<StepIdentifier> {
    steps
        .into_iter()
        .map(|s| StepIdentifier::parse(s).unwrap())
        .collect()
}

/// A runner that records which steps it ran, in what order, and how many
/// ran at once.
#[derive(Default)]
pub struct RecordingRunner {
    failures: BTreeSet<StepIdentifier>,
    panics: BTreeSet<StepIdentifier>,
    delay: Option<Duration>,
    step_delays: BTreeMap<StepIdentifier, Duration>,
    on_start: Option<StartHook>,
    started: Mutex<Vec<StepIdentifier>>,
    finished: Mutex<Vec<StepIdentifier>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl RecordingRunner {
    /// Creates a runner where every step succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the listed steps report failure.
    #[must_use]
    pub fn with_failures<'a>(mut self, steps: impl IntoIterator<Item = &'a str>) -> Self {
        self.failures = parse_all(steps);
        self
    }

    /// Makes the listed steps panic.
    #[must_use]
    pub fn with_panics<'a>(mut self, steps: impl IntoIterator<Item = &'a str>) -> Self {
        self.panics = parse_all(steps);
        self
    }

    /// Makes every step sleep before finishing.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Makes one step sleep for `delay`, overriding the common delay.
    #[must_use]
    pub fn with_step_delay(mut self, step: &str, delay: Duration) -> Self {
        self.step_delays.insert(StepIdentifier::parse(step).unwrap(), delay);
        self
    }

    /// Calls `hook` as each step starts.
    #[must_use]
    pub fn on_start(mut self, hook: impl Fn(&StepIdentifier) + Send + Sync + 'static) -> Self {
        self.on_start = Some(Box::new(hook));
        self
    }

    /// Steps in the order they started.
    #[must_use]
    pub fn started(&self) -> Vec<StepIdentifier> {
        self.started.lock().clone()
    }

    /// Steps in the order they finished.
    #[must_use]
    pub fn finished(&self) -> Vec<StepIdentifier> {
        self.finished.lock().clone()
    }

    /// Returns true if the step body was invoked.
    #[must_use]
    pub fn ran(&self, step: &StepIdentifier) -> bool {
        self.started.lock().contains(step)
    }

    /// The highest number of bodies that ran at the same time.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for RecordingRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingRunner")
            .field("failures", &self.failures)
            .field("started", &self.started.lock().len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StepRunner for RecordingRunner {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn run(&self, ctx: &StepContext) -> StepOutput {
        self.started.lock().push(ctx.step.clone());
        if let Some(hook) = &self.on_start {
            hook(&ctx.step);
        }

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.step_delays.get(&ctx.step).copied().or(self.delay) {
            tokio::time::sleep(delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.finished.lock().push(ctx.step.clone());

        if self.panics.contains(&ctx.step) {
            panic!("scripted panic in {}", ctx.step);
        }
        if self.failures.contains(&ctx.step) {
            return StepOutput::fail(format!("scripted failure in {}", ctx.step));
        }
        StepOutput::ok()
    }
}

/// A store whose writes fail, for all steps or the listed ones.
#[derive(Debug, Default)]
pub struct FailingChecksumStore {
    inner: InMemoryChecksumStore,
    only: BTreeSet<StepIdentifier>,
}

impl FailingChecksumStore {
    /// Creates a store where every write fails.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts failing writes to the listed steps.
    #[must_use]
    pub fn failing_on<'a>(mut self, steps: impl IntoIterator<Item = &'a str>) -> Self {
        self.only = parse_all(steps);
        self
    }
}

#[async_trait]
impl ChecksumStore for FailingChecksumStore {
    async fn get(&self, step: &StepIdentifier) -> Result<Option<Checksum>, EtlError> {
        self.inner.get(step).await
    }

    async fn put(&self, step: &StepIdentifier, checksum: Checksum) -> Result<(), ChecksumPersistenceError> {
        if self.only.is_empty() || self.only.contains(step) {
            return Err(ChecksumPersistenceError::new(step.as_str(), "disk full"));
        }
        self.inner.put(step, checksum).await
    }

    async fn remove(&self, step: &StepIdentifier) -> Result<(), EtlError> {
        self.inner.remove(step).await
    }
}
