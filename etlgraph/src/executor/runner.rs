//! Step bodies and how the scheduler finds them.
//!
//! The engine never knows what a step does. A [`StepRunner`] is registered per
//! channel, with an optional fallback, and receives a [`StepContext`] for each
//! step it has to run.

use crate::cancellation::CancellationToken;
use crate::checksum::Checksum;
use crate::core::{Channel, StepIdentifier, StepOutput};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Debug};
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Everything a step body is told about the step it runs.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// The step being built.
    pub step: StepIdentifier,
    /// The checksum that will be recorded if the body succeeds.
    pub checksum: Checksum,
    /// The run this step belongs to.
    pub run_id: Uuid,
    /// Root of the step sources.
    pub steps_dir: PathBuf,
    /// Tripped when the run is aborted.
    pub cancellation: Arc<CancellationToken>,
}

impl StepContext {
    /// Creates a context with a fresh cancellation token.
    #[must_use]
    pub fn new(step: StepIdentifier, checksum: Checksum, run_id: Uuid) -> Self {
        Self {
            step,
            checksum,
            run_id,
            steps_dir: PathBuf::from("."),
            cancellation: Arc::new(CancellationToken::new()),
        }
    }

    /// Sets the step source root.
    #[must_use]
    pub fn with_steps_dir(mut self, steps_dir: impl Into<PathBuf>) -> Self {
        self.steps_dir = steps_dir.into();
        self
    }

    /// Shares the run's cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: Arc<CancellationToken>) -> Self {
        self.cancellation = cancellation;
        self
    }
}

/// A step body.
#[async_trait]
pub trait StepRunner: Send + Sync + Debug {
    /// Returns the name of the runner.
    fn name(&self) -> &str;

    /// Runs the step and reports the outcome.
    async fn run(&self, ctx: &StepContext) -> StepOutput;
}

type RunFn = dyn Fn(StepContext) -> BoxFuture<'static, StepOutput> + Send + Sync;

/// A runner backed by an async closure.
pub struct FnRunner {
    name: String,
    func: Arc<RunFn>,
}

impl FnRunner {
    /// Wraps `func` as a runner.
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepOutput> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |ctx: StepContext| -> BoxFuture<'static, StepOutput> { Box::pin(func(ctx)) }),
        }
    }
}

impl Debug for FnRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnRunner").field("name", &self.name).finish()
    }
}

#[async_trait]
impl StepRunner for FnRunner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &StepContext) -> StepOutput {
        (self.func)(ctx.clone()).await
    }
}

/// A runner that succeeds without doing anything.
#[derive(Debug, Clone, Default)]
pub struct NoOpRunner;

#[async_trait]
impl StepRunner for NoOpRunner {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn run(&self, _ctx: &StepContext) -> StepOutput {
        StepOutput::ok()
    }
}

/// Runs an external command built from a template.
///
/// The placeholders `{step}`, `{channel}`, `{namespace}`, `{version}` and
/// `{name}` are substituted before the template is split on whitespace. The
/// command runs in the steps directory; a non-zero exit fails the step with
/// the tail of its stderr.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    template: String,
}

impl CommandRunner {
    const STDERR_TAIL_LINES: usize = 20;

    /// Creates a runner for `template`.
    #[must_use]
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Returns the raw template.
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Substitutes the step's fields into the template and splits it into
    /// program and arguments.
    #[must_use]
    pub fn render(&self, step: &StepIdentifier) -> Vec<String> {
        self.template
            .replace("{step}", step.as_str())
            .replace("{channel}", step.channel().as_str())
            .replace("{namespace}", step.namespace())
            .replace("{version}", step.version().as_str())
            .replace("{name}", step.short_name())
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    fn stderr_tail(stderr: &[u8]) -> String {
        let text = String::from_utf8_lossy(stderr);
        let lines: Vec<&str> = text.lines().collect();
        let start = lines.len().saturating_sub(Self::STDERR_TAIL_LINES);
        lines[start..].join("\n")
    }
}

#[async_trait]
impl StepRunner for CommandRunner {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn run(&self, ctx: &StepContext) -> StepOutput {
        let argv = self.render(&ctx.step);
        let Some((program, args)) = argv.split_first() else {
            return StepOutput::fail(format!("empty command template for {}", ctx.step));
        };

        debug!(step = %ctx.step, command = %argv.join(" "), "Spawning step command");
        let output = tokio::process::Command::new(program)
            .args(args)
            .current_dir(&ctx.steps_dir)
            .env("ETL_STEP", ctx.step.as_str())
            .env("ETL_RUN_ID", ctx.run_id.to_string())
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => StepOutput::ok()
                .add_metadata("exit_code", serde_json::json!(output.status.code())),
            Ok(output) => {
                let tail = Self::stderr_tail(&output.stderr);
                let status = output
                    .status
                    .code()
                    .map_or_else(|| "terminated by signal".to_string(), |c| format!("exit code {c}"));
                if tail.is_empty() {
                    StepOutput::fail(format!("`{program}` failed with {status}"))
                } else {
                    StepOutput::fail(format!("`{program}` failed with {status}:\n{tail}"))
                }
            }
            Err(e) => StepOutput::fail(format!("could not spawn `{program}`: {e}")),
        }
    }
}

/// Maps channels to runners.
#[derive(Debug, Clone, Default)]
pub struct RunnerRegistry {
    runners: HashMap<Channel, Arc<dyn StepRunner>>,
    fallback: Option<Arc<dyn StepRunner>>,
}

impl RunnerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry of [`CommandRunner`]s from per-channel templates.
    #[must_use]
    pub fn from_templates(templates: &BTreeMap<Channel, String>) -> Self {
        templates.iter().fold(Self::new(), |registry, (channel, template)| {
            registry.with_runner(*channel, Arc::new(CommandRunner::new(template.clone())))
        })
    }

    /// Registers the runner for a channel, replacing any previous one.
    #[must_use]
    pub fn with_runner(mut self, channel: Channel, runner: Arc<dyn StepRunner>) -> Self {
        self.runners.insert(channel, runner);
        self
    }

    /// Sets the runner used for channels with no runner of their own.
    #[must_use]
    pub fn with_fallback(mut self, runner: Arc<dyn StepRunner>) -> Self {
        self.fallback = Some(runner);
        self
    }

    /// Returns the runner for a channel.
    #[must_use]
    pub fn resolve(&self, channel: Channel) -> Option<Arc<dyn StepRunner>> {
        self.runners
            .get(&channel)
            .or(self.fallback.as_ref())
            .cloned()
    }

    /// Returns true if no runner and no fallback is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runners.is_empty() && self.fallback.is_none()
    }
}
