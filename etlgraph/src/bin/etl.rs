//! `etl`: plan and run the steps of a data pipeline incrementally.
//!
//! ```text
//! etl garden://who --dry-run
//! etl gho --force --downstream --workers 4
//! etl garden://who/2024-03-01/gho --only
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use etlgraph::config::EngineConfig;
use etlgraph::engine::Engine;
use etlgraph::errors::EtlError;
use etlgraph::executor::FailureMode;
use etlgraph::plan::PlanRequest;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Incremental step runner.
#[derive(Debug, Parser)]
#[command(name = "etl", version, about)]
struct Cli {
    /// Step patterns; a step is selected if any pattern matches. No pattern selects every step.
    patterns: Vec<String>,

    /// Print the plan without executing it.
    #[arg(long)]
    dry_run: bool,

    /// Rebuild the selected steps even if they are fresh.
    #[arg(long, short = 'f')]
    force: bool,

    /// Run only the selected steps, without their dependencies or dependents.
    #[arg(long, short = 'o')]
    only: bool,

    /// Also run the steps that depend on the selected ones.
    #[arg(long, short = 'd', conflicts_with = "only")]
    downstream: bool,

    /// Do not pull in the dependencies of the selected steps.
    #[arg(long, conflicts_with = "only")]
    no_upstream: bool,

    /// Match patterns against the full step URI exactly.
    #[arg(long, short = 'x')]
    exact_match: bool,

    /// Patterns of steps to leave out.
    #[arg(long, value_name = "PATTERN")]
    exclude: Vec<String>,

    /// Concurrent steps (0 = one per CPU).
    #[arg(long, short = 'w')]
    workers: Option<usize>,

    /// Stop dispatching new steps after the first failure.
    #[arg(long, short = 's')]
    stop_on_failure: bool,

    /// Dependency file (overrides configuration).
    #[arg(long, value_name = "FILE")]
    dag: Option<PathBuf>,

    /// Step source root (overrides configuration).
    #[arg(long, value_name = "DIR")]
    steps_dir: Option<PathBuf>,

    /// Checksum directory (overrides configuration).
    #[arg(long, value_name = "DIR")]
    checksum_dir: Option<PathBuf>,

    /// Configuration file (default: ./etl.toml if present).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging.
    #[arg(long, short = 'v')]
    verbose: bool,

    /// Log as JSON lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn request(&self) -> PlanRequest {
        let mut request = PlanRequest::new()
            .with_exact_match(self.exact_match)
            .with_only(self.only)
            .with_upstream(!self.no_upstream)
            .with_downstream(self.downstream)
            .with_force(self.force)
            .with_dry_run(self.dry_run);
        for pattern in &self.patterns {
            request = request.with_pattern(pattern.clone());
        }
        for pattern in &self.exclude {
            request = request.with_exclude(pattern.clone());
        }
        request
    }

    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = EngineConfig::load(self.config.as_deref()).context("Failed to load configuration")?;
        if let Some(dag) = &self.dag {
            config.dag_file.clone_from(dag);
        }
        if let Some(dir) = &self.steps_dir {
            config.steps_dir.clone_from(dir);
        }
        if let Some(dir) = &self.checksum_dir {
            config.checksum_dir.clone_from(dir);
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if self.stop_on_failure {
            config.failure_mode = FailureMode::StopOnFirstFailure;
        }
        Ok(config)
    }
}

fn init_logging(cli: &Cli) {
    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

fn describe_patterns(patterns: &[String]) -> String {
    if patterns.is_empty() {
        "(no steps are defined)".to_string()
    } else {
        patterns.join(", ")
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let config = cli.engine_config()?;
    let engine = Engine::new(config).context("Failed to set up the engine")?;

    let cancellation = engine.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; waiting for running steps to finish");
            cancellation.cancel("interrupted");
        }
    });

    let request = cli.request();
    let planned = engine.plan(&request).await.context("Failed to plan")?;
    if planned.matched_nothing() {
        println!("No steps match {}", describe_patterns(&request.patterns));
        return Ok(true);
    }
    print!("{}", planned.plan);
    if request.dry_run || planned.plan.is_empty() {
        return Ok(true);
    }

    let report = engine.execute(&planned.plan, planned.run_id).await;
    print!("{report}");
    if let Some(error) = report.first_error() {
        info!(error = %error, "Run finished with failures");
    }
    Ok(report.is_success())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e:#}");
            if let Some(err) = e.downcast_ref::<EtlError>() {
                if let Some(code) = err.code() {
                    eprintln!("  code: {code}");
                }
                if let Some(hint) = err.hint() {
                    eprintln!("  hint: {hint}");
                }
            }
            ExitCode::from(2)
        }
    }
}
