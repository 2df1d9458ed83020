//! Plan execution: step runners, the parallel scheduler and run reports.

mod report;
mod runner;
mod scheduler;

pub use report::{ExecutionReport, SkipReason, StepResultKind, StepRunRecord};
pub use runner::{CommandRunner, FnRunner, NoOpRunner, RunnerRegistry, StepContext, StepRunner};
pub use scheduler::{FailureMode, ParallelScheduler};
