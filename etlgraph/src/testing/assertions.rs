//! Assertions over run reports.

use crate::core::StepIdentifier;
use crate::executor::{ExecutionReport, StepResultKind};

fn result_of<'a>(report: &'a ExecutionReport, step: &StepIdentifier) -> &'a StepResultKind {
    match report.record(step) {
        Some(record) => &record.result,
        None => panic!("{step} is not in the report: {:?}", report.records),
    }
}

/// Asserts that the step ran and succeeded.
pub fn assert_succeeded(report: &ExecutionReport, step: &StepIdentifier) {
    let result = result_of(report, step);
    assert!(
        matches!(result, StepResultKind::Succeeded),
        "Expected {step} to succeed, got {result:?}"
    );
}

/// Asserts that the step ran and failed.
pub fn assert_failed(report: &ExecutionReport, step: &StepIdentifier) {
    let result = result_of(report, step);
    assert!(
        matches!(result, StepResultKind::Failed { .. }),
        "Expected {step} to fail, got {result:?}"
    );
}

/// Asserts that the step was skipped.
pub fn assert_skipped(report: &ExecutionReport, step: &StepIdentifier) {
    let result = result_of(report, step);
    assert!(
        matches!(result, StepResultKind::Skipped { .. }),
        "Expected {step} to be skipped, got {result:?}"
    );
}
