//! Testing utilities for the engine.
//!
//! This module provides:
//! - A recording step runner with scripted failures and delays
//! - A checksum store whose writes fail
//! - Plan and on-disk project fixtures
//! - Assertions over run reports

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_failed, assert_skipped, assert_succeeded};
pub use fixtures::{chain_plan, id, plan_of, Project};
pub use mocks::{FailingChecksumStore, RecordingRunner};
