//! Persisted checksums of the last successful run of each step.
//!
//! The store is read once at planning start and written only by the
//! scheduler's coordinator, once per successful step. Records are keyed by the
//! step's canonical identifier and are independently readable and writable.

mod fs;
mod memory;

pub use fs::FileChecksumStore;
pub use memory::InMemoryChecksumStore;

use crate::checksum::Checksum;
use crate::core::StepIdentifier;
use crate::errors::{ChecksumPersistenceError, EtlError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One persisted checksum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumRecord {
    /// The step the checksum belongs to.
    pub step: StepIdentifier,
    /// Full hash at the time of the last successful run.
    pub checksum: Checksum,
    /// When the record was written.
    pub recorded_at: DateTime<Utc>,
}

impl ChecksumRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(step: StepIdentifier, checksum: Checksum) -> Self {
        Self {
            step,
            checksum,
            recorded_at: Utc::now(),
        }
    }
}

/// Storage for step checksums.
#[async_trait]
pub trait ChecksumStore: Send + Sync + fmt::Debug {
    /// Returns the stored checksum of a step, if any.
    async fn get(&self, step: &StepIdentifier) -> Result<Option<Checksum>, EtlError>;

    /// Records the checksum of a successful run. The write is atomic per key.
    async fn put(&self, step: &StepIdentifier, checksum: Checksum) -> Result<(), ChecksumPersistenceError>;

    /// Forgets a step's checksum.
    async fn remove(&self, step: &StepIdentifier) -> Result<(), EtlError>;

    /// Reads the stored checksums of `steps`. Steps without a record are absent
    /// from the result.
    async fn snapshot(
        &self,
        steps: &[StepIdentifier],
    ) -> Result<BTreeMap<StepIdentifier, Checksum>, EtlError> {
        let mut stored = BTreeMap::new();
        for step in steps {
            if let Some(checksum) = self.get(step).await? {
                stored.insert(step.clone(), checksum);
            }
        }
        Ok(stored)
    }
}
