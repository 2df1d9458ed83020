use super::{ChecksumRecord, ChecksumStore};
use crate::checksum::Checksum;
use crate::core::StepIdentifier;
use crate::errors::{ChecksumPersistenceError, EtlError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// In-memory checksum store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryChecksumStore {
    records: Arc<Mutex<BTreeMap<StepIdentifier, ChecksumRecord>>>,
}

impl InMemoryChecksumStore {
    /// Creates a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Returns a copy of every record.
    #[must_use]
    pub fn records(&self) -> Vec<ChecksumRecord> {
        self.records.lock().values().cloned().collect()
    }
}

#[async_trait]
impl ChecksumStore for InMemoryChecksumStore {
    async fn get(&self, step: &StepIdentifier) -> Result<Option<Checksum>, EtlError> {
        Ok(self.records.lock().get(step).map(|r| r.checksum))
    }

    async fn put(&self, step: &StepIdentifier, checksum: Checksum) -> Result<(), ChecksumPersistenceError> {
        self.records
            .lock()
            .insert(step.clone(), ChecksumRecord::new(step.clone(), checksum));
        Ok(())
    }

    async fn remove(&self, step: &StepIdentifier) -> Result<(), EtlError> {
        self.records.lock().remove(step);
        Ok(())
    }
}
