//! One JSON file per step under a checksum directory.
//!
//! `garden://who/2024-03-01/gho` is stored at
//! `<dir>/garden/who/2024-03-01/gho.json`. Writes go to a temporary file that
//! is flushed to disk and then renamed over the record, so a reader never sees
//! a partial record.

use super::{ChecksumRecord, ChecksumStore};
use crate::checksum::Checksum;
use crate::core::StepIdentifier;
use crate::errors::{ChecksumPersistenceError, EtlError};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Filesystem-backed checksum store.
#[derive(Debug)]
pub struct FileChecksumStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileChecksumStore {
    /// Creates a store rooted at `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record for `step`.
    #[must_use]
    pub fn record_path(&self, step: &StepIdentifier) -> PathBuf {
        self.dir
            .join(step.relative_dir())
            .join(format!("{}.json", step.short_name()))
    }

    /// Reads the full record of a step.
    ///
    /// A record that cannot be parsed, or that belongs to a different step, is
    /// reported as missing so the step is rebuilt.
    pub async fn read_record(&self, step: &StepIdentifier) -> Result<Option<ChecksumRecord>, EtlError> {
        let path = self.record_path(step);
        let data = match fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<ChecksumRecord>(&data) {
            Ok(record) if record.step == *step => Ok(Some(record)),
            Ok(record) => {
                warn!(
                    path = %path.display(),
                    expected = %step,
                    found = %record.step,
                    "Checksum record belongs to another step; ignoring it"
                );
                Ok(None)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt checksum record; ignoring it");
                Ok(None)
            }
        }
    }

    async fn write_record(&self, record: &ChecksumRecord) -> io::Result<()> {
        let path = self.record_path(&record.step);
        let parent = path.parent().map_or_else(|| self.dir.clone(), Path::to_path_buf);
        let tmp_path = path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(record).map_err(io::Error::other)?;

        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&parent).await?;
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl ChecksumStore for FileChecksumStore {
    async fn get(&self, step: &StepIdentifier) -> Result<Option<Checksum>, EtlError> {
        Ok(self.read_record(step).await?.map(|r| r.checksum))
    }

    async fn put(&self, step: &StepIdentifier, checksum: Checksum) -> Result<(), ChecksumPersistenceError> {
        let record = ChecksumRecord::new(step.clone(), checksum);
        self.write_record(&record)
            .await
            .map_err(|e| ChecksumPersistenceError::new(step.as_str(), e.to_string()))?;
        debug!(step = %step, checksum = %checksum, "Recorded checksum");
        Ok(())
    }

    async fn remove(&self, step: &StepIdentifier) -> Result<(), EtlError> {
        let _guard = self.write_lock.lock().await;
        match fs::remove_file(self.record_path(step)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
