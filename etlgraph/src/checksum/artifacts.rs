//! Where local hashes come from.
//!
//! A step's local hash covers every file in its directory whose name starts
//! with the step's short name, plus every file below a matching directory.
//! The prefix rule over-includes: `gho` also picks up `gho_regions.py`.

use super::Checksum;
use crate::core::StepIdentifier;
use crate::errors::ArtifactReadError;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Supplies content fingerprints for steps and file externals.
pub trait ArtifactSource: Send + Sync + fmt::Debug {
    /// Hash of the step's own artifacts, excluding its dependencies.
    fn step_digest(&self, step: &StepIdentifier) -> Result<Checksum, ArtifactReadError>;

    /// Hash of a single file's bytes.
    fn file_digest(&self, path: &Path) -> Result<Checksum, ArtifactReadError>;
}

/// Reads artifacts from a steps directory laid out as
/// `<root>/<channel>/<namespace>/<version>/<short_name>*`.
#[derive(Debug, Clone)]
pub struct FsArtifactSource {
    root: PathBuf,
}

impl FsArtifactSource {
    /// Creates a source rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the steps root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lists the files belonging to `step`, as (path relative to the step
    /// directory, absolute path), sorted by relative path.
    pub fn step_files(&self, step: &StepIdentifier) -> Result<Vec<(String, PathBuf)>, ArtifactReadError> {
        let dir = self.root.join(step.relative_dir());
        let read_error = |path: &Path, e: io::Error| ArtifactReadError::new(step.as_str(), path, e);

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(read_error(&dir, e)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| read_error(&dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(step.short_name()) {
                continue;
            }

            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| read_error(&path, e))?;
            if file_type.is_dir() {
                for inner in WalkDir::new(&path) {
                    let inner = inner.map_err(|e| {
                        let at = e.path().map_or_else(|| path.clone(), Path::to_path_buf);
                        read_error(&at, e.into())
                    })?;
                    if inner.file_type().is_file() {
                        let relative = inner
                            .path()
                            .strip_prefix(&dir)
                            .unwrap_or(inner.path())
                            .to_string_lossy()
                            .replace('\\', "/");
                        files.push((relative, inner.into_path()));
                    }
                }
            } else {
                files.push((name, path));
            }
        }

        files.sort();
        Ok(files)
    }
}

impl ArtifactSource for FsArtifactSource {
    fn step_digest(&self, step: &StepIdentifier) -> Result<Checksum, ArtifactReadError> {
        let mut hasher = Sha256::new();
        hasher.update(step.as_str().as_bytes());
        hasher.update([0]);

        for (relative, path) in self.step_files(step)? {
            let mut file = File::open(&path).map_err(|e| ArtifactReadError::new(step.as_str(), &path, e))?;
            let len = file
                .metadata()
                .map_err(|e| ArtifactReadError::new(step.as_str(), &path, e))?
                .len();

            hasher.update(relative.as_bytes());
            hasher.update([0]);
            hasher.update(len.to_le_bytes());
            io::copy(&mut file, &mut hasher).map_err(|e| ArtifactReadError::new(step.as_str(), &path, e))?;
        }

        Ok(Checksum::from_bytes(hasher.finalize().into()))
    }

    fn file_digest(&self, path: &Path) -> Result<Checksum, ArtifactReadError> {
        let owner = path.display().to_string();
        let mut file = File::open(path).map_err(|e| ArtifactReadError::new(owner.as_str(), path, e))?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher).map_err(|e| ArtifactReadError::new(owner.as_str(), path, e))?;
        Ok(Checksum::from_bytes(hasher.finalize().into()))
    }
}

/// In-memory artifacts, for tests and benchmarks.
#[derive(Debug, Default)]
pub struct MemoryArtifactSource {
    steps: RwLock<HashMap<StepIdentifier, Vec<u8>>>,
    files: RwLock<HashMap<PathBuf, Vec<u8>>>,
}

impl MemoryArtifactSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the content of a step's artifacts.
    pub fn set_step(&self, step: &StepIdentifier, content: impl Into<Vec<u8>>) {
        self.steps.write().insert(step.clone(), content.into());
    }

    /// Modifies a step's artifacts by appending a byte.
    pub fn touch(&self, step: &StepIdentifier) {
        self.steps.write().entry(step.clone()).or_default().push(b'.');
    }

    /// Replaces the content of a file external.
    pub fn set_file(&self, path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) {
        self.files.write().insert(path.into(), content.into());
    }
}

impl ArtifactSource for MemoryArtifactSource {
    fn step_digest(&self, step: &StepIdentifier) -> Result<Checksum, ArtifactReadError> {
        let mut hasher = Sha256::new();
        hasher.update(step.as_str().as_bytes());
        hasher.update([0]);
        if let Some(content) = self.steps.read().get(step) {
            hasher.update(content);
        }
        Ok(Checksum::from_bytes(hasher.finalize().into()))
    }

    fn file_digest(&self, path: &Path) -> Result<Checksum, ArtifactReadError> {
        self.files
            .read()
            .get(path)
            .map(|content| Checksum::of_bytes(content))
            .ok_or_else(|| {
                ArtifactReadError::new(
                    path.display().to_string(),
                    path,
                    io::Error::new(io::ErrorKind::NotFound, "no such file"),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn id(s: &str) -> StepIdentifier {
        StepIdentifier::parse(s).unwrap()
    }

    fn layout() -> (TempDir, FsArtifactSource) {
        let dir = TempDir::new().unwrap();
        let step_dir = dir.path().join("garden/who/2024/gho");
        fs::create_dir_all(&step_dir).unwrap();
        fs::write(dir.path().join("garden/who/2024/gho.py"), "print(1)").unwrap();
        fs::write(dir.path().join("garden/who/2024/gho.meta.yml"), "title: x").unwrap();
        fs::write(dir.path().join("garden/who/2024/other.py"), "print(2)").unwrap();
        fs::write(step_dir.join("shared.py"), "x = 1").unwrap();
        let source = FsArtifactSource::new(dir.path());
        (dir, source)
    }

    #[test]
    fn test_step_files_by_prefix_and_directory() {
        let (_dir, source) = layout();
        let files: Vec<String> = source
            .step_files(&id("garden://who/2024/gho"))
            .unwrap()
            .into_iter()
            .map(|(relative, _)| relative)
            .collect();

        assert_eq!(files, vec!["gho.meta.yml", "gho.py", "gho/shared.py"]);
    }

    #[test]
    fn test_step_digest_tracks_content() {
        let (dir, source) = layout();
        let step = id("garden://who/2024/gho");
        let before = source.step_digest(&step).unwrap();

        assert_eq!(before, source.step_digest(&step).unwrap());

        fs::write(dir.path().join("garden/who/2024/other.py"), "print(3)").unwrap();
        assert_eq!(before, source.step_digest(&step).unwrap());

        fs::write(dir.path().join("garden/who/2024/gho/shared.py"), "x = 2").unwrap();
        assert_ne!(before, source.step_digest(&step).unwrap());
    }

    #[test]
    fn test_missing_step_dir_is_empty() {
        let (_dir, source) = layout();
        let step = id("meadow://who/2024/gho");

        assert!(source.step_files(&step).unwrap().is_empty());
        assert!(source.step_digest(&step).is_ok());
    }

    #[test]
    fn test_step_digest_includes_identity() {
        let (_dir, source) = layout();

        assert_ne!(
            source.step_digest(&id("meadow://a/1/x")).unwrap(),
            source.step_digest(&id("meadow://a/1/y")).unwrap()
        );
    }

    #[test]
    fn test_file_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("regions.csv");
        fs::write(&path, "test").unwrap();
        let source = FsArtifactSource::new(dir.path());

        assert_eq!(source.file_digest(&path).unwrap(), Checksum::of_bytes(b"test"));
        assert!(source.file_digest(&dir.path().join("missing.csv")).is_err());
    }

    #[test]
    fn test_memory_source_touch() {
        let source = MemoryArtifactSource::new();
        let step = id("garden://a/1/x");
        let before = source.step_digest(&step).unwrap();

        source.touch(&step);
        assert_ne!(before, source.step_digest(&step).unwrap());
    }
}
