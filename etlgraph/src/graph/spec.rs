//! Declarative dependency files.
//!
//! A DAG file maps step identifiers to the ordered list of things they depend
//! on, and may include other DAG files. JSON and TOML are accepted:
//!
//! ```toml
//! include = ["archive.toml"]
//!
//! [steps]
//! "meadow://who/2024-03-01/gho" = ["snapshot://who/2024-03-01/gho"]
//! "garden://who/2024-03-01/gho" = ["meadow://who/2024-03-01/gho", "data/regions.csv"]
//!
//! [externals."https://example.org/codes.csv"]
//! sha256 = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
//! ```

use crate::errors::{ConfigError, EtlError, GraphValidationError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Declaration attached to an external leaf.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalDeclaration {
    /// Hex-encoded SHA-256 of the external's content, pinned by the DAG author.
    #[serde(default)]
    pub sha256: Option<String>,
}

/// One DAG file as written on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DagFile {
    /// Other DAG files to merge, relative to this file.
    #[serde(default)]
    pub include: Vec<PathBuf>,
    /// Step → ordered dependency references, in file order. A key written
    /// twice appears twice.
    #[serde(default, with = "step_entries")]
    pub steps: Vec<(String, Vec<String>)>,
    /// Declarations for remote externals.
    #[serde(default)]
    pub externals: BTreeMap<String, ExternalDeclaration>,
}

impl DagFile {
    /// Returns the dependencies of the first definition of `step`.
    #[must_use]
    pub fn dependencies(&self, step: &str) -> Option<&[String]> {
        self.steps
            .iter()
            .find(|(name, _)| name == step)
            .map(|(_, deps)| deps.as_slice())
    }

    /// Parses a DAG file, picking the format from the extension (`.toml`, otherwise JSON).
    pub fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        let origin = path.display().to_string();
        if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(content).map_err(|e| ConfigError::new(origin, e.to_string()))
        } else {
            serde_json::from_str(content).map_err(|e| ConfigError::new(origin, e.to_string()))
        }
    }
}

mod step_entries {
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    type Entries = Vec<(String, Vec<String>)>;

    pub fn serialize<S>(entries: &Entries, serializer: S) -> Result<S::Ok, S::Error>
    where S: Serializer {
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (step, deps) in entries {
            map.serialize_entry(step, deps)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Entries, D::Error>
    where D: Deserializer<'de> {
        deserializer.deserialize_map(EntriesVisitor)
    }

    struct EntriesVisitor;

    impl<'de> Visitor<'de> for EntriesVisitor {
        type Value = Entries;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a table of step -> dependency list")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Entries, A::Error>
        where A: MapAccess<'de> {
            let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some(entry) = access.next_entry::<String, Vec<String>>()? {
                entries.push(entry);
            }
            Ok(entries)
        }
    }
}

/// One step definition from the declarative collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    /// The step reference, as written.
    pub step: String,
    /// Dependency references, as written.
    pub dependencies: Vec<String>,
    /// The file the record came from, for diagnostics.
    pub origin: PathBuf,
}

/// The merged declarative collection handed to the graph loader.
#[derive(Debug, Clone, Default)]
pub struct DagSpec {
    /// All step records across included files.
    pub records: Vec<StepRecord>,
    /// Declarations for remote externals.
    pub externals: BTreeMap<String, ExternalDeclaration>,
    /// Directory relative file externals are resolved against.
    pub base_dir: PathBuf,
}

impl DagSpec {
    /// Creates an empty collection rooted at `base_dir`.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            records: Vec::new(),
            externals: BTreeMap::new(),
            base_dir: base_dir.into(),
        }
    }

    /// Adds a step record.
    #[must_use]
    pub fn with_step<I, S>(mut self, step: impl Into<String>, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.records.push(StepRecord {
            step: step.into(),
            dependencies: dependencies.into_iter().map(Into::into).collect(),
            origin: PathBuf::new(),
        });
        self
    }

    /// Declares the content hash of a remote external.
    #[must_use]
    pub fn with_external_hash(mut self, reference: impl Into<String>, sha256: impl Into<String>) -> Self {
        self.externals.insert(
            reference.into(),
            ExternalDeclaration {
                sha256: Some(sha256.into()),
            },
        );
        self
    }

    /// Loads a DAG file and everything it includes.
    ///
    /// Relative file externals resolve against the directory of the root file.
    /// A step defined in two files fails with a duplicate-step error.
    pub fn load(path: &Path) -> Result<Self, EtlError> {
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut spec = Self::new(base_dir);
        let mut visited = HashSet::new();
        let mut defined: BTreeMap<String, PathBuf> = BTreeMap::new();
        spec.load_file(path, &mut visited, &mut defined)?;
        debug!(
            dag_file = %path.display(),
            steps = spec.records.len(),
            files = visited.len(),
            "Loaded DAG spec"
        );
        Ok(spec)
    }

    fn load_file(
        &mut self,
        path: &Path,
        visited: &mut HashSet<PathBuf>,
        defined: &mut BTreeMap<String, PathBuf>,
    ) -> Result<(), EtlError> {
        let canonical = fs::canonicalize(path)
            .map_err(|e| ConfigError::new(path.display().to_string(), e.to_string()))?;
        if !visited.insert(canonical) {
            // Already merged through another include chain.
            return Ok(());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::new(path.display().to_string(), e.to_string()))?;
        let file = DagFile::parse(path, &content)?;

        for (step, dependencies) in file.steps {
            if let Some(first) = defined.get(&step) {
                let origin = if first == path {
                    format!("{} (twice)", path.display())
                } else {
                    format!("{} and {}", first.display(), path.display())
                };
                return Err(GraphValidationError::duplicate_step(step, origin).into());
            }
            defined.insert(step.clone(), path.to_path_buf());
            self.records.push(StepRecord {
                step,
                dependencies,
                origin: path.to_path_buf(),
            });
        }
        self.externals.extend(file.externals);

        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        for include in file.include {
            self.load_file(&dir.join(include), visited, defined)?;
        }
        Ok(())
    }
}
