//! Keys for graph nodes: managed steps and unmanaged external leaves.

use super::StepIdentifier;
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

/// An unmanaged input a step can depend on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExternalRef {
    /// A local file, fingerprinted by its bytes.
    File(PathBuf),
    /// A remote resource (`http(s)://`, `etag://`) with no local fingerprint.
    Remote(String),
}

impl ExternalRef {
    const REMOTE_SCHEMES: [&'static str; 3] = ["http", "https", "etag"];

    /// Interprets a dependency reference as an external leaf.
    ///
    /// Bare paths and `file://` references are files; known remote schemes are
    /// remote resources. Returns `None` for any other `scheme://` reference.
    #[must_use]
    pub fn parse(reference: &str) -> Option<Self> {
        match reference.split_once("://") {
            None => Some(Self::File(PathBuf::from(reference))),
            Some(("file", path)) => Some(Self::File(PathBuf::from(path))),
            Some((scheme, _)) if Self::REMOTE_SCHEMES.contains(&scheme) => {
                Some(Self::Remote(reference.to_string()))
            }
            Some(_) => None,
        }
    }

    /// Resolves a relative file path against `base`.
    #[must_use]
    pub fn resolved_against(self, base: &Path) -> Self {
        match self {
            Self::File(path) if path.is_relative() => Self::File(base.join(path)),
            other => other,
        }
    }
}

impl fmt::Display for ExternalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "file://{}", path.display()),
            Self::Remote(url) => f.write_str(url),
        }
    }
}

/// Key of a node in the step graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    /// A managed step.
    Step(StepIdentifier),
    /// An external leaf.
    External(ExternalRef),
}

impl NodeKey {
    /// Returns the step identifier for managed nodes.
    #[must_use]
    pub const fn as_step(&self) -> Option<&StepIdentifier> {
        match self {
            Self::Step(id) => Some(id),
            Self::External(_) => None,
        }
    }

    /// Returns true for managed steps.
    #[must_use]
    pub const fn is_step(&self) -> bool {
        matches!(self, Self::Step(_))
    }
}

impl From<StepIdentifier> for NodeKey {
    fn from(value: StepIdentifier) -> Self {
        Self::Step(value)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step(id) => fmt::Display::fmt(id, f),
            Self::External(ext) => fmt::Display::fmt(ext, f),
        }
    }
}

impl PartialOrd for NodeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Step(a), Self::Step(b)) => a.cmp(b),
            _ => self.to_string().cmp(&other.to_string()),
        }
    }
}
