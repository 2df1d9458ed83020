//! Content-derived step fingerprints.
//!
//! A step's checksum folds the hash of its own artifacts with the checksums
//! of its direct dependencies, so it changes whenever any transitively
//! reachable artifact changes.

mod artifacts;
mod digest;
mod engine;

pub use artifacts::{ArtifactSource, FsArtifactSource, MemoryArtifactSource};
pub use digest::{Checksum, ParseChecksumError};
pub use engine::{ChecksumEngine, ChecksumMap, ExternalPolicy};
