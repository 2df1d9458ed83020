//! Bottom-up full-hash computation.

use super::{ArtifactSource, Checksum};
use crate::core::{ExternalRef, NodeKey, NodeKind};
use crate::errors::EtlError;
use crate::graph::{StepGraph, StepNode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Full hash of every node in a graph.
pub type ChecksumMap = BTreeMap<NodeKey, Checksum>;

/// How remote externals without a pinned hash are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalPolicy {
    /// Use a stable placeholder and log a warning. Changes to the remote
    /// resource will not be detected.
    #[default]
    Placeholder,
    /// Fail loading if a remote external has no declared hash.
    RequireDeclaredHash,
}

/// Computes `full_hash(node) = H(local_hash(node) ++ sorted(full_hash(dep)))`
/// for every node in one pass over the topological order.
#[derive(Debug, Clone)]
pub struct ChecksumEngine {
    source: Arc<dyn ArtifactSource>,
}

impl ChecksumEngine {
    /// Creates an engine reading artifacts from `source`.
    #[must_use]
    pub fn new(source: Arc<dyn ArtifactSource>) -> Self {
        Self { source }
    }

    /// Computes the full hash of every node.
    ///
    /// Each node is hashed exactly once; dependencies are always visited
    /// before their dependents, so every lookup hits the memo.
    pub fn compute(&self, graph: &StepGraph) -> Result<ChecksumMap, EtlError> {
        let started = Instant::now();
        let mut memo = ChecksumMap::new();

        for key in graph.topological_order() {
            let Some(node) = graph.node(key) else {
                continue;
            };
            let local = self.local_hash(node)?;
            let full = match node.kind() {
                NodeKind::External => local,
                NodeKind::Managed => Checksum::fold(
                    &local,
                    node.dependencies().iter().filter_map(|dep| memo.get(dep).copied()),
                ),
            };
            trace!(node = %key, checksum = %full, "Hashed node");
            memo.insert(key.clone(), full);
        }

        debug!(
            nodes = memo.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Computed checksums"
        );
        Ok(memo)
    }

    /// Hash of the node's own content, excluding dependencies.
    pub fn local_hash(&self, node: &StepNode) -> Result<Checksum, EtlError> {
        match node.key() {
            NodeKey::Step(id) => Ok(self.source.step_digest(id)?),
            NodeKey::External(ExternalRef::File(path)) => Ok(self.source.file_digest(path)?),
            NodeKey::External(ExternalRef::Remote(url)) => Ok(match node.declared_hash() {
                Some(declared) => declared
                    .parse()
                    .unwrap_or_else(|_| Checksum::of_bytes(declared.as_bytes())),
                None => {
                    warn!(
                        external = %url,
                        "No content hash declared for remote external; changes to it will not trigger rebuilds"
                    );
                    Checksum::placeholder(url)
                }
            }),
        }
    }
}
