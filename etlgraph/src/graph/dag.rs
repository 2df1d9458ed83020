//! The validated step graph.
//!
//! A [`StepGraph`] is only produced by the [`GraphLoader`](super::GraphLoader)
//! and is acyclic by construction. Edges point from a node to its
//! dependencies; the reverse index and the topological order are derived once
//! at construction and never maintained separately.

use crate::core::{ExternalRef, NodeKey, NodeKind, StepIdentifier, StepState};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// A node of the step graph.
#[derive(Debug, Clone)]
pub struct StepNode {
    key: NodeKey,
    dependencies: BTreeSet<NodeKey>,
    kind: NodeKind,
    declared_hash: Option<String>,
    state: StepState,
}

impl StepNode {
    pub(crate) fn managed(id: StepIdentifier, dependencies: BTreeSet<NodeKey>) -> Self {
        Self {
            key: NodeKey::Step(id),
            dependencies,
            kind: NodeKind::Managed,
            declared_hash: None,
            state: StepState::Unvisited,
        }
    }

    pub(crate) fn external(reference: ExternalRef, declared_hash: Option<String>) -> Self {
        Self {
            key: NodeKey::External(reference),
            dependencies: BTreeSet::new(),
            kind: NodeKind::External,
            declared_hash,
            state: StepState::Fresh,
        }
    }

    /// Returns the node key.
    #[must_use]
    pub const fn key(&self) -> &NodeKey {
        &self.key
    }

    /// Returns the direct dependencies.
    #[must_use]
    pub const fn dependencies(&self) -> &BTreeSet<NodeKey> {
        &self.dependencies
    }

    /// Returns whether the node is managed or external.
    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Content hash pinned in the DAG file, for remote externals.
    #[must_use]
    pub fn declared_hash(&self) -> Option<&str> {
        self.declared_hash.as_deref()
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> StepState {
        self.state
    }
}

/// A directed acyclic graph of steps and external leaves.
#[derive(Debug, Clone)]
pub struct StepGraph {
    nodes: BTreeMap<NodeKey, StepNode>,
    dependents: BTreeMap<NodeKey, BTreeSet<NodeKey>>,
    topological_order: Vec<NodeKey>,
}

impl StepGraph {
    /// Builds the graph from validated, acyclic nodes.
    pub(crate) fn from_nodes(nodes: BTreeMap<NodeKey, StepNode>) -> Self {
        let mut dependents: BTreeMap<NodeKey, BTreeSet<NodeKey>> =
            nodes.keys().map(|k| (k.clone(), BTreeSet::new())).collect();
        for node in nodes.values() {
            for dep in &node.dependencies {
                if let Some(set) = dependents.get_mut(dep) {
                    set.insert(node.key.clone());
                }
            }
        }

        let topological_order = topological_sort(&nodes, &dependents);

        Self {
            nodes,
            dependents,
            topological_order,
        }
    }

    /// Returns the number of nodes, externals included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Looks up a node.
    #[must_use]
    pub fn node(&self, key: &NodeKey) -> Option<&StepNode> {
        self.nodes.get(key)
    }

    /// Looks up a managed step.
    #[must_use]
    pub fn step(&self, id: &StepIdentifier) -> Option<&StepNode> {
        self.nodes.get(&NodeKey::Step(id.clone()))
    }

    /// Iterates over all nodes in key order.
    pub fn nodes(&self) -> impl Iterator<Item = &StepNode> {
        self.nodes.values()
    }

    /// Iterates over managed step identifiers in lexicographic order.
    pub fn steps(&self) -> impl Iterator<Item = &StepIdentifier> {
        self.nodes.keys().filter_map(NodeKey::as_step)
    }

    /// Returns the nodes that directly depend on `key`.
    #[must_use]
    pub fn dependents(&self, key: &NodeKey) -> Option<&BTreeSet<NodeKey>> {
        self.dependents.get(key)
    }

    /// All nodes, dependencies before dependents; ties broken by key order.
    #[must_use]
    pub fn topological_order(&self) -> &[NodeKey] {
        &self.topological_order
    }

    /// Every managed step reachable by following dependency edges from `roots`,
    /// excluding the roots themselves.
    #[must_use]
    pub fn ancestors<'a>(
        &self,
        roots: impl IntoIterator<Item = &'a StepIdentifier>,
    ) -> BTreeSet<StepIdentifier> {
        self.walk(roots, |key| self.nodes.get(key).map(|n| &n.dependencies))
    }

    /// Every managed step that transitively depends on any of `roots`,
    /// excluding the roots themselves.
    #[must_use]
    pub fn descendants<'a>(
        &self,
        roots: impl IntoIterator<Item = &'a StepIdentifier>,
    ) -> BTreeSet<StepIdentifier> {
        self.walk(roots, |key| self.dependents.get(key))
    }

    fn walk<'a, 's, F>(
        &'s self,
        roots: impl IntoIterator<Item = &'a StepIdentifier>,
        next: F,
    ) -> BTreeSet<StepIdentifier>
    where
        F: Fn(&NodeKey) -> Option<&'s BTreeSet<NodeKey>>,
    {
        let roots: BTreeSet<NodeKey> = roots.into_iter().cloned().map(NodeKey::Step).collect();
        let mut seen: BTreeSet<NodeKey> = BTreeSet::new();
        let mut queue: VecDeque<NodeKey> = roots.iter().cloned().collect();

        while let Some(key) = queue.pop_front() {
            for neighbour in next(&key).into_iter().flatten() {
                if seen.insert(neighbour.clone()) {
                    queue.push_back(neighbour.clone());
                }
            }
        }

        seen.into_iter()
            .filter(|k| !roots.contains(k))
            .filter_map(|k| match k {
                NodeKey::Step(id) => Some(id),
                NodeKey::External(_) => None,
            })
            .collect()
    }

    /// Sets the state of a managed step. Unknown steps are ignored.
    pub fn set_state(&mut self, id: &StepIdentifier, state: StepState) {
        if let Some(node) = self.nodes.get_mut(&NodeKey::Step(id.clone())) {
            node.state = state;
        }
    }

    /// Resets every managed step to `Unvisited`.
    pub fn reset_states(&mut self) {
        for node in self.nodes.values_mut() {
            if node.kind == NodeKind::Managed {
                node.state = StepState::Unvisited;
            }
        }
    }
}

/// Kahn's algorithm with an ordered ready set, so the order is reproducible.
fn topological_sort(
    nodes: &BTreeMap<NodeKey, StepNode>,
    dependents: &BTreeMap<NodeKey, BTreeSet<NodeKey>>,
) -> Vec<NodeKey> {
    let mut in_degree: BTreeMap<&NodeKey, usize> = nodes
        .iter()
        .map(|(key, node)| (key, node.dependencies.len()))
        .collect();
    let mut ready: BTreeSet<&NodeKey> = in_degree
        .iter()
        .filter(|(_, &count)| count == 0)
        .map(|(key, _)| *key)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(key) = ready.pop_first() {
        order.push(key.clone());
        for child in dependents.get(key).into_iter().flatten() {
            if let Some(count) = in_degree.get_mut(child) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(child);
                }
            }
        }
    }

    order
}
