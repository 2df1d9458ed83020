//! Turns a [`DagSpec`] into a validated [`StepGraph`].
//!
//! Every dependency reference resolves, in order, to:
//!
//! 1. a step defined in the DAG spec,
//! 2. a step from the known universe (snapshots discovered on disk),
//! 3. an external leaf (a file path, `file://`, or a remote URL).
//!
//! Anything else fails the whole load. No partially usable graph is returned.

use super::dag::{StepGraph, StepNode};
use super::spec::{DagSpec, StepRecord};
use crate::checksum::ExternalPolicy;
use crate::core::{Channel, ExternalRef, NodeKey, StepIdentifier};
use crate::errors::{CycleDetectedError, DependencyResolutionError, EtlError, GraphValidationError};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// The universe of steps that exist without being defined in the DAG spec.
#[derive(Debug, Clone, Default)]
pub struct KnownSteps {
    steps: BTreeSet<StepIdentifier>,
}

impl KnownSteps {
    /// Discovers snapshot steps laid out as `snapshot/<namespace>/<version>/<file>`
    /// under `steps_dir`.
    ///
    /// The short name is the file name up to its first `.`, so `gho.csv` and
    /// `gho.csv.dvc` both contribute `snapshot://<ns>/<version>/gho`. A missing
    /// directory yields an empty universe.
    #[must_use]
    pub fn discover(steps_dir: &Path) -> Self {
        let root = steps_dir.join(Channel::Snapshot.as_str());
        let mut steps = BTreeSet::new();

        for entry in WalkDir::new(&root)
            .min_depth(3)
            .max_depth(3)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            let Ok(relative) = entry.path().strip_prefix(&root) else {
                continue;
            };
            let parts: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            let [namespace, version, file_name] = parts.as_slice() else {
                continue;
            };
            let short_name = file_name.split('.').next().unwrap_or_default();

            match StepIdentifier::new(Channel::Snapshot, namespace.as_str(), version.as_str(), short_name) {
                Ok(id) => {
                    steps.insert(id);
                }
                Err(e) => debug!(path = %entry.path().display(), error = %e, "Ignoring snapshot file"),
            }
        }

        debug!(root = %root.display(), count = steps.len(), "Discovered known snapshot steps");
        Self { steps }
    }

    /// Adds a step to the universe.
    pub fn insert(&mut self, step: StepIdentifier) {
        self.steps.insert(step);
    }

    /// Returns true if the step is part of the universe.
    #[must_use]
    pub fn contains(&self, step: &StepIdentifier) -> bool {
        self.steps.contains(step)
    }

    /// Returns the number of known steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the universe is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl FromIterator<StepIdentifier> for KnownSteps {
    fn from_iter<T: IntoIterator<Item = StepIdentifier>>(iter: T) -> Self {
        Self {
            steps: iter.into_iter().collect(),
        }
    }
}

/// Builds step graphs from declarative specs.
#[derive(Debug, Clone, Default)]
pub struct GraphLoader {
    known: KnownSteps,
    external_policy: ExternalPolicy,
}

impl GraphLoader {
    /// Creates a loader with an empty universe and the default external policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the known-step universe.
    #[must_use]
    pub fn with_known_steps(mut self, known: KnownSteps) -> Self {
        self.known = known;
        self
    }

    /// Sets the policy for remote externals.
    #[must_use]
    pub fn with_external_policy(mut self, policy: ExternalPolicy) -> Self {
        self.external_policy = policy;
        self
    }

    /// Resolves every record of the collection and builds the graph.
    pub fn load(&self, spec: &DagSpec) -> Result<StepGraph, EtlError> {
        let defined = Self::collect_defined(&spec.records)?;
        let mut nodes: BTreeMap<NodeKey, StepNode> = BTreeMap::new();

        for (id, record) in &defined {
            let mut dependencies = BTreeSet::new();

            for reference in &record.dependencies {
                let key = self.resolve(spec, &defined, id, reference, &mut nodes)?;

                if key.as_step() == Some(id) {
                    return Err(CycleDetectedError::new(vec![id.to_string(), id.to_string()]).into());
                }
                if !dependencies.insert(key) {
                    return Err(GraphValidationError::duplicate_dependency(id.as_str(), reference.as_str()).into());
                }
            }

            nodes.insert(
                NodeKey::Step(id.clone()),
                StepNode::managed(id.clone(), dependencies),
            );
        }

        detect_cycles(&nodes)?;

        let graph = StepGraph::from_nodes(nodes);
        debug!(
            nodes = graph.len(),
            steps = graph.steps().count(),
            "Step graph loaded"
        );
        Ok(graph)
    }

    fn collect_defined(
        records: &[StepRecord],
    ) -> Result<BTreeMap<StepIdentifier, &StepRecord>, EtlError> {
        let mut defined = BTreeMap::new();
        for record in records {
            let id = StepIdentifier::parse(&record.step)?;
            if let Some(previous) = defined.insert(id, record) {
                return Err(GraphValidationError::duplicate_step(
                    record.step.as_str(),
                    format!("{} and {}", previous.origin.display(), record.origin.display()),
                )
                .into());
            }
        }
        Ok(defined)
    }

    fn resolve(
        &self,
        spec: &DagSpec,
        defined: &BTreeMap<StepIdentifier, &StepRecord>,
        step: &StepIdentifier,
        reference: &str,
        nodes: &mut BTreeMap<NodeKey, StepNode>,
    ) -> Result<NodeKey, EtlError> {
        let unresolved = |reason: &str| DependencyResolutionError::new(step.as_str(), reference, reason);

        let is_step_reference = reference
            .split_once("://")
            .is_some_and(|(scheme, _)| scheme.parse::<Channel>().is_ok());

        if is_step_reference {
            let dep = StepIdentifier::parse(reference)?;
            if defined.contains_key(&dep) {
                return Ok(NodeKey::Step(dep));
            }
            if self.known.contains(&dep) {
                let key = NodeKey::Step(dep.clone());
                nodes
                    .entry(key.clone())
                    .or_insert_with(|| StepNode::managed(dep, BTreeSet::new()));
                return Ok(key);
            }
            return Err(unresolved("not defined in the DAG and not a known step").into());
        }

        let external = ExternalRef::parse(reference)
            .ok_or_else(|| unresolved("unrecognized reference scheme"))?
            .resolved_against(&spec.base_dir);

        let declared_hash = match &external {
            ExternalRef::File(path) => {
                if !path.exists() {
                    return Err(unresolved(&format!("file '{}' does not exist", path.display())).into());
                }
                None
            }
            ExternalRef::Remote(url) => {
                let declared = spec.externals.get(url).and_then(|d| d.sha256.clone());
                if declared.is_none() {
                    if self.external_policy == ExternalPolicy::RequireDeclaredHash {
                        return Err(unresolved("remote external has no declared sha256").into());
                    }
                    warn!(step = %step, external = %url, "Remote external has no declared hash");
                }
                declared
            }
        };

        let key = NodeKey::External(external.clone());
        nodes
            .entry(key.clone())
            .or_insert_with(|| StepNode::external(external, declared_hash));
        Ok(key)
    }
}

/// Depth-first search with a recursion-stack set. The traversal is iterative
/// so deep chains cannot exhaust the thread stack.
fn detect_cycles(nodes: &BTreeMap<NodeKey, StepNode>) -> Result<(), CycleDetectedError> {
    let no_deps = BTreeSet::new();
    let deps_of = |key: &NodeKey| nodes.get(key).map_or(no_deps.iter(), |n| n.dependencies().iter());

    let mut visited: BTreeSet<&NodeKey> = BTreeSet::new();
    let mut on_stack: BTreeSet<&NodeKey> = BTreeSet::new();

    for root in nodes.keys() {
        if visited.contains(root) {
            continue;
        }
        visited.insert(root);
        on_stack.insert(root);
        let mut stack = vec![(root, deps_of(root))];

        while let Some((key, deps)) = stack.last_mut() {
            let key = *key;
            match deps.next() {
                Some(dep) if on_stack.contains(dep) => {
                    let start = stack.iter().position(|(k, _)| *k == dep).unwrap_or(0);
                    let found: Vec<&NodeKey> = stack[start..].iter().map(|(k, _)| *k).collect();
                    return Err(CycleDetectedError::new(shortest_cycle(nodes, &found)));
                }
                Some(dep) if visited.insert(dep) => {
                    on_stack.insert(dep);
                    stack.push((dep, deps_of(dep)));
                }
                Some(_) => {}
                None => {
                    on_stack.remove(key);
                    stack.pop();
                }
            }
        }
    }
    Ok(())
}

/// Shrinks a cycle found by the DFS to the shortest cycle through any of its members.
fn shortest_cycle(nodes: &BTreeMap<NodeKey, StepNode>, found: &[&NodeKey]) -> Vec<String> {
    let mut best: Option<Vec<&NodeKey>> = None;

    for start in found {
        if let Some(cycle) = shortest_cycle_through(nodes, *start) {
            if best.as_ref().map_or(true, |b| cycle.len() < b.len()) {
                best = Some(cycle);
            }
        }
    }

    let mut cycle = best.unwrap_or_else(|| {
        let mut path = found.to_vec();
        path.extend(found.first());
        path
    });
    cycle.dedup();
    if cycle.len() == 1 {
        cycle.push(cycle[0]);
    }
    cycle.iter().map(ToString::to_string).collect()
}

/// Breadth-first search from `start` back to itself. The returned path starts
/// and ends with `start`.
fn shortest_cycle_through<'a>(
    nodes: &'a BTreeMap<NodeKey, StepNode>,
    start: &'a NodeKey,
) -> Option<Vec<&'a NodeKey>> {
    let mut parent: HashMap<&NodeKey, &NodeKey> = HashMap::new();
    let mut queue = VecDeque::from([start]);

    while let Some(current) = queue.pop_front() {
        let Some(node) = nodes.get(current) else {
            continue;
        };
        for dep in node.dependencies() {
            if dep == start {
                let mut path = vec![start, current];
                let mut cursor = current;
                while let Some(&up) = parent.get(cursor) {
                    path.push(up);
                    cursor = up;
                }
                path.reverse();
                return Some(path);
            }
            if !parent.contains_key(dep) {
                parent.insert(dep, current);
                queue.push_back(dep);
            }
        }
    }
    None
}
