use super::{ExecutionPlan, PlanReason, PlanRequest, PlannedStep};
use crate::checksum::ChecksumMap;
use crate::core::{NodeKey, StepIdentifier};
use crate::graph::StepGraph;
use crate::staleness::StalenessReport;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Builds execution plans from a request and a staleness classification.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlanner {
    request: PlanRequest,
}

impl ExecutionPlanner {
    /// Creates a planner for `request`.
    #[must_use]
    pub const fn new(request: PlanRequest) -> Self {
        Self { request }
    }

    /// Returns the request.
    #[must_use]
    pub const fn request(&self) -> &PlanRequest {
        &self.request
    }

    /// The steps directly selected by the request's patterns.
    #[must_use]
    pub fn focal(&self, graph: &StepGraph) -> BTreeSet<StepIdentifier> {
        let focal = self.request.select(graph.steps());
        if focal.is_empty() {
            info!(patterns = ?self.request.patterns, "No steps match");
        }
        focal
    }

    /// The steps forced to rebuild: the focal set under `--force`, nothing otherwise.
    #[must_use]
    pub fn forced(&self, focal: &BTreeSet<StepIdentifier>) -> BTreeSet<StepIdentifier> {
        if self.request.force {
            focal.clone()
        } else {
            BTreeSet::new()
        }
    }

    /// Closes the focal set over the requested expansions.
    ///
    /// Downstream expansion is applied first, then upstream expansion covers
    /// the dependencies of everything in scope.
    #[must_use]
    pub fn scope(&self, graph: &StepGraph, focal: &BTreeSet<StepIdentifier>) -> BTreeSet<StepIdentifier> {
        let mut scope = focal.clone();
        if self.request.only {
            return scope;
        }
        if self.request.downstream {
            scope.extend(graph.descendants(focal));
        }
        if self.request.upstream {
            let ancestors = graph.ancestors(&scope);
            scope.extend(ancestors);
        }
        scope
    }

    /// Intersects the scope with the dirty and forced steps and orders the result.
    ///
    /// Only the steps named under `--force` bypass the freshness check; their
    /// fresh dependents stay out of the plan.
    #[must_use]
    pub fn build(
        &self,
        graph: &StepGraph,
        scope: &BTreeSet<StepIdentifier>,
        staleness: &StalenessReport,
        checksums: &ChecksumMap,
    ) -> ExecutionPlan {
        let mut reasons: BTreeMap<StepIdentifier, PlanReason> = BTreeMap::new();

        for step in scope {
            let reason = if staleness.is_forced(step) {
                Some(PlanReason::Forced)
            } else {
                staleness.state(step).and_then(PlanReason::from_state)
            };
            if let Some(reason) = reason {
                reasons.insert(step.clone(), reason);
            }
        }

        let gating = gating_dependencies(graph, &reasons);
        let order = linearize(&gating);

        let steps: Vec<PlannedStep> = order
            .into_iter()
            .filter_map(|id| {
                let reason = *reasons.get(&id)?;
                let dependencies = gating.get(&id).cloned().unwrap_or_default();
                let checksum = checksums.get(&NodeKey::Step(id.clone())).copied()?;
                Some(PlannedStep {
                    id,
                    reason,
                    dependencies,
                    checksum,
                })
            })
            .collect();

        debug!(scope = scope.len(), planned = steps.len(), "Built execution plan");
        ExecutionPlan::new(steps)
    }
}

/// For every planned step, the nearest planned ancestors along each
/// dependency path. Unplanned steps in between are looked through, so a
/// planned step never starts before a planned ancestor even when the step
/// connecting them is fresh or out of scope.
fn gating_dependencies(
    graph: &StepGraph,
    planned: &BTreeMap<StepIdentifier, PlanReason>,
) -> BTreeMap<StepIdentifier, BTreeSet<StepIdentifier>> {
    // Nearest planned ancestors of every node, filled in topological order.
    let mut nearest: BTreeMap<&NodeKey, BTreeSet<StepIdentifier>> = BTreeMap::new();
    let mut gating = BTreeMap::new();

    for key in graph.topological_order() {
        let Some(node) = graph.node(key) else {
            continue;
        };

        let mut upstream = BTreeSet::new();
        for dep in node.dependencies() {
            match dep.as_step() {
                Some(dep_id) if planned.contains_key(dep_id) => {
                    upstream.insert(dep_id.clone());
                }
                _ => {
                    if let Some(inherited) = nearest.get(dep) {
                        upstream.extend(inherited.iter().cloned());
                    }
                }
            }
        }

        if let Some(id) = key.as_step().filter(|id| planned.contains_key(*id)) {
            gating.insert(id.clone(), upstream.clone());
        }
        if !upstream.is_empty() {
            nearest.insert(key, upstream);
        }
    }

    gating
}

/// Kahn's algorithm over the gating edges; ready steps are taken in
/// lexicographic order.
fn linearize(gating: &BTreeMap<StepIdentifier, BTreeSet<StepIdentifier>>) -> Vec<StepIdentifier> {
    let mut in_degree: BTreeMap<&StepIdentifier, usize> =
        gating.iter().map(|(id, deps)| (id, deps.len())).collect();
    let mut dependents: BTreeMap<&StepIdentifier, Vec<&StepIdentifier>> = BTreeMap::new();
    for (id, deps) in gating {
        for dep in deps {
            dependents.entry(dep).or_default().push(id);
        }
    }

    let mut ready: BTreeSet<&StepIdentifier> = in_degree
        .iter()
        .filter(|(_, &count)| count == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(gating.len());

    while let Some(id) = ready.pop_first() {
        order.push(id.clone());
        for child in dependents.get(id).into_iter().flatten() {
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
