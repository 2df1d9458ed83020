//! Classifies steps as fresh, stale or never built.
//!
//! A step's checksum already folds in the checksums of everything upstream,
//! so a two-way comparison with the stored checksum is enough. No ancestor
//! walk is needed here.

use crate::checksum::{Checksum, ChecksumMap};
use crate::core::{NodeKey, StepIdentifier, StepState};
use crate::graph::StepGraph;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

/// The classification of one planning cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StalenessReport {
    states: BTreeMap<StepIdentifier, StepState>,
    forced: BTreeSet<StepIdentifier>,
}

impl StalenessReport {
    /// Returns the state of a classified step.
    #[must_use]
    pub fn state(&self, step: &StepIdentifier) -> Option<StepState> {
        self.states.get(step).copied()
    }

    /// Returns true if the step was forced.
    #[must_use]
    pub fn is_forced(&self, step: &StepIdentifier) -> bool {
        self.forced.contains(step)
    }

    /// Iterates over every classified step.
    pub fn iter(&self) -> impl Iterator<Item = (&StepIdentifier, StepState)> {
        self.states.iter().map(|(id, state)| (id, *state))
    }

    /// Iterates over steps that need to run.
    pub fn dirty(&self) -> impl Iterator<Item = &StepIdentifier> {
        self.states
            .iter()
            .filter(|(_, state)| state.is_dirty())
            .map(|(id, _)| id)
    }

    /// Returns the number of steps in `state`.
    #[must_use]
    pub fn count(&self, state: StepState) -> usize {
        self.states.values().filter(|s| **s == state).count()
    }
}

/// Compares fresh checksums against stored ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct StalenessResolver;

impl StalenessResolver {
    /// Classifies a single step.
    #[must_use]
    pub fn classify(fresh: Checksum, stored: Option<Checksum>) -> StepState {
        match stored {
            None => StepState::NeverBuilt,
            Some(stored) if stored == fresh => StepState::Fresh,
            Some(_) => StepState::Stale,
        }
    }

    /// Classifies `steps` and writes the states into the graph.
    ///
    /// Forced steps are `Stale` regardless of their checksum. Nothing is
    /// written to the checksum store.
    pub fn resolve<'a>(
        graph: &mut StepGraph,
        steps: impl IntoIterator<Item = &'a StepIdentifier>,
        checksums: &ChecksumMap,
        stored: &BTreeMap<StepIdentifier, Checksum>,
        forced: &BTreeSet<StepIdentifier>,
    ) -> StalenessReport {
        let mut report = StalenessReport::default();

        for step in steps {
            let fresh = checksums.get(&NodeKey::Step(step.clone())).copied();
            let state = if forced.contains(step) {
                StepState::Stale
            } else {
                match fresh {
                    Some(fresh) => Self::classify(fresh, stored.get(step).copied()),
                    None => StepState::NeverBuilt,
                }
            };

            trace!(step = %step, state = %state, "Classified step");
            graph.set_state(step, state);
            report.states.insert(step.clone(), state);
            if forced.contains(step) {
                report.forced.insert(step.clone());
            }
        }

        debug!(
            fresh = report.count(StepState::Fresh),
            stale = report.count(StepState::Stale),
            never_built = report.count(StepState::NeverBuilt),
            forced = report.forced.len(),
            "Resolved staleness"
        );
        report
    }
}
