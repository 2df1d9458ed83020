use crate::core::{StepIdentifier, StepPattern};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What the operator asked to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRequest {
    /// Step selectors; a step is selected if any pattern matches. Empty selects every step.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Selectors removed from the selection.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Match the canonical string exactly instead of searching.
    #[serde(default)]
    pub exact_match: bool,
    /// Restrict the scope to the selected steps, with no dependency expansion.
    #[serde(default)]
    pub only: bool,
    /// Include the dependencies of selected steps.
    #[serde(default = "default_true")]
    pub upstream: bool,
    /// Include the dependents of selected steps.
    #[serde(default)]
    pub downstream: bool,
    /// Rebuild the selected steps even if fresh.
    #[serde(default)]
    pub force: bool,
    /// Build the plan without executing it.
    #[serde(default)]
    pub dry_run: bool,
}

const fn default_true() -> bool {
    true
}

impl Default for PlanRequest {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            exclude: Vec::new(),
            exact_match: false,
            only: false,
            upstream: true,
            downstream: false,
            force: false,
            dry_run: false,
        }
    }
}

impl PlanRequest {
    /// Creates a request selecting every step.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a selection pattern.
    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    /// Adds an exclusion pattern.
    #[must_use]
    pub fn with_exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude.push(pattern.into());
        self
    }

    /// Sets exact matching.
    #[must_use]
    pub const fn with_exact_match(mut self, exact: bool) -> Self {
        self.exact_match = exact;
        self
    }

    /// Sets `--only`.
    #[must_use]
    pub const fn with_only(mut self, only: bool) -> Self {
        self.only = only;
        self
    }

    /// Sets upstream expansion.
    #[must_use]
    pub const fn with_upstream(mut self, upstream: bool) -> Self {
        self.upstream = upstream;
        self
    }

    /// Sets downstream expansion.
    #[must_use]
    pub const fn with_downstream(mut self, downstream: bool) -> Self {
        self.downstream = downstream;
        self
    }

    /// Sets `--force`.
    #[must_use]
    pub const fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Sets `--dry-run`.
    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn compile(&self, patterns: &[String]) -> Vec<StepPattern> {
        patterns
            .iter()
            .map(|p| {
                if self.exact_match {
                    StepPattern::exact(p)
                } else {
                    StepPattern::new(p)
                }
            })
            .collect()
    }

    /// Applies the selection and exclusion patterns to `steps`.
    pub fn select<'a>(
        &self,
        steps: impl IntoIterator<Item = &'a StepIdentifier>,
    ) -> BTreeSet<StepIdentifier> {
        let include = self.compile(&self.patterns);
        let exclude = self.compile(&self.exclude);

        steps
            .into_iter()
            .filter(|s| include.is_empty() || include.iter().any(|p| p.matches(s)))
            .filter(|s| !exclude.iter().any(|p| p.matches(s)))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(list: &[&str]) -> Vec<StepIdentifier> {
        list.iter().map(|s| StepIdentifier::parse(s).unwrap()).collect()
    }

    #[test]
    fn test_defaults() {
        let request = PlanRequest::new();
        assert!(request.upstream);
        assert!(!request.downstream && !request.only && !request.force);
    }

    #[test]
    fn test_select_patterns_and_exclude() {
        let steps = ids(&[
            "meadow://who/2024/gho",
            "garden://who/2024/gho",
            "garden://un/2024/population",
        ]);

        let all = PlanRequest::new().select(&steps);
        assert_eq!(all.len(), 3);

        let gho = PlanRequest::new().with_pattern("GHO").select(&steps);
        assert_eq!(gho.len(), 2);

        let garden_gho = PlanRequest::new()
            .with_pattern("gho")
            .with_pattern("population")
            .with_exclude("meadow")
            .select(&steps);
        assert_eq!(
            garden_gho.into_iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            vec!["garden://un/2024/population", "garden://who/2024/gho"]
        );
    }

    #[test]
    fn test_exact_match() {
        let steps = ids(&["garden://who/2024/gho", "garden://who/2024/gho_extra"]);

        let exact = PlanRequest::new()
            .with_pattern("garden://who/2024/gho")
            .with_exact_match(true)
            .select(&steps);

        assert_eq!(exact.len(), 1);
    }

    #[test]
    fn test_no_match_is_empty() {
        let steps = ids(&["garden://who/2024/gho"]);
        assert!(PlanRequest::new().with_pattern("nothing").select(&steps).is_empty());
    }

    #[test]
    fn test_deserialize_defaults_upstream() {
        let request: PlanRequest = serde_json::from_str(r#"{"patterns": ["x"]}"#).unwrap();
        assert!(request.upstream);
    }
}
