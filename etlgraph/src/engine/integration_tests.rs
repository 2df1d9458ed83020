//! End-to-end scenarios over real files: load, checksum, classify, plan and
//! execute against a temporary project.

use super::*;
use crate::checksum::Checksum;
use crate::core::NodeKey;
use crate::errors::EtlError;
use crate::events::{types, CollectingEventSink, NoOpEventSink};
use crate::executor::{SkipReason, StepContext, StepResultKind, StepRunner, FnRunner};
use crate::plan::PlanReason;
use crate::store::InMemoryChecksumStore;
use crate::testing::{assert_failed, assert_skipped, assert_succeeded, id, Project, RecordingRunner};
use crate::core::StepOutput;
use pretty_assertions::assert_eq;

const SNAP: &str = "snapshot://t/2024/source";
const CLEAN: &str = "meadow://t/2024/clean";
const CURATED: &str = "garden://t/2024/curated";

fn scenario_project() -> Project {
    let project = Project::new();
    project.write_dag(&format!(
        r#"
        [steps]
        "{SNAP}" = []
        "{CLEAN}" = ["{SNAP}"]
        "{CURATED}" = ["{CLEAN}"]
        "#
    ));
    project.write_step(SNAP, "fetch()");
    project.write_step(CLEAN, "clean()");
    project.write_step(CURATED, "curate()");
    project
}

fn engine(project: &Project, runner: Arc<dyn StepRunner>) -> Engine {
    Engine::new(project.config())
        .unwrap()
        .with_runners(RunnerRegistry::new().with_fallback(runner))
        .with_events(Arc::new(NoOpEventSink))
}

fn planned_ids(outcome: &PlanOutcome) -> Vec<String> {
    outcome.plan.ids().map(ToString::to_string).collect()
}

fn full_hash(checksums: &ChecksumMap, step: &str) -> Checksum {
    checksums[&NodeKey::Step(id(step))]
}

#[tokio::test]
async fn test_checksums_are_deterministic() {
    let project = scenario_project();
    let engine = engine(&project, Arc::new(RecordingRunner::new()));

    let first = engine.plan(&PlanRequest::new()).await.unwrap();
    let second = engine.plan(&PlanRequest::new()).await.unwrap();

    assert_eq!(first.checksums, second.checksums);
    assert_eq!(planned_ids(&first), planned_ids(&second));
}

#[tokio::test]
async fn test_upstream_change_propagates_to_every_dependent() {
    let project = scenario_project();
    let engine = engine(&project, Arc::new(RecordingRunner::new()));
    let before = engine.plan(&PlanRequest::new()).await.unwrap().checksums;

    project.write_step(SNAP, "fetch(); fetch_more()");
    let after = engine.plan(&PlanRequest::new()).await.unwrap().checksums;

    for step in [SNAP, CLEAN, CURATED] {
        assert_ne!(full_hash(&before, step), full_hash(&after, step), "{step}");
    }
}

#[tokio::test]
async fn test_second_plan_is_empty_after_full_run() {
    let project = scenario_project();
    let runner = Arc::new(RecordingRunner::new());
    let engine = engine(&project, runner.clone());

    let outcome = engine.run(&PlanRequest::new()).await.unwrap();
    assert!(outcome.is_success());
    assert!(outcome.first_error().is_none());
    assert_eq!(runner.started().len(), 3);

    let again = engine.plan(&PlanRequest::new()).await.unwrap();
    assert!(again.plan.is_empty());
    assert_eq!(again.staleness.count(crate::core::StepState::Fresh), 3);
}

#[tokio::test]
async fn test_plan_respects_every_edge() {
    let project = Project::new();
    project.write_dag(
        r#"
        [steps]
        "snapshot://w/1/a" = []
        "snapshot://w/1/b" = []
        "meadow://w/1/a" = ["snapshot://w/1/a"]
        "meadow://w/1/b" = ["snapshot://w/1/b", "meadow://w/1/a"]
        "garden://w/1/joined" = ["meadow://w/1/b", "meadow://w/1/a"]
        "grapher://w/1/joined" = ["garden://w/1/joined"]
        "export://w/1/joined" = ["grapher://w/1/joined", "snapshot://w/1/a"]
        "#,
    );
    let engine = engine(&project, Arc::new(RecordingRunner::new()));

    let outcome = engine.plan(&PlanRequest::new()).await.unwrap();
    let order: Vec<&StepIdentifier> = outcome.plan.ids().collect();
    assert_eq!(order.len(), 7);

    for (i, step) in order.iter().enumerate() {
        for dep in outcome.graph.step(step).unwrap().dependencies() {
            if let Some(dep) = dep.as_step() {
                let pos = order.iter().position(|s| *s == dep).unwrap();
                assert!(pos < i, "{dep} must precede {step}");
            }
        }
    }
}

#[tokio::test]
async fn test_cycle_is_rejected_before_planning() {
    let project = Project::new();
    project.write_dag(
        r#"
        [steps]
        "garden://c/1/x" = ["garden://c/1/y"]
        "garden://c/1/y" = ["garden://c/1/x"]
        "#,
    );
    let sink = Arc::new(CollectingEventSink::new());
    let engine = engine(&project, Arc::new(RecordingRunner::new())).with_events(sink.clone());

    let err = engine.run(&PlanRequest::new()).await.unwrap_err();

    match err {
        EtlError::CyclicDependency(e) => {
            assert!(e.cycle_path.contains(&"garden://c/1/x".to_string()));
            assert!(e.cycle_path.contains(&"garden://c/1/y".to_string()));
        }
        other => panic!("expected a cycle error, got {other}"),
    }
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_failure_in_one_chain_leaves_the_other_running() {
    let project = Project::new();
    project.write_dag(
        r#"
        [steps]
        "meadow://one/1/a" = []
        "garden://one/1/a" = ["meadow://one/1/a"]
        "meadow://two/1/a" = []
        "garden://two/1/a" = ["meadow://two/1/a"]
        "#,
    );
    let runner = Arc::new(RecordingRunner::new().with_failures(["meadow://one/1/a"]));
    let mut config = project.config();
    config.workers = 2;
    let engine = Engine::new(config)
        .unwrap()
        .with_runners(RunnerRegistry::new().with_fallback(runner.clone()))
        .with_events(Arc::new(NoOpEventSink));

    let outcome = engine.run(&PlanRequest::new()).await.unwrap();
    let report = outcome.report.as_ref().unwrap();

    assert!(!outcome.is_success());
    assert_failed(report, &id("meadow://one/1/a"));
    assert_skipped(report, &id("garden://one/1/a"));
    assert_succeeded(report, &id("meadow://two/1/a"));
    assert_succeeded(report, &id("garden://two/1/a"));
    let Some(EtlError::StepExecution(error)) = outcome.first_error() else {
        panic!("expected a step execution error");
    };
    assert_eq!(error.step, "meadow://one/1/a");
    assert_eq!(
        outcome.planned.graph.step(&id("garden://one/1/a")).unwrap().state(),
        crate::core::StepState::Skipped
    );
}

#[tokio::test]
async fn test_failure_skips_descendants_without_recording_them() {
    let project = Project::new();
    project.write_dag(
        r#"
        [steps]
        "meadow://s/1/a" = []
        "garden://s/1/b" = ["meadow://s/1/a"]
        "grapher://s/1/c" = ["garden://s/1/b"]
        "#,
    );
    let runner = Arc::new(RecordingRunner::new().with_failures(["meadow://s/1/a"]));
    let store = Arc::new(InMemoryChecksumStore::new());
    let engine = engine(&project, runner.clone()).with_store(store.clone());

    let outcome = engine.run(&PlanRequest::new()).await.unwrap();
    let report = outcome.report.unwrap();

    assert_eq!(report.counts(), (0, 1, 2));
    for skipped in ["garden://s/1/b", "grapher://s/1/c"] {
        assert_eq!(
            report.record(&id(skipped)).unwrap().result,
            StepResultKind::Skipped {
                reason: SkipReason::UpstreamFailed {
                    ancestor: id("meadow://s/1/a")
                }
            }
        );
    }
    assert!(store.is_empty());
    assert_eq!(runner.started(), vec![id("meadow://s/1/a")]);
}

#[tokio::test]
async fn test_pattern_pulls_in_unbuilt_dependencies() {
    let project = scenario_project();
    let engine = engine(&project, Arc::new(RecordingRunner::new()));

    let outcome = engine
        .plan(&PlanRequest::new().with_pattern("curated"))
        .await
        .unwrap();

    assert_eq!(planned_ids(&outcome), vec![SNAP, CLEAN, CURATED]);
    assert!(outcome.plan.steps().iter().all(|s| s.reason == PlanReason::NeverBuilt));
}

#[tokio::test]
async fn test_unmatched_pattern_is_reported_apart_from_up_to_date() {
    let project = scenario_project();
    let engine = engine(&project, Arc::new(RecordingRunner::new()));

    let unmatched = engine
        .plan(&PlanRequest::new().with_pattern("no-such-step"))
        .await
        .unwrap();
    assert!(unmatched.plan.is_empty());
    assert!(unmatched.matched_nothing());

    engine.run(&PlanRequest::new()).await.unwrap();
    let fresh = engine
        .plan(&PlanRequest::new().with_pattern("curated"))
        .await
        .unwrap();
    assert!(fresh.plan.is_empty());
    assert!(!fresh.matched_nothing());
}

#[tokio::test]
async fn test_only_runs_the_selected_step_even_if_dependencies_were_never_built() {
    let project = scenario_project();
    let records = Arc::new(FileChecksumStore::new(project.checksum_dir()));
    let clean = id(CLEAN);
    let curate = FnRunner::new("curate", move |ctx: StepContext| {
        let records = Arc::clone(&records);
        let clean = clean.clone();
        async move {
            match records.get(&clean).await {
                Ok(Some(_)) => StepOutput::ok(),
                _ => StepOutput::fail(format!("{} needs {clean} to be built first", ctx.step)),
            }
        }
    });
    let engine = engine(&project, Arc::new(curate));
    let request = PlanRequest::new().with_pattern("curated").with_only(true);

    let outcome = engine.run(&request).await.unwrap();

    assert_eq!(planned_ids(&outcome.planned), vec![CURATED]);
    let report = outcome.report.unwrap();
    assert_failed(&report, &id(CURATED));
    assert!(FileChecksumStore::new(project.checksum_dir())
        .get(&id(CURATED))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_touching_a_source_replans_it_and_its_dependents() {
    let project = scenario_project();
    let engine = engine(&project, Arc::new(RecordingRunner::new()));
    engine.run(&PlanRequest::new()).await.unwrap();

    project.write_step(CLEAN, "clean(); dedupe()");
    let outcome = engine
        .plan(&PlanRequest::new().with_pattern("curated"))
        .await
        .unwrap();

    assert_eq!(planned_ids(&outcome), vec![CLEAN, CURATED]);
    assert!(outcome.plan.steps().iter().all(|s| s.reason == PlanReason::Stale));
}

#[tokio::test]
async fn test_dry_run_executes_nothing() {
    let project = scenario_project();
    let runner = Arc::new(RecordingRunner::new());
    let engine = engine(&project, runner.clone());

    let outcome = engine
        .run(&PlanRequest::new().with_dry_run(true))
        .await
        .unwrap();

    assert!(outcome.report.is_none());
    assert!(outcome.is_success());
    assert_eq!(outcome.planned.plan.len(), 3);
    assert!(runner.started().is_empty());
    assert!(!project.checksum_dir().exists());
}

#[tokio::test]
async fn test_force_and_downstream() {
    let project = scenario_project();
    let engine = engine(&project, Arc::new(RecordingRunner::new()));
    engine.run(&PlanRequest::new()).await.unwrap();

    let forced = engine
        .plan(&PlanRequest::new().with_pattern("clean").with_force(true))
        .await
        .unwrap();
    assert_eq!(planned_ids(&forced), vec![CLEAN]);
    assert_eq!(forced.plan.steps()[0].reason, PlanReason::Forced);

    let cascade = engine
        .plan(
            &PlanRequest::new()
                .with_pattern("clean")
                .with_force(true)
                .with_downstream(true),
        )
        .await
        .unwrap();
    assert_eq!(planned_ids(&cascade), vec![CLEAN]);

    let both = engine
        .plan(
            &PlanRequest::new()
                .with_pattern("snap")
                .with_pattern("curated")
                .with_force(true),
        )
        .await
        .unwrap();
    assert_eq!(planned_ids(&both), vec![SNAP, CURATED]);
    assert!(both.plan.steps().iter().all(|s| s.reason == PlanReason::Forced));
}

#[tokio::test]
async fn test_undeclared_snapshot_resolves_from_steps_dir() {
    let project = Project::new();
    project.write_dag(&format!(r#"[steps]
"{CLEAN}" = ["{SNAP}"]
"#));
    project.write_step(SNAP, "fetch()");
    project.write_step(CLEAN, "clean()");
    let engine = engine(&project, Arc::new(RecordingRunner::new()));

    let outcome = engine.plan(&PlanRequest::new()).await.unwrap();

    assert_eq!(planned_ids(&outcome), vec![SNAP, CLEAN]);
}

#[tokio::test]
async fn test_file_external_change_dirties_dependents() {
    let project = Project::new();
    project.write_file("data/regions.csv", "code,name\nFR,France\n");
    project.write_dag(&format!(r#"[steps]
"{CLEAN}" = ["data/regions.csv"]
"#));
    project.write_step(CLEAN, "clean()");
    let engine = engine(&project, Arc::new(RecordingRunner::new()));
    engine.run(&PlanRequest::new()).await.unwrap();
    assert!(engine.plan(&PlanRequest::new()).await.unwrap().plan.is_empty());

    project.write_file("data/regions.csv", "code,name\nFR,France\nDE,Germany\n");
    let outcome = engine.plan(&PlanRequest::new()).await.unwrap();

    assert_eq!(planned_ids(&outcome), vec![CLEAN]);
}

#[tokio::test]
async fn test_lifecycle_events() {
    let project = scenario_project();
    let sink = Arc::new(CollectingEventSink::new());
    let engine = engine(&project, Arc::new(RecordingRunner::new())).with_events(sink.clone());

    engine.run(&PlanRequest::new()).await.unwrap();

    assert_eq!(sink.events_of_type(types::PLAN_BUILT).len(), 1);
    assert_eq!(sink.events_of_type(types::STEP_STARTED).len(), 3);
    assert_eq!(sink.events_of_type(types::STEP_COMPLETED).len(), 3);
    let done = sink.events_of_type(types::RUN_COMPLETED);
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].data["succeeded"], serde_json::json!(3));
}
