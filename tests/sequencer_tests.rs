//! Tests for the step sequencer against a real filesystem
//!
//! These tests verify:
//! - Declaration order
//! - Idempotence across passes
//! - Notifications fire iff the source step changed
//! - Immediate vs delayed timing
//! - Failure attribution and best-effort steps

mod common;

use common::FakeHost;
use rigup::command::SystemRunner;
use rigup::error::RigupError;
use rigup::recipe::Recipe;
use rigup::sequencer::{RunOptions, Sequencer};
use rigup::step::{Step, StepId};
use rigup::types::{StepKind, StepOutcome, Timing};
use std::fs;
use std::path::Path;

fn run(recipe: &Recipe) -> rigup::sequencer::RunReport {
    let mut runner = SystemRunner::new();
    Sequencer::new(&mut runner, RunOptions::default())
        .run(recipe)
        .expect("run should succeed")
}

fn reload_recipe(dir: &Path) -> Recipe {
    let log = dir.join("reloads.log");
    Recipe::new("reload")
        .step(
            Step::file(dir.join("service.conf"), "listen 8080\n")
                .notifies(StepId::new(StepKind::Execute, "reload service"), Timing::Immediate),
        )
        .step(
            Step::execute("reload service", format!("echo reload >> {}", log.display()))
                .trigger_only(),
        )
}

fn reload_count(dir: &Path) -> usize {
    fs::read_to_string(dir.join("reloads.log"))
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

// =============================================================================
// Notification Semantics
// =============================================================================

#[test]
fn test_file_change_notifies_reload_once() {
    let dir = tempfile::tempdir().unwrap();
    let recipe = reload_recipe(dir.path());

    let first = run(&recipe);
    assert_eq!(
        fs::read_to_string(dir.path().join("service.conf")).unwrap(),
        "listen 8080\n"
    );
    assert_eq!(reload_count(dir.path()), 1);
    assert_eq!(first.changed().len(), 2);

    let second = run(&recipe);
    assert_eq!(reload_count(dir.path()), 1, "no reload when nothing changed");
    assert_eq!(
        second.outcome_of(&format!("file[{}]", dir.path().join("service.conf").display())),
        Some(StepOutcome::Skipped)
    );
    assert_eq!(
        second.outcome_of("execute[reload service]"),
        Some(StepOutcome::Idle)
    );
    assert!(second.is_converged());
}

#[test]
fn test_drift_triggers_reload_again() {
    let dir = tempfile::tempdir().unwrap();
    let recipe = reload_recipe(dir.path());

    run(&recipe);
    fs::write(dir.path().join("service.conf"), "listen 9090\n").unwrap();
    run(&recipe);

    assert_eq!(reload_count(dir.path()), 2);
    assert_eq!(
        fs::read_to_string(dir.path().join("service.conf")).unwrap(),
        "listen 8080\n"
    );
}

#[test]
fn test_delayed_notification_runs_after_pass_once() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("order.log");
    let restart = StepId::new(StepKind::Execute, "restart");
    let recipe = Recipe::new("delayed")
        .step(Step::file(dir.path().join("a.conf"), "a").notifies(restart.clone(), Timing::Delayed))
        .step(Step::file(dir.path().join("b.conf"), "b").notifies(restart.clone(), Timing::Delayed))
        .step(Step::execute("last", format!("echo last >> {}", log.display())))
        .step(Step::execute("restart", format!("echo restart >> {}", log.display())).trigger_only());

    let report = run(&recipe);
    assert_eq!(fs::read_to_string(&log).unwrap(), "last\nrestart\n");
    assert_eq!(report.steps.last().unwrap().step, "execute[restart]");
    assert_eq!(
        report.steps.last().unwrap().notified_by.as_deref(),
        Some(format!("file[{}]", dir.path().join("a.conf").display()).as_str())
    );
}

#[test]
fn test_immediate_chain_runs_depth_first() {
    let mut host = FakeHost::new();
    let recipe = Recipe::new("chain")
        .step(Step::execute("build", "make all").notifies(
            StepId::new(StepKind::Execute, "tests"),
            Timing::Immediate,
        ))
        .step(Step::execute("next", "echo next"))
        .step(
            Step::execute("tests", "make test")
                .trigger_only()
                .notifies(StepId::new(StepKind::Execute, "python"), Timing::Immediate),
        )
        .step(Step::execute("python", "make pycaffe").trigger_only());

    Sequencer::new(&mut host, RunOptions::default())
        .run(&recipe)
        .unwrap();
    assert_eq!(host.actions(), vec!["make all", "make test", "make pycaffe", "echo next"]);
}

#[test]
fn test_step_acts_at_most_once_per_pass() {
    let mut host = FakeHost::new();
    let target = StepId::new(StepKind::Execute, "refresh");
    let recipe = Recipe::new("once")
        .step(Step::execute("refresh", "apt-get update"))
        .step(Step::execute("add repo", "dpkg -i repo.deb").notifies(target.clone(), Timing::Immediate))
        .step(Step::execute("add other", "dpkg -i other.deb").notifies(target, Timing::Delayed));

    Sequencer::new(&mut host, RunOptions::default())
        .run(&recipe)
        .unwrap();
    assert_eq!(host.count("apt-get update"), 1);
}

#[test]
fn test_notified_step_still_checks_guard() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("done");
    fs::write(&marker, "").unwrap();

    let mut host = FakeHost::new();
    let recipe = Recipe::new("guarded-target")
        .step(Step::execute("source", "echo changed").notifies(
            StepId::new(StepKind::Execute, "target"),
            Timing::Immediate,
        ))
        .step(Step::execute("target", "expensive").creates(&marker).trigger_only());

    let report = Sequencer::new(&mut host, RunOptions::default())
        .run(&recipe)
        .unwrap();
    assert_eq!(host.count("expensive"), 0);
    assert_eq!(report.outcome_of("execute[target]"), Some(StepOutcome::Skipped));
}

// =============================================================================
// Failure Handling
// =============================================================================

#[test]
fn test_action_failure_names_step_and_stops() {
    let mut host = FakeHost::new().fail_on("make all");
    let recipe = Recipe::new("fails")
        .step(Step::execute("build-caffe", "make all -j8"))
        .step(Step::execute("after", "echo after"));

    let err = Sequencer::new(&mut host, RunOptions::default())
        .run(&recipe)
        .unwrap_err();
    assert!(matches!(err, RigupError::Action { .. }));
    assert_eq!(err.step(), Some("execute[build-caffe]"));
    assert!(err.to_string().contains("exit code 1"));
    assert_eq!(host.count("echo after"), 0);
}

#[test]
fn test_guard_failure_is_guard_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut host = FakeHost::new();
    let recipe = Recipe::new("guard").step(Step::cookbook_file(
        dir.path().join("dest"),
        dir.path().join("missing-source"),
    ));

    let err = Sequencer::new(&mut host, RunOptions::default())
        .run(&recipe)
        .unwrap_err();
    assert!(matches!(err, RigupError::Guard { .. }));
    assert_eq!(
        err.step(),
        Some(format!("cookbook_file[{}]", dir.path().join("dest").display()).as_str())
    );
}

#[test]
fn test_best_effort_failure_is_reported() {
    let mut host = FakeHost::new().fail_on("optional");
    let recipe = Recipe::new("best-effort")
        .step(Step::execute("optional", "optional thing").best_effort())
        .step(Step::execute("required", "echo required"));

    let report = Sequencer::new(&mut host, RunOptions::default())
        .run(&recipe)
        .unwrap();
    assert_eq!(report.outcome_of("execute[optional]"), Some(StepOutcome::Failed));
    assert_eq!(report.outcome_of("execute[required]"), Some(StepOutcome::Changed));
    assert!(!report.is_converged());
}

// =============================================================================
// Dry Run
// =============================================================================

#[test]
fn test_dry_run_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let recipe = reload_recipe(dir.path());
    let mut runner = SystemRunner::new();

    let report = Sequencer::new(&mut runner, RunOptions { dry_run: true })
        .run(&recipe)
        .unwrap();
    assert!(!dir.path().join("service.conf").exists());
    assert_eq!(reload_count(dir.path()), 0);
    assert_eq!(report.count(StepOutcome::WouldChange), 2);
    assert!(report.summary().starts_with("Run (dry-run): reload"));
}

// =============================================================================
// Report
// =============================================================================

#[test]
fn test_report_serializes() {
    let dir = tempfile::tempdir().unwrap();
    let report = run(&reload_recipe(dir.path()));
    let json: serde_json::Value = serde_json::to_value(&report).unwrap();
    assert_eq!(json["recipe"], "reload");
    assert_eq!(json["steps"][0]["outcome"], "changed");
    assert!(json["steps"][1]["notified_by"].as_str().unwrap().starts_with("file["));
}
