//! Step Sequencer
//!
//! Runs a [`Recipe`] as a single linear pass:
//!
//! ```text
//! for each step in declaration order:
//!     trigger-only?  → leave for notifications
//!     guard satisfied? → Skipped (nothing fires)
//!     otherwise        → apply → Changed
//!                         ├─ immediate notifications run now (depth first)
//!                         └─ delayed notifications are queued
//! after the pass:
//!     run queued delayed notifications in first-queued order
//! ```
//!
//! # Rules
//!
//! - **At most once**: a step's action runs at most once per pass, whether it
//!   was reached by the linear pass or by a notification.
//! - **Change-driven**: notifications fire only from `Changed` (or, in
//!   dry-run, `WouldChange`) outcomes.
//! - **Fail fast**: a guard error, or an action error on a step not marked
//!   best-effort, aborts the run with the step id in the error.
//! - **No recovery**: nothing is retried or rolled back; fix and re-run.

use crate::command::CommandRunner;
use crate::error::Result;
use crate::recipe::Recipe;
use crate::types::{StepOutcome, Timing};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Options for a provisioning pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Evaluate guards but never apply actions.
    pub dry_run: bool,
}

/// Record of one step evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: String,
    pub outcome: StepOutcome,
    /// Step whose notification caused this evaluation, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notified_by: Option<String>,
    pub elapsed_ms: u64,
    /// Error message of a failed best-effort step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a whole pass, in execution order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub recipe: String,
    pub dry_run: bool,
    pub steps: Vec<StepReport>,
}

impl RunReport {
    /// Steps that changed (or would change, in dry-run).
    pub fn changed(&self) -> Vec<&StepReport> {
        self.steps
            .iter()
            .filter(|r| r.outcome.fires_notifications())
            .collect()
    }

    pub fn count(&self, outcome: StepOutcome) -> usize {
        self.steps.iter().filter(|r| r.outcome == outcome).count()
    }

    /// Last recorded outcome for `step` (rendered id).
    pub fn outcome_of(&self, step: &str) -> Option<StepOutcome> {
        self.steps
            .iter()
            .rev()
            .find(|r| r.step == step)
            .map(|r| r.outcome)
    }

    /// True when nothing needed to change.
    pub fn is_converged(&self) -> bool {
        self.changed().is_empty() && self.count(StepOutcome::Failed) == 0
    }

    /// Returns a summary of the run for logging/display.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "Run{}: {} ({} changed, {} skipped, {} failed)",
            if self.dry_run { " (dry-run)" } else { "" },
            self.recipe,
            self.changed().len(),
            self.count(StepOutcome::Skipped),
            self.count(StepOutcome::Failed)
        )];
        for r in &self.steps {
            let via = r
                .notified_by
                .as_deref()
                .map(|s| format!(" <- {}", s))
                .unwrap_or_default();
            lines.push(format!("  {:<12} {}{}", r.outcome, r.step, via));
        }
        lines.join("\n")
    }
}

/// Mutable bookkeeping for one pass.
struct Pass {
    /// Steps whose action ran (or would run) in this pass.
    applied: HashSet<usize>,
    /// Steps evaluated at least once.
    visited: HashSet<usize>,
    delayed: VecDeque<(usize, usize)>,
    report: RunReport,
}

/// Drives a recipe against a machine through a [`CommandRunner`].
pub struct Sequencer<'r> {
    runner: &'r mut dyn CommandRunner,
    options: RunOptions,
}

impl<'r> Sequencer<'r> {
    pub fn new(runner: &'r mut dyn CommandRunner, options: RunOptions) -> Self {
        Self { runner, options }
    }

    /// Run one provisioning pass over `recipe`.
    pub fn run(&mut self, recipe: &Recipe) -> Result<RunReport> {
        recipe.validate()?;
        info!(
            "Starting {}run of recipe '{}' ({} steps)",
            if self.options.dry_run { "dry-" } else { "" },
            recipe.name(),
            recipe.len()
        );

        let mut pass = Pass {
            applied: HashSet::new(),
            visited: HashSet::new(),
            delayed: VecDeque::new(),
            report: RunReport {
                recipe: recipe.name().to_string(),
                dry_run: self.options.dry_run,
                steps: Vec::with_capacity(recipe.len()),
            },
        };

        for (idx, step) in recipe.steps().iter().enumerate() {
            if step.trigger_only {
                continue;
            }
            if pass.applied.contains(&idx) {
                debug!("{} already ran via notification", step.id);
                continue;
            }
            self.converge(recipe, idx, None, &mut pass)?;
        }

        while let Some((target, source)) = pass.delayed.pop_front() {
            self.notify(recipe, target, source, &mut pass)?;
        }

        for (idx, step) in recipe.steps().iter().enumerate() {
            if step.trigger_only && !pass.visited.contains(&idx) {
                pass.report.steps.push(StepReport {
                    step: step.id.to_string(),
                    outcome: StepOutcome::Idle,
                    notified_by: None,
                    elapsed_ms: 0,
                    error: None,
                });
            }
        }

        info!(
            "Finished recipe '{}': {} changed, {} skipped",
            recipe.name(),
            pass.report.changed().len(),
            pass.report.count(StepOutcome::Skipped)
        );
        Ok(pass.report)
    }

    /// Run a notified step unless it already acted in this pass.
    fn notify(&mut self, recipe: &Recipe, target: usize, source: usize, pass: &mut Pass) -> Result<()> {
        if pass.applied.contains(&target) {
            debug!(
                "{} notified by {} but already ran this pass",
                recipe.steps()[target].id,
                recipe.steps()[source].id
            );
            return Ok(());
        }
        self.converge(recipe, target, Some(source), pass)
    }

    /// Guard, act, notify for one step.
    fn converge(
        &mut self,
        recipe: &Recipe,
        idx: usize,
        source: Option<usize>,
        pass: &mut Pass,
    ) -> Result<()> {
        let step = &recipe.steps()[idx];
        let started = Instant::now();
        pass.visited.insert(idx);

        let mut failure = None;
        let outcome = if step.is_satisfied(self.runner)? {
            StepOutcome::Skipped
        } else if self.options.dry_run {
            pass.applied.insert(idx);
            StepOutcome::WouldChange
        } else {
            pass.applied.insert(idx);
            match step.apply(self.runner) {
                Ok(()) => StepOutcome::Changed,
                Err(e) if step.best_effort => {
                    warn!("{} failed (best effort, continuing): {}", step.id, e);
                    failure = Some(e.to_string());
                    StepOutcome::Failed
                }
                Err(e) => {
                    error!("{} failed: {}", step.id, e);
                    return Err(e);
                }
            }
        };

        info!("{} {}", step.id, outcome);
        pass.report.steps.push(StepReport {
            step: step.id.to_string(),
            outcome,
            notified_by: source.map(|s| recipe.steps()[s].id.to_string()),
            elapsed_ms: started.elapsed().as_millis() as u64,
            error: failure,
        });

        if !outcome.fires_notifications() {
            return Ok(());
        }
        for n in step.notifications() {
            // validate() guarantees every target is declared
            let Some(target) = recipe.index_of(&n.target) else {
                continue;
            };
            match n.timing {
                Timing::Immediate => {
                    debug!("{} notifies {} (immediate)", step.id, n.target);
                    self.notify(recipe, target, idx, pass)?;
                }
                Timing::Delayed => {
                    if pass.delayed.iter().any(|&(t, _)| t == target) {
                        continue;
                    }
                    debug!("{} queues {} (delayed)", step.id, n.target);
                    pass.delayed.push_back((target, idx));
                }
            }
        }
        Ok(())
    }
}
