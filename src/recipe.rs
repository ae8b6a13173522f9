//! Recipes: the ordered declaration of steps for one provisioning concern.
//!
//! Declaration order is execution order. A recipe is validated as a whole
//! before anything runs, so a typo in a notification target fails fast
//! instead of halfway through a driver install.

use crate::error::{Result, RigupError};
use crate::step::{Step, StepId};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct Recipe {
    name: String,
    steps: Vec<Step>,
}

impl Recipe {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a step (builder form).
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    /// Append every step of `other`, in its order.
    pub fn include(mut self, other: Recipe) -> Self {
        self.steps.extend(other.steps);
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn index_of(&self, id: &StepId) -> Option<usize> {
        self.steps.iter().position(|s| &s.id == id)
    }

    pub fn find(&self, id: &StepId) -> Option<&Step> {
        self.index_of(id).map(|i| &self.steps[i])
    }

    /// Check the declaration for internal consistency.
    ///
    /// # Errors
    ///
    /// - a step with an empty name
    /// - two steps sharing an id
    /// - a notification whose target is not declared
    /// - a step notifying itself
    pub fn validate(&self) -> Result<()> {
        let mut seen: HashMap<&StepId, usize> = HashMap::with_capacity(self.steps.len());
        for (i, step) in self.steps.iter().enumerate() {
            if step.id.name.trim().is_empty() {
                return Err(RigupError::recipe(format!(
                    "step #{} ({}) has an empty name",
                    i + 1,
                    step.id.kind
                )));
            }
            if let Some(first) = seen.insert(&step.id, i) {
                return Err(RigupError::recipe(format!(
                    "{} declared twice (steps #{} and #{})",
                    step.id,
                    first + 1,
                    i + 1
                )));
            }
        }
        for step in &self.steps {
            for n in step.notifications() {
                if n.target == step.id {
                    return Err(RigupError::recipe(format!("{} notifies itself", step.id)));
                }
                if !seen.contains_key(&n.target) {
                    return Err(RigupError::recipe(format!(
                        "{} notifies undeclared step {}",
                        step.id, n.target
                    )));
                }
            }
        }
        Ok(())
    }

    /// Returns a numbered listing of the recipe for display.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!("Recipe: {} ({} steps)", self.name, self.steps.len())];
        for (i, step) in self.steps.iter().enumerate() {
            let mut flags = Vec::new();
            if step.trigger_only {
                flags.push("on notify");
            }
            if step.best_effort {
                flags.push("best effort");
            }
            let flags = if flags.is_empty() {
                String::new()
            } else {
                format!(" ({})", flags.join(", "))
            };
            lines.push(format!(
                "  {:>2}. {}{}: {}",
                i + 1,
                step.id,
                flags,
                step.resource.describe()
            ));
            for guard in &step.guards {
                lines.push(format!("        {}", guard));
            }
            for n in step.notifications() {
                lines.push(format!("        notifies {} ({})", n.target, n.timing));
            }
        }
        lines.join("\n")
    }
}
