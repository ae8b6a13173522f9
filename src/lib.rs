//! rigup Library
//!
//! Idempotent, ordered, notification-driven provisioning. A [`Recipe`] is an
//! ordered list of [`Step`]s; the [`Sequencer`] walks it once, skipping steps
//! whose guards hold, applying the rest, and routing notifications from steps
//! that actually changed the machine.

pub mod cli;
pub mod command;
pub mod config_file;
pub mod error;
pub mod guard;
pub mod ownership;
pub mod recipe;
pub mod recipes;
pub mod resource;
pub mod sequencer;
pub mod step;
pub mod template;
pub mod types;

// Re-export main types for convenience
pub use command::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};
pub use config_file::ProvisionConfig;
pub use error::{Result, RigupError};
pub use guard::Guard;
pub use ownership::Ownership;
pub use recipe::Recipe;
pub use resource::Resource;
pub use sequencer::{RunOptions, RunReport, Sequencer, StepReport};
pub use step::{Notification, Step, StepId};
pub use template::TemplateVars;
pub use types::{StepKind, StepOutcome, Timing};
