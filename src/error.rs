//! Error handling module for rigup
//!
//! Provides centralized error handling with proper error types using thiserror.
//! The sequencer distinguishes two failure families: a guard that could not be
//! evaluated, and an action that failed while changing the machine. Both carry
//! the id of the step so the operator knows where to look before re-running.

use thiserror::Error;

/// Main error type for rigup
#[derive(Error, Debug)]
pub enum RigupError {
    /// A step's guard could not be evaluated
    #[error("Guard evaluation failed for {step}: {message}")]
    Guard { step: String, message: String },

    /// A step's action failed
    #[error("Action failed for {step}: {message}")]
    Action { step: String, message: String },

    /// Recipe declaration errors (duplicate ids, dangling notifications)
    #[error("Recipe error: {0}")]
    Recipe(String),

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Template rendering errors (unknown variable, unbalanced block)
    #[error("Template error: {0}")]
    Template(String),

    /// Subprocess spawning errors
    #[error("Command error: {0}")]
    Command(String),

    /// IO errors (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for rigup operations
pub type Result<T> = std::result::Result<T, RigupError>;

// Convenient error constructors
impl RigupError {
    /// Create a guard evaluation error for a step
    pub fn guard(step: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Guard {
            step: step.into(),
            message: msg.into(),
        }
    }

    /// Create an action execution error for a step
    pub fn action(step: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Action {
            step: step.into(),
            message: msg.into(),
        }
    }

    /// Create a recipe declaration error
    pub fn recipe(msg: impl Into<String>) -> Self {
        Self::Recipe(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a template error
    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }

    /// Create a command error
    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }

    /// The id of the step this error is attributed to, if any.
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::Guard { step, .. } | Self::Action { step, .. } => Some(step),
            _ => None,
        }
    }

    /// Attach a step id to an error raised below the sequencer.
    ///
    /// Errors that already name a step are returned unchanged.
    pub fn into_action(self, step: &str) -> Self {
        match self {
            Self::Guard { .. } | Self::Action { .. } => self,
            other => Self::action(step, other.to_string()),
        }
    }

    /// Guard-side counterpart of [`RigupError::into_action`].
    pub fn into_guard(self, step: &str) -> Self {
        match self {
            Self::Guard { .. } | Self::Action { .. } => self,
            other => Self::guard(step, other.to_string()),
        }
    }
}
