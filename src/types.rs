//! Type-safe vocabulary shared by steps, recipes and the sequencer.
//!
//! String-backed enums use strum so the same spelling is used in step ids,
//! log lines and JSON reports.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// When a notification fires relative to the step that triggered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Timing {
    /// Runs before the triggering step's remaining notifications
    Immediate,
    /// Queued, de-duplicated and run once after the linear pass
    #[default]
    Delayed,
}

/// Step kinds, used as the `kind` half of a `kind[name]` step id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepKind {
    Execute,
    Bash,
    Package,
    Directory,
    RemoteFile,
    CookbookFile,
    File,
    Template,
    Link,
    Git,
    CronD,
    ShellEnvironment,
}

/// What happened to a step during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepOutcome {
    /// Guard reported the effect already holds
    Skipped,
    /// Action ran and changed the machine
    Changed,
    /// Dry-run: guard unsatisfied, action not performed
    WouldChange,
    /// Best-effort step whose action failed
    Failed,
    /// Trigger-only step that nothing notified
    Idle,
}

impl StepOutcome {
    /// Whether this outcome fires the step's notifications.
    pub const fn fires_notifications(self) -> bool {
        matches!(self, Self::Changed | Self::WouldChange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_kind_spelling() {
        assert_eq!(StepKind::RemoteFile.to_string(), "remote_file");
        assert_eq!(StepKind::CronD.to_string(), "cron_d");
        assert_eq!("shell_environment".parse::<StepKind>(), Ok(StepKind::ShellEnvironment));
    }

    #[test]
    fn test_only_changes_fire_notifications() {
        assert!(StepOutcome::Changed.fires_notifications());
        assert!(StepOutcome::WouldChange.fires_notifications());
        assert!(!StepOutcome::Skipped.fires_notifications());
        assert!(!StepOutcome::Failed.fires_notifications());
        assert!(!StepOutcome::Idle.fires_notifications());
    }

    #[test]
    fn test_timing_json() {
        let json = serde_json::to_string(&Timing::Immediate).unwrap();
        assert_eq!(json, "\"immediate\"");
    }
}
