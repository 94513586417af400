//! Terminal state of one backup step.

use serde::Serialize;
use std::fmt;

/// How a step of a backup run ended.
///
/// Step entry points log their own errors and hand back one of these, so the
/// caller sees a logged failure instead of an error value it must report again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status", content = "reason")]
pub enum StepOutcome {
    /// The component for this step was not configured.
    Skipped,
    Completed,
    Failed(String),
    /// Stopped by an external interrupt (Ctrl-C).
    Interrupted,
}

impl StepOutcome {
    pub fn failed(reason: impl fmt::Display) -> Self {
        Self::Failed(reason.to_string())
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Interrupted)
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped => f.write_str("skipped"),
            Self::Completed => f.write_str("completed"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
            Self::Interrupted => f.write_str("interrupted"),
        }
    }
}
