use crate::core::{MigrateError, Result, SchemaVersion};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Per-step lifecycle inside one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// How a step that did not fail got to `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepDisposition {
    /// `apply` ran and the checkpoint was recorded.
    Applied,
    /// Already in the ledger; `apply` was not called.
    Skipped,
    /// `apply` ran in dry-run mode; nothing recorded.
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub step_id: String,
    pub target_version: SchemaVersion,
    pub status: StepStatus,
    pub disposition: Option<StepDisposition>,
    pub affected: u64,
    pub elapsed_ms: u64,
}

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The resolved plan was empty.
    NothingToDo,
    Succeeded {
        applied: usize,
        skipped: usize,
    },
    FailedAtStep {
        step_id: String,
        cause: String,
    },
    /// The ledger could not be read or written. `step_id` is `None` when the
    /// pre-run probe failed and no step was attempted.
    LedgerUnavailable {
        step_id: Option<String>,
        cause: String,
    },
    Cancelled {
        before_step: String,
    },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::NothingToDo | Self::Succeeded { .. })
    }
}

/// Everything a finished run produced: the human-readable lines, per-step
/// outcomes and the terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub from: SchemaVersion,
    pub to: SchemaVersion,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub lines: Vec<String>,
    pub steps: Vec<StepOutcome>,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn applied_ids(&self) -> Vec<&str> {
        self.ids_with(StepDisposition::Applied)
    }

    pub fn skipped_ids(&self) -> Vec<&str> {
        self.ids_with(StepDisposition::Skipped)
    }

    pub fn rehearsed_ids(&self) -> Vec<&str> {
        self.ids_with(StepDisposition::DryRun)
    }

    fn ids_with(&self, disposition: StepDisposition) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|step| step.disposition == Some(disposition))
            .map(|step| step.step_id.as_str())
            .collect()
    }

    /// Run log followed by a one-line summary.
    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        let mode = if self.dry_run { " (dry-run)" } else { "" };
        let summary = match &self.outcome {
            RunOutcome::NothingToDo => format!(
                "Nothing to migrate from {} to {}{}",
                self.from, self.to, mode
            ),
            RunOutcome::Succeeded { applied, skipped } => format!(
                "Migration {} -> {} succeeded{}: {} applied, {} skipped",
                self.from,
                self.to,
                mode,
                if self.dry_run {
                    self.rehearsed_ids().len()
                } else {
                    *applied
                },
                skipped
            ),
            RunOutcome::FailedAtStep { step_id, .. } => format!(
                "Migration {} -> {} failed at step {}; re-run the same command to resume",
                self.from, self.to, step_id
            ),
            RunOutcome::LedgerUnavailable { cause, .. } => {
                format!("Migration aborted, checkpoint ledger unavailable: {}", cause)
            }
            RunOutcome::Cancelled { before_step } => format!(
                "Migration cancelled before step {}; re-run the same command to resume",
                before_step
            ),
        };
        out.push_str(&summary);
        out
    }

    /// Turns a non-successful outcome into the matching error.
    pub fn into_result(self) -> Result<RunReport> {
        match &self.outcome {
            RunOutcome::NothingToDo | RunOutcome::Succeeded { .. } => Ok(self),
            RunOutcome::FailedAtStep { step_id, cause } => Err(MigrateError::StepFailed {
                step_id: step_id.clone(),
                cause: cause.clone(),
            }),
            RunOutcome::LedgerUnavailable { cause, .. } => {
                Err(MigrateError::LedgerUnavailable(cause.clone()))
            }
            RunOutcome::Cancelled { before_step } => {
                Err(MigrateError::Cancelled(before_step.clone()))
            }
        }
    }
}
