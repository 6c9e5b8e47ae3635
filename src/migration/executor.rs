use super::cancel::CancelSignal;
use super::plan::MigrationPlan;
use super::report::{RunOutcome, RunReport, StepDisposition, StepOutcome, StepStatus};
use crate::ledger::CheckpointLedger;
use crate::step::{MigrationStep, StepContext};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, Level, event, info_span};

/// One execution of a plan against a ledger.
///
/// Steps run strictly in plan order. A step found in the ledger is skipped;
/// otherwise it is applied and, outside dry-run, checkpointed right after.
/// The first failure (of a step or of the ledger) ends the run, leaving later
/// steps untouched so a re-run resumes exactly there.
pub struct MigrationRun<'a> {
    plan: &'a MigrationPlan,
    ledger: &'a dyn CheckpointLedger,
    ctx: &'a StepContext,
    lines: Vec<String>,
    steps: Vec<StepOutcome>,
}

impl<'a> MigrationRun<'a> {
    pub fn new(plan: &'a MigrationPlan, ledger: &'a dyn CheckpointLedger, ctx: &'a StepContext) -> Self {
        Self {
            plan,
            ledger,
            ctx,
            lines: Vec::new(),
            steps: plan
                .steps()
                .map(|step| StepOutcome {
                    step_id: step.id().to_string(),
                    target_version: step.target_version(),
                    status: StepStatus::Pending,
                    disposition: None,
                    affected: 0,
                    elapsed_ms: 0,
                })
                .collect(),
        }
    }

    pub async fn execute(mut self, cancel: &CancelSignal) -> RunReport {
        let started_at = Utc::now();
        let span = info_span!(
            "migration_run",
            from = %self.plan.from_version(),
            to = %self.plan.to_version(),
            dry_run = self.ctx.is_dry_run(),
            steps = self.plan.len()
        );
        let outcome = self.drive(cancel).instrument(span).await;

        RunReport {
            from: self.plan.from_version(),
            to: self.plan.to_version(),
            dry_run: self.ctx.is_dry_run(),
            started_at,
            finished_at: Utc::now(),
            lines: self.lines,
            steps: self.steps,
            outcome,
        }
    }

    fn line(&mut self, line: String) {
        event!(Level::INFO, "{}", line);
        self.lines.push(line);
    }

    fn absorb_step_log(&mut self) {
        for line in self.ctx.take_log() {
            self.lines.push(format!("  {}", line));
        }
    }

    async fn drive(&mut self, cancel: &CancelSignal) -> RunOutcome {
        if self.plan.is_empty() {
            self.line(format!(
                "nothing to do: no steps between {} and {}",
                self.plan.from_version(),
                self.plan.to_version()
            ));
            return RunOutcome::NothingToDo;
        }

        // An unreachable ledger must stop the run before any step touches the store.
        if let Err(err) = self.ledger.history().await {
            event!(Level::ERROR, error = %err, "checkpoint ledger probe failed");
            self.line(format!("ABORTED: {}", err));
            return RunOutcome::LedgerUnavailable {
                step_id: None,
                cause: err.to_string(),
            };
        }

        let steps: Vec<Arc<dyn MigrationStep>> = self.plan.steps().cloned().collect();
        let mut applied = 0;
        let mut skipped = 0;

        for (position, step) in steps.iter().enumerate() {
            let step_id = step.id().to_string();

            if cancel.is_cancelled() {
                self.line(format!("cancelled before {}", step_id));
                return RunOutcome::Cancelled {
                    before_step: step_id,
                };
            }

            match self.ledger.is_completed(&step_id).await {
                Ok(true) => {
                    self.line(format!("skip {} (already applied)", step_id));
                    self.steps[position].status = StepStatus::Completed;
                    self.steps[position].disposition = Some(StepDisposition::Skipped);
                    skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    self.line(format!("FAILED {}: {}", step_id, err));
                    return RunOutcome::LedgerUnavailable {
                        step_id: Some(step_id),
                        cause: err.to_string(),
                    };
                }
            }

            self.steps[position].status = StepStatus::Running;
            if self.ctx.is_dry_run() {
                self.line(format!("dry-run {}", step_id));
            } else {
                self.line(format!("running {}", step_id));
            }

            let span = info_span!(
                "migration_step",
                step_id = %step_id,
                target_version = %step.target_version()
            );
            let started = Instant::now();
            let result = step.apply(self.ctx).instrument(span).await;
            self.steps[position].elapsed_ms = started.elapsed().as_millis() as u64;
            self.absorb_step_log();

            let report = match result {
                Ok(report) => report,
                Err(err) => {
                    let cause = err.to_string();
                    event!(Level::ERROR, step_id = %step_id, cause = %cause, "migration step failed");
                    self.steps[position].status = StepStatus::Failed;
                    self.line(format!("FAILED {}: {}", step_id, cause));
                    return RunOutcome::FailedAtStep { step_id, cause };
                }
            };
            self.steps[position].affected = report.affected;
            if let Some(note) = report.note {
                self.lines.push(format!("  {}", note));
            }

            if self.ctx.is_dry_run() {
                self.steps[position].status = StepStatus::Completed;
                self.steps[position].disposition = Some(StepDisposition::DryRun);
                continue;
            }

            if let Err(err) = self.ledger.mark_completed(&step_id, Utc::now()).await {
                // The step's effect is in the store but not recorded; the next run replays it.
                event!(Level::ERROR, step_id = %step_id, error = %err, "checkpoint write failed");
                self.steps[position].status = StepStatus::Failed;
                self.line(format!("FAILED {}: checkpoint not recorded: {}", step_id, err));
                return RunOutcome::LedgerUnavailable {
                    step_id: Some(step_id),
                    cause: err.to_string(),
                };
            }

            self.steps[position].status = StepStatus::Completed;
            self.steps[position].disposition = Some(StepDisposition::Applied);
            applied += 1;
            self.line(format!("completed {}", step_id));
        }

        RunOutcome::Succeeded { applied, skipped }
    }
}
