//! Plan resolution, checkpointed execution and the facade that runs them.

pub mod cancel;
pub mod engine;
pub mod executor;
pub mod plan;
pub mod report;

pub use cancel::CancelSignal;
pub use engine::Migrator;
pub use executor::MigrationRun;
pub use plan::{MigrationPlan, resolve_plan, resolve_plan_between};
pub use report::{RunOutcome, RunReport, StepDisposition, StepOutcome, StepStatus};
