// ============================================================================
// docstore-migrate Library
// ============================================================================

//! Versioned, checkpointed and recoverable data migrations for a document
//! store.
//!
//! Steps are registered explicitly in a [`StepRegistry`], ordered by target
//! version, and executed one at a time by a [`Migrator`]. Every completed
//! step is recorded in a [`CheckpointLedger`] before the next one starts, so
//! an interrupted run resumes at the first step without a checkpoint.
//!
//! ```no_run
//! use docstore_migrate::{CancelSignal, MigrationConfig, Migrator, StepRegistry};
//!
//! # async fn run() -> docstore_migrate::Result<()> {
//! let config = MigrationConfig::load("migration.json")?.apply_env()?;
//! let migrator = Migrator::from_config(&config, StepRegistry::with_builtin_steps()?).await?;
//!
//! let report = migrator.run("1.6.0", false, &CancelSignal::new()).await?;
//! println!("{}", report.render());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod ledger;
pub mod lock;
pub mod migration;
pub mod prelude;
pub mod step;
pub mod store;
pub mod transforms;

// Re-export main types for convenience
pub use config::{IndexSettings, MigrationConfig, StoreConfig};
pub use core::{MigrateError, Result, SchemaVersion};
pub use ledger::{CheckpointLedger, CheckpointRecord, FileLedger, MemoryLedger};
pub use lock::{LockHolder, RunLock};
pub use migration::{
    CancelSignal, MigrationPlan, MigrationRun, Migrator, RunOutcome, RunReport, StepDisposition,
    StepOutcome, StepStatus, resolve_plan,
};
pub use step::{FnStep, MigrationStep, StepContext, StepError, StepRegistry, StepReport};
pub use store::{HttpStoreClient, MemoryStore, StoreClient, StoreError};
