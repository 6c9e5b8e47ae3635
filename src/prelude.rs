//! Recommended imports grouped by who is writing the code.
//!
//! `steps` is what a migration step author needs.
//! `operator` is what an embedding binary needs to run and inspect migrations.

pub mod steps {
    //! Writing migration steps.
    //!
    //! Typical step code:
    //! - implement [`MigrationStep`] or wrap an async closure in [`FnStep`],
    //! - talk to the store through [`StepContext::store`],
    //! - wrap every write in [`StepContext::mutate`] so dry-runs stay pure.
    pub use crate::step::{FnStep, MigrationStep, StepContext, StepError, StepFuture, StepReport};
    pub use crate::store::{StoreClient, StoreError, StoreResult};
    pub use crate::transforms::script::{match_all, painless, strip_comments};
    pub use crate::transforms::{
        CleanRolloverIndicesStep, CreateIndexStep, IndexLayout, PutMappingStep, ScriptUpdateStep,
        reindex_steps,
    };
}

pub mod operator {
    //! Running, rehearsing and repairing migrations.
    pub use crate::config::MigrationConfig;
    pub use crate::ledger::{CheckpointLedger, FileLedger};
    pub use crate::migration::{CancelSignal, Migrator, RunOutcome, RunReport};
    pub use crate::step::StepRegistry;
}
