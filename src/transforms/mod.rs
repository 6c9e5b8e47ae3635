//! Reusable transformation steps and the steps shipped with this crate.

pub mod builtin;
pub mod create_index;
pub mod mapping;
pub mod reindex;
pub mod rollover;
pub mod script;
pub mod update_by_query;

pub use create_index::{CreateIndexStep, IndexLayout};
pub use mapping::PutMappingStep;
pub use reindex::{ReindexPhase, reindex_steps};
pub use rollover::CleanRolloverIndicesStep;
pub use update_by_query::ScriptUpdateStep;

use crate::core::SchemaVersion;

/// Schema version the built-in steps migrate data to.
pub const CURRENT_SCHEMA_VERSION: SchemaVersion = SchemaVersion::new(3, 0, 0);

pub fn current_version() -> SchemaVersion {
    CURRENT_SCHEMA_VERSION
}
