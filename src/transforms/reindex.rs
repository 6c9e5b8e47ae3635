//! Rebuilding an index with new mappings by way of a read-only clone.
//!
//! The work is split into four steps, each checkpointed on its own, so a
//! crash resumes at the phase that was interrupted:
//!
//! 1. `clone`: make the index read-only and clone it to `<index>-cloned`
//! 2. `recreate`: drop the index, recreate it with the new body and reindex
//!    the clone into it
//! 3. `delete-clone`: drop the clone
//! 4. `refresh`: refresh the index and wait for the cluster to be yellow

use super::script::{index_creation_body, painless, read_only_settings, reindex_body};
use crate::core::{Result, SchemaVersion};
use crate::step::{MigrationStep, StepContext, StepError, StepReport};
use crate::store::HealthStatus;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const CLONE_SUFFIX: &str = "-cloned";
const HEALTH_WAIT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReindexPhase {
    Clone,
    Recreate,
    DeleteClone,
    Refresh,
}

impl ReindexPhase {
    pub const ALL: [ReindexPhase; 4] = [
        ReindexPhase::Clone,
        ReindexPhase::Recreate,
        ReindexPhase::DeleteClone,
        ReindexPhase::Refresh,
    ];

    fn suffix(&self) -> &'static str {
        match self {
            Self::Clone => "clone",
            Self::Recreate => "recreate",
            Self::DeleteClone => "delete-clone",
            Self::Refresh => "refresh",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Clone => "clone creation",
            Self::Recreate => "recreate the index and reindex",
            Self::DeleteClone => "delete clone",
            Self::Refresh => "refresh at the end",
        }
    }
}

#[derive(Debug)]
struct ReindexSpec {
    item_type: String,
    mappings: Value,
    script: Option<String>,
    monthly: bool,
}

#[derive(Debug, Clone)]
struct ReindexPhaseStep {
    id: String,
    target_version: SchemaVersion,
    sequence: u32,
    phase: ReindexPhase,
    spec: Arc<ReindexSpec>,
}

/// Builds the four phase steps rebuilding `<prefix>-<item_type>`.
///
/// Ids are `<id_prefix>-<phase>` and sequences `first_sequence..first_sequence + 4`.
pub fn reindex_steps(
    id_prefix: &str,
    target_version: &str,
    first_sequence: u32,
    item_type: &str,
    mappings: Value,
    script: Option<&str>,
    monthly: bool,
) -> Result<Vec<Arc<dyn MigrationStep>>> {
    let target_version = SchemaVersion::parse(target_version)?;
    let spec = Arc::new(ReindexSpec {
        item_type: item_type.to_string(),
        mappings,
        script: script.map(str::to_string),
        monthly,
    });

    Ok(ReindexPhase::ALL
        .iter()
        .zip(first_sequence..)
        .map(|(phase, sequence)| {
            Arc::new(ReindexPhaseStep {
                id: format!("{}-{}", id_prefix, phase.suffix()),
                target_version,
                sequence,
                phase: *phase,
                spec: Arc::clone(&spec),
            }) as Arc<dyn MigrationStep>
        })
        .collect())
}

impl ReindexPhaseStep {
    async fn clone_index(&self, ctx: &StepContext, index: &str, clone: &str) -> std::result::Result<u64, StepError> {
        let store = ctx.store();
        if !store.index_exists(index).await? {
            ctx.log(format!("index {} does not exist, nothing to reindex", index));
            return Ok(0);
        }
        // A clone left by an interrupted attempt may be partial.
        if store.index_exists(clone).await? {
            ctx.mutate(format!("delete stale clone {}", clone), store.delete_index(clone))
                .await?;
        }
        ctx.mutate(
            format!("set {} read-only", index),
            store.put_settings(index, &read_only_settings()),
        )
        .await?;
        ctx.mutate(
            format!("clone {} to {}", index, clone),
            store.clone_index(index, clone),
        )
        .await?;
        Ok(1)
    }

    async fn recreate(&self, ctx: &StepContext, index: &str, clone: &str) -> std::result::Result<u64, StepError> {
        let store = ctx.store();
        let index_exists = store.index_exists(index).await?;
        // Without the clone, dropping the index would lose its documents.
        if !store.index_exists(clone).await? {
            if !index_exists {
                ctx.log(format!("neither {} nor {} exist, nothing to reindex", index, clone));
                return Ok(0);
            }
            if ctx.is_dry_run() {
                ctx.log(format!("clone {} would exist after the clone phase", clone));
            } else {
                return Err(StepError::Invalid(format!(
                    "clone {} is missing, refusing to drop {}",
                    clone, index
                )));
            }
        }

        if index_exists {
            ctx.mutate(format!("delete index {}", index), store.delete_index(index))
                .await?;
        }
        let body = index_creation_body(ctx.index_settings(), self.spec.mappings.clone(), self.spec.monthly);
        ctx.mutate(
            format!("recreate index {}", index),
            store.create_index(index, &body),
        )
        .await?;

        let script = self.spec.script.as_deref().map(|source| painless(source, None));
        let response = ctx
            .mutate(
                format!("reindex {} into {}", clone, index),
                store.reindex(&reindex_body(clone, index, script.as_ref())),
            )
            .await?;

        match response {
            Some(response) if !response.failures.is_empty() => Err(StepError::Failed(format!(
                "reindex of {} reported {} failure(s), first: {}",
                index,
                response.failures.len(),
                response.failures[0]
            ))),
            Some(response) => Ok(response.created + response.updated),
            None => Ok(0),
        }
    }

    async fn delete_clone(&self, ctx: &StepContext, clone: &str) -> std::result::Result<u64, StepError> {
        let store = ctx.store();
        if !store.index_exists(clone).await? {
            ctx.log(format!("clone {} already gone", clone));
            return Ok(0);
        }
        ctx.mutate(format!("delete clone {}", clone), store.delete_index(clone))
            .await?;
        Ok(1)
    }

    async fn refresh(&self, ctx: &StepContext, index: &str) -> std::result::Result<u64, StepError> {
        let store = ctx.store();
        if !store.index_exists(index).await? {
            ctx.log(format!("index {} does not exist, nothing to refresh", index));
            return Ok(0);
        }
        ctx.mutate(format!("refresh {}", index), store.refresh(index))
            .await?;
        let health = store.wait_for_status(HealthStatus::Yellow, HEALTH_WAIT).await?;
        ctx.log(format!("cluster status is {}", health.status.as_str()));
        Ok(0)
    }
}

#[async_trait]
impl MigrationStep for ReindexPhaseStep {
    fn id(&self) -> &str {
        &self.id
    }

    fn target_version(&self) -> SchemaVersion {
        self.target_version
    }

    fn sequence(&self) -> u32 {
        self.sequence
    }

    fn description(&self) -> String {
        format!("reindex {} ({})", self.spec.item_type, self.phase.label())
    }

    async fn apply(&self, ctx: &StepContext) -> std::result::Result<StepReport, StepError> {
        let index = ctx.index_name(&self.spec.item_type);
        if index.ends_with(CLONE_SUFFIX) {
            return Err(StepError::Invalid(format!("refusing to reindex clone {}", index)));
        }
        let clone = format!("{}{}", index, CLONE_SUFFIX);

        let affected = match self.phase {
            ReindexPhase::Clone => self.clone_index(ctx, &index, &clone).await?,
            ReindexPhase::Recreate => self.recreate(ctx, &index, &clone).await?,
            ReindexPhase::DeleteClone => self.delete_clone(ctx, &clone).await?,
            ReindexPhase::Refresh => self.refresh(ctx, &index).await?,
        };
        Ok(StepReport::affected(affected))
    }
}
