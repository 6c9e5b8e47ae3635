use crate::core::{Result, SchemaVersion};
use crate::step::{MigrationStep, StepContext, StepError, StepReport};
use async_trait::async_trait;
use serde_json::Value;

/// Adds fields to the mapping of `<prefix>-<item_type>` and of every index
/// named `<prefix>-<item_type>-*` (monthly and rollover indices included).
///
/// Putting an additive mapping twice is a no-op on the store side.
#[derive(Debug, Clone)]
pub struct PutMappingStep {
    id: String,
    target_version: SchemaVersion,
    sequence: u32,
    item_type: String,
    mapping: Value,
}

impl PutMappingStep {
    pub fn new(
        id: impl Into<String>,
        target_version: &str,
        item_type: impl Into<String>,
        mapping: Value,
    ) -> Result<Self> {
        Ok(Self {
            id: id.into(),
            target_version: SchemaVersion::parse(target_version)?,
            sequence: 0,
            item_type: item_type.into(),
            mapping,
        })
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }
}

#[async_trait]
impl MigrationStep for PutMappingStep {
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
        format!("update {} mappings", self.item_type)
    }

    async fn apply(&self, ctx: &StepContext) -> std::result::Result<StepReport, StepError> {
        let base = ctx.index_name(&self.item_type);
        let indices: Vec<String> = ctx
            .store()
            .list_indices(&base)
            .await?
            .into_iter()
            .filter(|name| in_family(&base, name) && !name.ends_with("-cloned"))
            .collect();

        if indices.is_empty() {
            ctx.log(format!("no index matches {}", base));
            return Ok(StepReport::default());
        }

        let mut affected = 0;
        for index in &indices {
            let done = ctx
                .mutate(
                    format!("put mapping on {}", index),
                    ctx.store().put_mapping(index, &self.mapping),
                )
                .await?;
            if done.is_some() {
                affected += 1;
            }
        }
        Ok(StepReport::affected(affected))
    }
}

/// `base` itself or one of its `base-*` indices, not a longer item type
/// sharing the prefix (`profile` vs `profilealias`).
pub(crate) fn in_family(base: &str, name: &str) -> bool {
    name.strip_prefix(base)
        .map_or(false, |rest| rest.is_empty() || rest.starts_with('-'))
}
