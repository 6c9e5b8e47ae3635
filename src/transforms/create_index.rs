use super::script::{index_creation_body, rollover_index_body, rollover_policy_body};
use crate::core::{Result, SchemaVersion};
use crate::step::{MigrationStep, StepContext, StepError, StepReport};
use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexLayout {
    Plain,
    /// Time-based data (events, sessions) using the monthly settings.
    Monthly,
    /// First `-000001` index behind a write alias, with a rollover policy.
    Rollover,
}

/// Creates `<prefix>-<item_type>` unless it already exists.
#[derive(Debug, Clone)]
pub struct CreateIndexStep {
    id: String,
    target_version: SchemaVersion,
    sequence: u32,
    item_type: String,
    mappings: Value,
    layout: IndexLayout,
}

impl CreateIndexStep {
    pub fn new(
        id: impl Into<String>,
        target_version: &str,
        item_type: impl Into<String>,
        mappings: Value,
    ) -> Result<Self> {
        Ok(Self {
            id: id.into(),
            target_version: SchemaVersion::parse(target_version)?,
            sequence: 0,
            item_type: item_type.into(),
            mappings,
            layout: IndexLayout::Plain,
        })
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_layout(mut self, layout: IndexLayout) -> Self {
        self.layout = layout;
        self
    }
}

#[async_trait]
impl MigrationStep for CreateIndexStep {
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
        format!("create index for {}", self.item_type)
    }

    async fn apply(&self, ctx: &StepContext) -> std::result::Result<StepReport, StepError> {
        let alias = ctx.index_name(&self.item_type);
        let settings = ctx.index_settings();

        let (index, body) = match self.layout {
            IndexLayout::Plain => (
                alias.clone(),
                index_creation_body(settings, self.mappings.clone(), false),
            ),
            IndexLayout::Monthly => (
                alias.clone(),
                index_creation_body(settings, self.mappings.clone(), true),
            ),
            IndexLayout::Rollover => {
                let policy = format!("{}-rollover-policy", alias);
                (
                    format!("{}-000001", alias),
                    rollover_index_body(settings, self.mappings.clone(), &policy, &alias),
                )
            }
        };

        if self.layout == IndexLayout::Rollover {
            let policy = format!("{}-rollover-policy", alias);
            ctx.mutate(
                format!("put lifecycle policy {}", policy),
                ctx.store()
                    .put_lifecycle_policy(&policy, &rollover_policy_body(settings)),
            )
            .await?;
        }

        if ctx.store().index_exists(&index).await? {
            ctx.log(format!("index {} already exists", index));
            return Ok(StepReport::default());
        }

        match ctx
            .mutate(
                format!("create index {}", index),
                ctx.store().create_index(&index, &body),
            )
            .await
        {
            Ok(created) => Ok(StepReport::affected(created.map_or(0, |_| 1))),
            // Lost a race with another writer; the index is there, which is all we want.
            Err(err) if err.is_already_exists() => {
                ctx.log(format!("index {} already exists", index));
                Ok(StepReport::default())
            }
            Err(err) => Err(err.into()),
        }
    }
}
