use super::script::match_all;
use crate::core::{Result, SchemaVersion};
use crate::step::{MigrationStep, StepContext, StepError, StepReport};
use async_trait::async_trait;

/// Empties a rollover series: every `<prefix>-<item_type>-000NNN` index but
/// the newest is deleted, and the newest (the write index) is emptied so the
/// alias keeps pointing at a live index.
///
/// Destructive, so it is not part of the built-in steps.
#[derive(Debug, Clone)]
pub struct CleanRolloverIndicesStep {
    id: String,
    target_version: SchemaVersion,
    sequence: u32,
    item_type: String,
}

impl CleanRolloverIndicesStep {
    pub fn new(id: impl Into<String>, target_version: &str, item_type: impl Into<String>) -> Result<Self> {
        Ok(Self {
            id: id.into(),
            target_version: SchemaVersion::parse(target_version)?,
            sequence: 0,
            item_type: item_type.into(),
        })
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }
}

#[async_trait]
impl MigrationStep for CleanRolloverIndicesStep {
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
        format!("clean all {} rollover indices", self.item_type)
    }

    async fn apply(&self, ctx: &StepContext) -> std::result::Result<StepReport, StepError> {
        let prefix = format!("{}-000", ctx.index_name(&self.item_type));
        let mut indices = ctx.store().list_indices(&prefix).await?;
        indices.sort();

        let Some(write_index) = indices.pop() else {
            ctx.log(format!("no rollover index matches {}", prefix));
            return Ok(StepReport::default());
        };

        let mut affected = 0;
        for index in &indices {
            if ctx
                .mutate(format!("delete index {}", index), ctx.store().delete_index(index))
                .await?
                .is_some()
            {
                affected += 1;
            }
        }

        let emptied = ctx
            .mutate(
                format!("delete all documents of {}", write_index),
                ctx.store()
                    .delete_by_query(&write_index, &serde_json::json!({ "query": match_all() })),
            )
            .await?;
        if let Some(response) = emptied {
            affected += response.deleted;
        }

        Ok(StepReport::affected(affected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexSettings;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_keeps_only_an_empty_write_index() {
        let store = MemoryStore::new();
        for name in ["context-event-000002", "context-event-000001", "context-event-000003"] {
            store.seed_index(name, json!({}));
            store.seed_document(name, "e1", json!({"eventType": "view"}));
        }
        store.seed_index("context-eventalias", json!({}));
        let ctx = StepContext::new(Arc::new(store.clone()), IndexSettings::default());
        let step = CleanRolloverIndicesStep::new("clean-events", "3.0.0", "event").unwrap();

        let report = step.apply(&ctx).await.unwrap();

        assert_eq!(report.affected, 3);
        assert_eq!(store.indices(), vec!["context-event-000003", "context-eventalias"]);
        assert_eq!(store.document_count("context-event-000003"), 0);
    }

    #[tokio::test]
    async fn test_no_series_is_a_noop() {
        let store = MemoryStore::new();
        let ctx = StepContext::new(Arc::new(store.clone()), IndexSettings::default());
        let step = CleanRolloverIndicesStep::new("clean-events", "3.0.0", "event").unwrap();

        assert_eq!(step.apply(&ctx).await.unwrap(), StepReport::default());
        assert!(store.mutations().is_empty());
    }
}
