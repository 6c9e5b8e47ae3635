use super::script::painless;
use crate::core::{Result, SchemaVersion};
use crate::step::{MigrationStep, StepContext, StepError, StepReport};
use async_trait::async_trait;
use serde_json::{Value, json};

/// Runs a painless script over the documents of `<prefix>-<item_type>` matching `query`.
///
/// The query is the idempotence guard: it must exclude documents the script
/// already migrated, so a replay finds nothing left to do.
#[derive(Debug, Clone)]
pub struct ScriptUpdateStep {
    id: String,
    target_version: SchemaVersion,
    sequence: u32,
    item_type: String,
    query: Value,
    script: String,
    params: Option<Value>,
}

impl ScriptUpdateStep {
    pub fn new(
        id: impl Into<String>,
        target_version: &str,
        item_type: impl Into<String>,
        query: Value,
        script: &str,
    ) -> Result<Self> {
        Ok(Self {
            id: id.into(),
            target_version: SchemaVersion::parse(target_version)?,
            sequence: 0,
            item_type: item_type.into(),
            query,
            script: script.to_string(),
            params: None,
        })
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

#[async_trait]
impl MigrationStep for ScriptUpdateStep {
    fn id(&self) -> &str {
        &self.id
    }

    fn target_version(&self) -> SchemaVersion {
        self.target_version
    }

    fn sequence(&self) -> u32 {
        self.sequence
    }

    async fn apply(&self, ctx: &StepContext) -> std::result::Result<StepReport, StepError> {
        let index = ctx.index_name(&self.item_type);
        if !ctx.store().index_exists(&index).await? {
            ctx.log(format!("index {} does not exist, nothing to update", index));
            return Ok(StepReport::default());
        }

        let pending = ctx.store().count(&index, Some(&self.query)).await?;
        if pending == 0 {
            ctx.log(format!("no document of {} needs updating", index));
            return Ok(StepReport::default());
        }
        ctx.log(format!("{} document(s) of {} to update", pending, index));

        let body = json!({
            "query": self.query,
            "script": painless(&self.script, self.params.clone()),
        });
        let Some(response) = ctx
            .mutate(
                format!("update {} document(s) in {}", pending, index),
                ctx.store().update_by_query(&index, &body),
            )
            .await?
        else {
            return Ok(StepReport::default());
        };

        if !response.failures.is_empty() {
            return Err(StepError::Failed(format!(
                "{} document(s) of {} failed to update, first failure: {}",
                response.failures.len(),
                index,
                response.failures[0]
            )));
        }
        Ok(StepReport::affected(response.updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexSettings;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn step() -> ScriptUpdateStep {
        ScriptUpdateStep::new(
            "default-session-scope",
            "2.2.0",
            "session",
            json!({"bool": {"must_not": {"exists": {"field": "scope"}}}}),
            "// default scope\nctx._source.scope = params.set.scope;",
        )
        .unwrap()
        .with_params(json!({"set": {"scope": "systemscope"}}))
    }

    #[tokio::test]
    async fn test_updates_only_unmigrated_documents_and_replays_cleanly() {
        let store = MemoryStore::new();
        store.seed_index("context-session", json!({}));
        store.seed_document("context-session", "s1", json!({"profileId": "p1"}));
        store.seed_document("context-session", "s2", json!({"profileId": "p2", "scope": "digitall"}));
        let ctx = StepContext::new(Arc::new(store.clone()), IndexSettings::default());

        let report = step().apply(&ctx).await.unwrap();
        assert_eq!(report.affected, 1);
        assert_eq!(store.document("context-session", "s1").unwrap()["scope"], "systemscope");
        assert_eq!(store.document("context-session", "s2").unwrap()["scope"], "digitall");

        let replay = step().apply(&ctx).await.unwrap();
        assert_eq!(replay.affected, 0);
        assert_eq!(store.mutations().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_index_is_not_an_error() {
        let store = MemoryStore::new();
        let ctx = StepContext::new(Arc::new(store.clone()), IndexSettings::default());
        assert_eq!(step().apply(&ctx).await.unwrap(), StepReport::default());
    }
}
