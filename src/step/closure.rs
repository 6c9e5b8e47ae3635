use super::{MigrationStep, StepContext, StepError, StepReport};
use crate::core::{Result, SchemaVersion};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

pub type StepFuture<'a> = BoxFuture<'a, std::result::Result<StepReport, StepError>>;

type ApplyFn = dyn for<'a> Fn(&'a StepContext) -> StepFuture<'a> + Send + Sync;

/// A step whose `apply` is a closure.
///
/// ```ignore
/// let step = FnStep::new("drop-legacy-flag", "2.3.0", |ctx| {
///     async move {
///         let index = ctx.index_name("profile");
///         ctx.mutate("refresh", ctx.store().refresh(&index)).await?;
///         Ok(StepReport::default())
///     }
///     .boxed()
/// })?;
/// ```
#[derive(Clone)]
pub struct FnStep {
    id: String,
    target_version: SchemaVersion,
    sequence: u32,
    description: Option<String>,
    apply: Arc<ApplyFn>,
}

impl std::fmt::Debug for FnStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStep")
            .field("id", &self.id)
            .field("target_version", &self.target_version)
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl FnStep {
    pub fn new<F>(id: impl Into<String>, target_version: &str, apply: F) -> Result<Self>
    where
        F: for<'a> Fn(&'a StepContext) -> StepFuture<'a> + Send + Sync + 'static,
    {
        Ok(Self {
            id: id.into(),
            target_version: SchemaVersion::parse(target_version)?,
            sequence: 0,
            description: None,
            apply: Arc::new(apply),
        })
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[async_trait]
impl MigrationStep for FnStep {
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
        self.description.clone().unwrap_or_else(|| self.id.clone())
    }

    async fn apply(&self, ctx: &StepContext) -> std::result::Result<StepReport, StepError> {
        (self.apply)(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexSettings;
    use crate::core::MigrateError;
    use crate::store::MemoryStore;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_rejects_bad_version() {
        let err = FnStep::new("x", "two", |_| async { Ok(StepReport::default()) }.boxed())
            .unwrap_err();
        assert!(matches!(err, MigrateError::InvalidVersion(_)));
    }

    #[tokio::test]
    async fn test_closure_sees_context() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let step = FnStep::new("count-profiles", "2.0.0", move |ctx| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(StepReport::affected(1).with_note(ctx.index_name("profile")))
            }
            .boxed()
        })
        .unwrap()
        .with_sequence(3)
        .with_description("Count profiles");

        let ctx = StepContext::new(Arc::new(MemoryStore::new()), IndexSettings::default());
        let report = step.apply(&ctx).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.note.as_deref(), Some("context-profile"));
        assert_eq!(step.sequence(), 3);
        assert_eq!(step.description(), "Count profiles");
    }
}
