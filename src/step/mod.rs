//! The contract every migration step implements, and the context it runs in.

pub mod closure;
pub mod registry;

pub use closure::{FnStep, StepFuture};
pub use registry::{RegisteredStep, StepRegistry};

use crate::config::IndexSettings;
use crate::core::SchemaVersion;
use crate::store::{StoreClient, StoreError, StoreResult};
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{Level, event};

/// Why a step's `apply` gave up. The message ends up verbatim in the run log.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    #[error("{0}")]
    Failed(String),

    #[error("store call failed: {0}")]
    Store(#[from] StoreError),

    #[error("precondition not met: {0}")]
    Invalid(String),
}

impl StepError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// What a step reports back on success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    /// Documents or indices touched
    pub affected: u64,
    pub note: Option<String>,
}

impl StepReport {
    pub fn affected(affected: u64) -> Self {
        Self {
            affected,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// A unit of migration work.
///
/// The executor may call `apply` more than once for the same id (a crash
/// between `apply` and the checkpoint write replays it), so implementations
/// must be idempotent or check the store before acting.
#[async_trait]
pub trait MigrationStep: Send + Sync {
    /// Stable id; it is the checkpoint key, so renaming it replays the step.
    fn id(&self) -> &str;

    fn target_version(&self) -> SchemaVersion;

    /// Position among steps of the same target version.
    fn sequence(&self) -> u32 {
        0
    }

    fn description(&self) -> String {
        self.id().to_string()
    }

    async fn apply(&self, ctx: &StepContext) -> Result<StepReport, StepError>;
}

/// Everything a step may use while applying.
pub struct StepContext {
    store: Arc<dyn StoreClient>,
    dry_run: bool,
    index: IndexSettings,
    tenant: Option<String>,
    lines: Mutex<Vec<String>>,
}

impl StepContext {
    pub fn new(store: Arc<dyn StoreClient>, index: IndexSettings) -> Self {
        Self {
            store,
            dry_run: false,
            index,
            tenant: None,
            lines: Mutex::new(Vec::new()),
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn tenant(mut self, tenant: Option<String>) -> Self {
        self.tenant = tenant;
        self
    }

    pub fn store(&self) -> &dyn StoreClient {
        self.store.as_ref()
    }

    pub fn shared_store(&self) -> Arc<dyn StoreClient> {
        Arc::clone(&self.store)
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn index_settings(&self) -> &IndexSettings {
        &self.index
    }

    pub fn tenant_scope(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    /// `<prefix>-<item_type>`
    pub fn index_name(&self, item_type: &str) -> String {
        self.index.index_name(item_type)
    }

    /// Records a progress line for the run report and the trace log.
    pub fn log(&self, line: impl Into<String>) {
        let line = line.into();
        event!(Level::INFO, tenant = self.tenant.as_deref(), "{}", line);
        match self.lines.lock() {
            Ok(mut lines) => lines.push(line),
            Err(poisoned) => poisoned.into_inner().push(line),
        }
    }

    /// Drains the lines logged since the last call.
    pub fn take_log(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(mut lines) => std::mem::take(&mut *lines),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    /// Runs a store mutation, or only describes it in dry-run mode.
    ///
    /// In dry-run the future is dropped without being polled, so nothing is
    /// sent to the store. Returns `None` in that case.
    pub async fn mutate<T, F>(&self, action: impl Into<String>, operation: F) -> StoreResult<Option<T>>
    where
        F: Future<Output = StoreResult<T>> + Send,
    {
        let action = action.into();
        if self.dry_run {
            self.log(format!("would {}", action));
            return Ok(None);
        }
        let value = operation.await?;
        self.log(action);
        Ok(Some(value))
    }
}
