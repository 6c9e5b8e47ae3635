use super::cancel::CancelSignal;
use super::executor::MigrationRun;
use super::plan::{MigrationPlan, resolve_plan_between};
use super::report::RunReport;
use crate::config::{IndexSettings, MigrationConfig};
use crate::core::{Result, SchemaVersion};
use crate::ledger::{CheckpointLedger, CheckpointRecord, FileLedger};
use crate::lock::{LOCK_FILE_NAME, RunLock};
use crate::step::{StepContext, StepRegistry};
use crate::store::{HttpStoreClient, StoreClient};
use crate::transforms::current_version;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, event};

/// Entry point tying registry, store, ledger and run lock together.
///
/// # Example
///
/// ```ignore
/// let config = MigrationConfig::load("migrate.json")?.apply_env()?;
/// let migrator = Migrator::from_config(&config, StepRegistry::with_builtin_steps()?).await?;
/// let report = migrator.run("1.6.0", false, &CancelSignal::on_ctrl_c()).await?;
/// println!("{}", report.render());
/// ```
pub struct Migrator {
    registry: StepRegistry,
    store: Arc<dyn StoreClient>,
    ledger: Arc<dyn CheckpointLedger>,
    lock_path: Option<PathBuf>,
    current_version: SchemaVersion,
    index: IndexSettings,
    tenant: Option<String>,
    recover_from_history: bool,
}

impl Migrator {
    pub fn new(
        registry: StepRegistry,
        store: Arc<dyn StoreClient>,
        ledger: Arc<dyn CheckpointLedger>,
    ) -> Self {
        Self {
            registry,
            store,
            ledger,
            lock_path: None,
            current_version: current_version(),
            index: IndexSettings::default(),
            tenant: None,
            recover_from_history: true,
        }
    }

    /// Builds the HTTP store client, the file ledger and the lock path from `config`.
    pub async fn from_config(config: &MigrationConfig, registry: StepRegistry) -> Result<Self> {
        config.validate()?;
        let store = HttpStoreClient::new(&config.store)?;
        let ledger = FileLedger::open(&config.ledger_dir, config.tenant.as_deref()).await?;
        let lock_path = ledger.dir().join(LOCK_FILE_NAME);

        event!(
            Level::INFO,
            store = %store.base_url(),
            ledger = %ledger.path().display(),
            tenant = config.tenant.as_deref(),
            "migrator configured"
        );

        let mut migrator = Self::new(registry, Arc::new(store), Arc::new(ledger))
            .with_lock_path(lock_path)
            .with_index_settings(config.index.clone())
            .with_recover_from_history(config.recover_from_history);
        migrator.tenant = config.tenant.clone();
        Ok(migrator)
    }

    /// Guard every run with a lock file at `path`.
    pub fn with_lock_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_path = Some(path.into());
        self
    }

    /// Override the version the data is migrated to.
    pub fn with_current_version(mut self, version: SchemaVersion) -> Self {
        self.current_version = version;
        self
    }

    pub fn with_index_settings(mut self, index: IndexSettings) -> Self {
        self.index = index;
        self
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn with_recover_from_history(mut self, recover: bool) -> Self {
        self.recover_from_history = recover;
        self
    }

    pub fn current_version(&self) -> SchemaVersion {
        self.current_version
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    pub fn lock_path(&self) -> Option<&Path> {
        self.lock_path.as_deref()
    }

    pub fn plan(&self, from: &str) -> Result<MigrationPlan> {
        let from = SchemaVersion::parse(from)?;
        resolve_plan_between(from, self.current_version, &self.registry)
    }

    /// Migrates data at version `from` to the current version.
    ///
    /// Invalid input and lock contention are returned as errors before any
    /// store call. Once steps start, the outcome (including failures) is in
    /// the returned report; use [`RunReport::into_result`] to turn it into an error.
    pub async fn run(&self, from: &str, dry_run: bool, cancel: &CancelSignal) -> Result<RunReport> {
        let from = SchemaVersion::parse(from)?;
        let _lock = match &self.lock_path {
            Some(path) => Some(RunLock::acquire(path)?),
            None => None,
        };
        let plan = resolve_plan_between(from, self.current_version, &self.registry)?;

        if !self.recover_from_history && !dry_run && !plan.is_empty() {
            let purged = self.ledger.purge().await?;
            event!(Level::WARN, purged, "history recovery disabled, replaying every step");
        }

        event!(
            Level::INFO,
            from = %plan.from_version(),
            to = %plan.to_version(),
            steps = plan.len(),
            dry_run,
            "starting migration run"
        );

        let ctx = StepContext::new(Arc::clone(&self.store), self.index.clone())
            .dry_run(dry_run)
            .tenant(self.tenant.clone());
        let report = MigrationRun::new(&plan, self.ledger.as_ref(), &ctx)
            .execute(cancel)
            .await;

        event!(Level::INFO, outcome = ?report.outcome, "migration run finished");
        Ok(report)
    }

    pub async fn history(&self) -> Result<Vec<CheckpointRecord>> {
        self.ledger.history().await
    }

    /// Operator command: drop one checkpoint so the step replays next run.
    pub async fn forget(&self, step_id: &str) -> Result<bool> {
        let _lock = self.lock_for_maintenance()?;
        self.ledger.forget(step_id).await
    }

    /// Operator command: drop every checkpoint.
    pub async fn purge_history(&self) -> Result<usize> {
        let _lock = self.lock_for_maintenance()?;
        self.ledger.purge().await
    }

    /// Operator command: remove the run lock whatever its holder. Only for
    /// a lock the stale check cannot clear, such as a garbled lock file.
    pub fn force_unlock(&self) -> Result<bool> {
        match &self.lock_path {
            Some(path) => RunLock::force_release(path),
            None => Ok(false),
        }
    }

    fn lock_for_maintenance(&self) -> Result<Option<RunLock>> {
        self.lock_path.as_ref().map(RunLock::acquire).transpose()
    }

    /// Every registered step up to the current version, grouped by release line.
    pub fn describe_available(&self) -> String {
        match resolve_plan_between(SchemaVersion::new(0, 0, 0), self.current_version, &self.registry) {
            Ok(plan) => plan.describe(),
            Err(err) => err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MigrateError;
    use crate::ledger::MemoryLedger;
    use crate::migration::report::RunOutcome;
    use crate::step::{FnStep, StepReport};
    use crate::store::MemoryStore;
    use futures::FutureExt;
    use tempfile::tempdir;

    fn registry() -> StepRegistry {
        StepRegistry::new()
            .with_step(FnStep::new("a", "2.0.0", |_| async { Ok(StepReport::default()) }.boxed()).unwrap())
            .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_version_touches_nothing() {
        let store = MemoryStore::new();
        let migrator = Migrator::new(registry(), Arc::new(store.clone()), Arc::new(MemoryLedger::new()));
        let err = migrator
            .run("2.x", false, &CancelSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::InvalidVersion(_)));
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn test_contended_lock_is_reported() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join(LOCK_FILE_NAME);
        let _held = RunLock::acquire(&lock_path).unwrap();

        let migrator = Migrator::new(registry(), Arc::new(MemoryStore::new()), Arc::new(MemoryLedger::new()))
            .with_lock_path(&lock_path)
            .with_current_version(SchemaVersion::new(2, 0, 0));
        let err = migrator
            .run("1.0.0", false, &CancelSignal::new())
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_disabled_recovery_replays_everything() {
        let ledger = MemoryLedger::new();
        let migrator = Migrator::new(registry(), Arc::new(MemoryStore::new()), Arc::new(ledger.clone()))
            .with_current_version(SchemaVersion::new(2, 0, 0));
        migrator.run("1.0.0", false, &CancelSignal::new()).await.unwrap();

        let replaying = Migrator::new(registry(), Arc::new(MemoryStore::new()), Arc::new(ledger.clone()))
            .with_current_version(SchemaVersion::new(2, 0, 0))
            .with_recover_from_history(false);
        let report = replaying.run("1.0.0", false, &CancelSignal::new()).await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Succeeded { applied: 1, skipped: 0 });
    }

    #[tokio::test]
    async fn test_from_config_scopes_ledger_and_lock_by_tenant() {
        let dir = tempdir().unwrap();
        let config = MigrationConfig::default()
            .ledger_dir(dir.path())
            .tenant("acme");
        let migrator = Migrator::from_config(&config, registry()).await.unwrap();
        assert_eq!(
            migrator.lock_path(),
            Some(dir.path().join("acme").join(LOCK_FILE_NAME).as_path())
        );
        assert!(migrator.describe_available().contains("- a"));
    }
}
