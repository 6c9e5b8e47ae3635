use super::MigrationStep;
use crate::core::{MigrateError, Result, SchemaVersion};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{Level, event};

lazy_static! {
    static ref STEP_ID: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$").unwrap();
}

/// A step plus the position it was registered at, used to break ordering ties.
#[derive(Clone)]
pub struct RegisteredStep {
    pub step: Arc<dyn MigrationStep>,
    pub registration_index: usize,
}

impl std::fmt::Debug for RegisteredStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredStep")
            .field("id", &self.step.id())
            .field("target_version", &self.step.target_version())
            .field("sequence", &self.step.sequence())
            .field("registration_index", &self.registration_index)
            .finish()
    }
}

/// Explicit list of every step the binary knows about.
#[derive(Debug, Default, Clone)]
pub struct StepRegistry {
    steps: Vec<RegisteredStep>,
    ids: HashSet<String>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the steps shipped in this crate.
    pub fn with_builtin_steps() -> Result<Self> {
        let mut registry = Self::new();
        for step in crate::transforms::builtin::builtin_steps()? {
            registry.register_arc(step)?;
        }
        Ok(registry)
    }

    pub fn register<S>(&mut self, step: S) -> Result<()>
    where
        S: MigrationStep + 'static,
    {
        self.register_arc(Arc::new(step))
    }

    pub fn register_arc(&mut self, step: Arc<dyn MigrationStep>) -> Result<()> {
        let id = step.id().to_string();
        if !STEP_ID.is_match(&id) {
            return Err(MigrateError::InvalidStep(format!(
                "step id '{}' must be 1-128 characters of [A-Za-z0-9._-]",
                id
            )));
        }
        if !self.ids.insert(id.clone()) {
            return Err(MigrateError::DuplicateStep(id));
        }

        event!(
            Level::DEBUG,
            step_id = %id,
            target_version = %step.target_version(),
            sequence = step.sequence(),
            "migration step registered"
        );
        let registration_index = self.steps.len();
        self.steps.push(RegisteredStep {
            step,
            registration_index,
        });
        Ok(())
    }

    /// Fluent builder method to register a step.
    pub fn with_step<S>(mut self, step: S) -> Result<Self>
    where
        S: MigrationStep + 'static,
    {
        self.register(step)?;
        Ok(self)
    }

    pub fn steps(&self) -> &[RegisteredStep] {
        &self.steps
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.ids.contains(step_id)
    }

    /// Highest target version any registered step migrates to.
    pub fn latest_version(&self) -> Option<SchemaVersion> {
        self.steps
            .iter()
            .map(|registered| registered.step.target_version())
            .max()
    }
}
