use crate::core::{MigrateError, Result, SchemaVersion};
use crate::step::{MigrationStep, RegisteredStep, StepRegistry};
use std::fmt::Write as _;
use std::sync::Arc;

/// Ordered, immutable list of steps taking the data from `from` to `to`.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    from: SchemaVersion,
    to: SchemaVersion,
    steps: Vec<RegisteredStep>,
}

impl MigrationPlan {
    pub fn from_version(&self) -> SchemaVersion {
        self.from
    }

    pub fn to_version(&self) -> SchemaVersion {
        self.to
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn steps(&self) -> impl Iterator<Item = &Arc<dyn MigrationStep>> {
        self.steps.iter().map(|registered| &registered.step)
    }

    pub fn step_ids(&self) -> Vec<String> {
        self.steps().map(|step| step.id().to_string()).collect()
    }

    /// Lists the steps grouped by release line:
    ///
    /// ```text
    /// From 2.0.0:
    /// - create-profile-alias
    /// From 2.2.0:
    /// - ...
    /// ```
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let mut current_line: Option<SchemaVersion> = None;
        for step in self.steps() {
            let line = step.target_version().release_line();
            if current_line != Some(line) {
                let _ = writeln!(out, "From {}:", line);
                current_line = Some(line);
            }
            let description = step.description();
            if description == step.id() {
                let _ = writeln!(out, "- {}", step.id());
            } else {
                let _ = writeln!(out, "- {} ({})", step.id(), description);
            }
        }
        out
    }
}

/// Resolves the plan for upgrading data at `from` to `current`.
///
/// Selects every step with `from < target_version <= current`, ordered by
/// target version, then sequence, then registration order. Pure.
pub fn resolve_plan(from: &str, current: &str, registry: &StepRegistry) -> Result<MigrationPlan> {
    let from = SchemaVersion::parse(from)?;
    let current = SchemaVersion::parse(current)?;
    resolve_plan_between(from, current, registry)
}

pub fn resolve_plan_between(
    from: SchemaVersion,
    current: SchemaVersion,
    registry: &StepRegistry,
) -> Result<MigrationPlan> {
    if from > current {
        return Err(MigrateError::InvalidVersion(format!(
            "cannot migrate down from {} to {}",
            from, current
        )));
    }

    let mut steps: Vec<RegisteredStep> = registry
        .steps()
        .iter()
        .filter(|registered| {
            let target = registered.step.target_version();
            from < target && target <= current
        })
        .cloned()
        .collect();

    steps.sort_by(|a, b| {
        (a.step.target_version(), a.step.sequence(), a.registration_index).cmp(&(
            b.step.target_version(),
            b.step.sequence(),
            b.registration_index,
        ))
    });

    Ok(MigrationPlan {
        from,
        to: current,
        steps,
    })
}
