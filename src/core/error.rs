use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Another migration run holds the lock at '{path}' ({holder})")]
    AlreadyRunning { path: String, holder: String },

    #[error("Checkpoint ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("Step '{step_id}' failed: {cause}")]
    StepFailed { step_id: String, cause: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Duplicate migration step id '{0}'")]
    DuplicateStep(String),

    #[error("Invalid migration step: {0}")]
    InvalidStep(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Run cancelled before step '{0}'")]
    Cancelled(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl MigrateError {
    /// Process exit code the CLI reports for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::AlreadyRunning { .. } => 2,
            Self::InvalidVersion(_) | Self::Config(_) => 3,
            Self::Cancelled(_) => 4,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, MigrateError>;

impl<T> From<std::sync::PoisonError<T>> for MigrateError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for MigrateError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_distinguish_contention_and_bad_input() {
        let contention = MigrateError::AlreadyRunning {
            path: "/tmp/x.lock".into(),
            holder: "run 1".into(),
        };
        assert_eq!(contention.exit_code(), 2);
        assert_eq!(MigrateError::InvalidVersion("x".into()).exit_code(), 3);
        assert_eq!(
            MigrateError::StepFailed {
                step_id: "1.0.0-01-a".into(),
                cause: "boom".into()
            }
            .exit_code(),
            1
        );
    }

    #[test]
    fn poisoned_mutex_maps_to_lock_error() {
        let mutex = std::sync::Arc::new(std::sync::Mutex::new(0));
        let clone = mutex.clone();
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("poison");
        })
        .join();

        let err: MigrateError = mutex.lock().unwrap_err().into();
        assert!(matches!(err, MigrateError::LockError(_)));
    }
}
