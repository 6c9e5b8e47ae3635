//! Single-run lease over a ledger directory.

use crate::core::{MigrateError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{Level, event};
use uuid::Uuid;

pub const LOCK_FILE_NAME: &str = "migration.lock";

/// Content of the lock file, shown to whoever finds the lock taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockHolder {
    pub run_id: Uuid,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl LockHolder {
    /// Whether the holding process still runs. Only Linux can tell; other
    /// platforms always answer yes.
    pub fn is_alive(&self) -> bool {
        if self.pid == std::process::id() {
            return true;
        }
        if cfg!(target_os = "linux") {
            Path::new("/proc").join(self.pid.to_string()).exists()
        } else {
            true
        }
    }
}

impl std::fmt::Display for LockHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "run {} (pid {}) since {}",
            self.run_id,
            self.pid,
            self.acquired_at.to_rfc3339()
        )
    }
}

/// Held for the whole run; the lock file is removed when the guard drops.
///
/// A process killed before dropping its guard leaves the file behind. On
/// Linux a lock whose holder pid is gone is taken over on the next acquire;
/// elsewhere the operator clears it with [`RunLock::force_release`].
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    holder: LockHolder,
}

impl RunLock {
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                MigrateError::IoError(format!("create lock directory {}: {}", parent.display(), err))
            })?;
        }

        match Self::create(path.clone()) {
            Err(MigrateError::AlreadyRunning { .. }) => {
                let stale = Self::read_holder(&path).filter(|holder| !holder.is_alive());
                let Some(stale) = stale else {
                    return Err(Self::contended(&path));
                };
                event!(
                    Level::WARN,
                    path = %path.display(),
                    stale_run_id = %stale.run_id,
                    stale_pid = stale.pid,
                    "taking over run lock left by a dead process"
                );
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => return Err(MigrateError::IoError(format!("remove stale lock: {}", err))),
                }
                Self::create(path)
            }
            other => other,
        }
    }

    fn create(path: PathBuf) -> Result<Self> {
        let mut file = match OpenOptions::new().create_new(true).write(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(Self::contended(&path));
            }
            Err(err) => {
                return Err(MigrateError::IoError(format!(
                    "create lock file {}: {}",
                    path.display(),
                    err
                )));
            }
        };

        let holder = LockHolder {
            run_id: Uuid::new_v4(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let written = serde_json::to_vec_pretty(&holder)
            .map_err(MigrateError::from)
            .and_then(|json| {
                file.write_all(&json)
                    .and_then(|_| file.sync_all())
                    .map_err(|err| MigrateError::IoError(format!("write lock file: {}", err)))
            });
        if let Err(err) = written {
            // The guard cannot recognise a file without a holder, so release it here.
            let _ = std::fs::remove_file(&path);
            return Err(err);
        }
        let lock = Self { path, holder };

        event!(
            Level::DEBUG,
            path = %lock.path.display(),
            run_id = %lock.holder.run_id,
            "run lock acquired"
        );
        Ok(lock)
    }

    fn contended(path: &Path) -> MigrateError {
        let holder = Self::read_holder(path)
            .map(|holder| holder.to_string())
            .unwrap_or_else(|| "unknown holder".to_string());
        MigrateError::AlreadyRunning {
            path: path.display().to_string(),
            holder,
        }
    }

    /// Reads who holds the lock at `path`, if anyone.
    pub fn read_holder(path: impl AsRef<Path>) -> Option<LockHolder> {
        let bytes = std::fs::read(path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Removes a stale lock file. Returns whether one existed.
    pub fn force_release(path: impl AsRef<Path>) -> Result<bool> {
        match std::fs::remove_file(path.as_ref()) {
            Ok(()) => {
                event!(Level::WARN, path = %path.as_ref().display(), "run lock force-released");
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(MigrateError::IoError(err.to_string())),
        }
    }

    pub fn holder(&self) -> &LockHolder {
        &self.holder
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // After a force-release the file may belong to another run.
        match Self::read_holder(&self.path) {
            Some(current) if current.run_id == self.holder.run_id => {
                let _ = std::fs::remove_file(&self.path);
            }
            Some(current) => {
                event!(
                    Level::WARN,
                    path = %self.path.display(),
                    run_id = %self.holder.run_id,
                    holder = %current,
                    "run lock now belongs to another run, leaving it in place"
                );
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_second_acquire_reports_holder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);

        let first = RunLock::acquire(&path).unwrap();
        let err = RunLock::acquire(&path).unwrap_err();
        match err {
            MigrateError::AlreadyRunning { holder, .. } => {
                assert!(holder.contains(&first.holder().run_id.to_string()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_drop_releases_the_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(LOCK_FILE_NAME);
        {
            let _lock = RunLock::acquire(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
        RunLock::acquire(&path).unwrap();
    }

    #[test]
    fn test_force_release_clears_stale_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        std::fs::write(&path, b"garbage").unwrap();

        assert!(RunLock::read_holder(&path).is_none());
        assert!(RunLock::acquire(&path).is_err());
        assert!(RunLock::force_release(&path).unwrap());
        assert!(!RunLock::force_release(&path).unwrap());
        assert!(RunLock::acquire(&path).is_ok());
    }

    #[test]
    fn test_dropping_a_released_guard_keeps_the_new_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);

        let old = RunLock::acquire(&path).unwrap();
        assert!(RunLock::force_release(&path).unwrap());
        let new = RunLock::acquire(&path).unwrap();
        drop(old);

        assert!(path.exists());
        assert_eq!(RunLock::read_holder(&path).unwrap().run_id, new.holder().run_id);
        assert!(RunLock::acquire(&path).is_err());
        drop(new);
        assert!(!path.exists());
    }

    #[test]
    fn test_live_holder_is_never_taken_over() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        let held = RunLock::acquire(&path).unwrap();

        assert!(held.holder().is_alive());
        assert!(matches!(
            RunLock::acquire(&path),
            Err(MigrateError::AlreadyRunning { .. })
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_lock_of_a_dead_process_is_taken_over() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        let dead = LockHolder {
            run_id: Uuid::new_v4(),
            // Above the kernel's pid_max, so no process has it.
            pid: u32::MAX,
            acquired_at: Utc::now(),
        };
        std::fs::write(&path, serde_json::to_vec(&dead).unwrap()).unwrap();

        let lock = RunLock::acquire(&path).unwrap();

        assert_ne!(lock.holder().run_id, dead.run_id);
        assert_eq!(RunLock::read_holder(&path).unwrap(), *lock.holder());
    }
}
