use super::{CheckpointLedger, CheckpointRecord, LEDGER_FORMAT_VERSION, LedgerDocument};
use crate::core::{MigrateError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{Level, event};

pub const LEDGER_FILE_NAME: &str = "migration-history.json";

/// Ledger persisted as one JSON document, rewritten whole on every change.
///
/// The document is re-read on every call so an operator editing it between
/// runs (or a concurrent `--forget`) is always observed.
pub struct FileLedger {
    dir: PathBuf,
    path: PathBuf,
    write_guard: Mutex<()>,
}

impl FileLedger {
    /// Opens the ledger in `dir`, scoped to `tenant` when given.
    pub async fn open(dir: impl AsRef<Path>, tenant: Option<&str>) -> Result<Self> {
        let mut dir = dir.as_ref().to_path_buf();
        if let Some(tenant) = tenant {
            dir.push(tenant);
        }
        fs::create_dir_all(&dir).await.map_err(|err| {
            MigrateError::LedgerUnavailable(format!(
                "cannot create ledger directory '{}': {}",
                dir.display(),
                err
            ))
        })?;
        let path = dir.join(LEDGER_FILE_NAME);
        Ok(Self {
            dir,
            path,
            write_guard: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn unavailable(&self, action: &str, err: impl std::fmt::Display) -> MigrateError {
        MigrateError::LedgerUnavailable(format!(
            "{} '{}': {}",
            action,
            self.path.display(),
            err
        ))
    }

    async fn read_document(&self) -> Result<LedgerDocument> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                if fs::metadata(&self.dir).await.is_err() {
                    return Err(self.unavailable("ledger directory vanished for", err));
                }
                return Ok(LedgerDocument::default());
            }
            Err(err) => return Err(self.unavailable("cannot read", err)),
        };

        let document: LedgerDocument = serde_json::from_slice(&bytes)
            .map_err(|err| self.unavailable("corrupt ledger document", err))?;
        if document.format_version != LEDGER_FORMAT_VERSION {
            return Err(self.unavailable(
                "unsupported ledger format",
                format!("version {}", document.format_version),
            ));
        }
        Ok(document)
    }

    /// Writes to a temporary sibling, syncs it, then renames over the ledger.
    async fn write_document(&self, document: &LedgerDocument) -> Result<()> {
        let json = serde_json::to_vec_pretty(document)?;
        let tmp_path = self.path.with_extension("json.tmp");

        let mut tmp = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .await
            .map_err(|err| self.unavailable("cannot write", err))?;
        tmp.write_all(&json)
            .await
            .map_err(|err| self.unavailable("cannot write", err))?;
        tmp.sync_all()
            .await
            .map_err(|err| self.unavailable("cannot sync", err))?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|err| self.unavailable("cannot replace", err))?;

        #[cfg(unix)]
        {
            // Persist the rename itself.
            if let Ok(dir) = fs::File::open(&self.dir).await {
                let _ = dir.sync_all().await;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl CheckpointLedger for FileLedger {
    async fn is_completed(&self, step_id: &str) -> Result<bool> {
        Ok(self.read_document().await?.contains(step_id))
    }

    async fn mark_completed(&self, step_id: &str, completed_at: DateTime<Utc>) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        let mut document = self.read_document().await?;
        let inserted = document.insert(CheckpointRecord {
            step_id: step_id.to_string(),
            completed_at,
        });
        if !inserted {
            return Ok(());
        }
        self.write_document(&document).await?;
        event!(Level::DEBUG, step_id, path = %self.path.display(), "checkpoint recorded");
        Ok(())
    }

    async fn history(&self) -> Result<Vec<CheckpointRecord>> {
        Ok(self.read_document().await?.records)
    }

    async fn forget(&self, step_id: &str) -> Result<bool> {
        let _guard = self.write_guard.lock().await;
        let mut document = self.read_document().await?;
        if !document.remove(step_id) {
            return Ok(false);
        }
        self.write_document(&document).await?;
        event!(Level::WARN, step_id, "checkpoint removed by operator");
        Ok(true)
    }

    async fn purge(&self) -> Result<usize> {
        let _guard = self.write_guard.lock().await;
        let mut document = self.read_document().await?;
        let removed = document.records.len();
        if removed == 0 {
            return Ok(0);
        }
        document.records.clear();
        self.write_document(&document).await?;
        event!(Level::WARN, removed, "ledger history purged by operator");
        Ok(removed)
    }
}
