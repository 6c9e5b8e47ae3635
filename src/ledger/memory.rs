use super::{CheckpointLedger, CheckpointRecord, LedgerDocument};
use crate::core::{MigrateError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug)]
struct Inner {
    document: RwLock<LedgerDocument>,
    available: AtomicBool,
    writes_available: AtomicBool,
}

/// Process-local ledger. Clones share the same records.
#[derive(Debug, Clone)]
pub struct MemoryLedger {
    inner: Arc<Inner>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                document: RwLock::new(LedgerDocument::default()),
                available: AtomicBool::new(true),
                writes_available: AtomicBool::new(true),
            }),
        }
    }

    /// Simulates the backing storage going away (or coming back) for every call.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Simulates a storage that can still be read but no longer written.
    pub fn set_writes_available(&self, available: bool) {
        self.inner.writes_available.store(available, Ordering::SeqCst);
    }

    pub fn completed_ids(&self) -> Vec<String> {
        match self.inner.document.read() {
            Ok(document) => document.records.iter().map(|r| r.step_id.clone()).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn check_read(&self) -> Result<()> {
        if !self.inner.available.load(Ordering::SeqCst) {
            return Err(MigrateError::LedgerUnavailable(
                "in-memory ledger marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        self.check_read()?;
        if !self.inner.writes_available.load(Ordering::SeqCst) {
            return Err(MigrateError::LedgerUnavailable(
                "in-memory ledger rejects writes".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointLedger for MemoryLedger {
    async fn is_completed(&self, step_id: &str) -> Result<bool> {
        self.check_read()?;
        Ok(self.inner.document.read()?.contains(step_id))
    }

    async fn mark_completed(&self, step_id: &str, completed_at: DateTime<Utc>) -> Result<()> {
        self.check_write()?;
        self.inner.document.write()?.insert(CheckpointRecord {
            step_id: step_id.to_string(),
            completed_at,
        });
        Ok(())
    }

    async fn history(&self) -> Result<Vec<CheckpointRecord>> {
        self.check_read()?;
        Ok(self.inner.document.read()?.records.clone())
    }

    async fn forget(&self, step_id: &str) -> Result<bool> {
        self.check_write()?;
        Ok(self.inner.document.write()?.remove(step_id))
    }

    async fn purge(&self) -> Result<usize> {
        self.check_write()?;
        let mut document = self.inner.document.write()?;
        let removed = document.records.len();
        document.records.clear();
        Ok(removed)
    }
}
