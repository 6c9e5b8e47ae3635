//! Durable record of which migration steps have completed.
//!
//! The ledger is the only source of truth for recovery: a step id present in
//! the ledger is never applied again by the executor.

pub mod file;
pub mod memory;

pub use file::FileLedger;
pub use memory::MemoryLedger;

use crate::core::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub step_id: String,
    pub completed_at: DateTime<Utc>,
}

#[async_trait]
pub trait CheckpointLedger: Send + Sync {
    async fn is_completed(&self, step_id: &str) -> Result<bool>;

    /// Records a completed step. Recording an id that is already present is a no-op.
    async fn mark_completed(&self, step_id: &str, completed_at: DateTime<Utc>) -> Result<()>;

    /// All records, oldest completion first.
    async fn history(&self) -> Result<Vec<CheckpointRecord>>;

    /// Operator command: removes one record so the step replays on the next run.
    /// Returns whether a record was removed.
    async fn forget(&self, step_id: &str) -> Result<bool>;

    /// Operator command: removes every record. Returns how many were removed.
    async fn purge(&self) -> Result<usize>;
}

/// On-disk layout of the ledger document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct LedgerDocument {
    pub format_version: u32,
    #[serde(default)]
    pub records: Vec<CheckpointRecord>,
}

pub(crate) const LEDGER_FORMAT_VERSION: u32 = 1;

impl Default for LedgerDocument {
    fn default() -> Self {
        Self {
            format_version: LEDGER_FORMAT_VERSION,
            records: Vec::new(),
        }
    }
}

impl LedgerDocument {
    pub fn contains(&self, step_id: &str) -> bool {
        self.records.iter().any(|record| record.step_id == step_id)
    }

    /// Inserts keeping the records ordered by completion time.
    pub fn insert(&mut self, record: CheckpointRecord) -> bool {
        if self.contains(&record.step_id) {
            return false;
        }
        let position = self
            .records
            .partition_point(|existing| existing.completed_at <= record.completed_at);
        self.records.insert(position, record);
        true
    }

    pub fn remove(&mut self, step_id: &str) -> bool {
        let before = self.records.len();
        self.records.retain(|record| record.step_id != step_id);
        before != self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_document_keeps_completion_order_and_ignores_duplicates() {
        let mut doc = LedgerDocument::default();
        let t = |secs| Utc.timestamp_opt(secs, 0).single().unwrap();

        assert!(doc.insert(CheckpointRecord {
            step_id: "b".into(),
            completed_at: t(20),
        }));
        assert!(doc.insert(CheckpointRecord {
            step_id: "a".into(),
            completed_at: t(10),
        }));
        assert!(!doc.insert(CheckpointRecord {
            step_id: "a".into(),
            completed_at: t(30),
        }));

        let ids: Vec<_> = doc.records.iter().map(|r| r.step_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(doc.records[0].completed_at, t(10));
    }

    #[test]
    fn test_document_serializes_with_format_version() {
        let doc = LedgerDocument::default();
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["format_version"], 1);
        assert!(json["records"].as_array().unwrap().is_empty());
    }
}
