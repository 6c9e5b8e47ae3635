//! Narrow client surface over the document store's REST API.
//!
//! Steps only ever talk to the store through [`StoreClient`]. The HTTP
//! implementation speaks the store's native JSON; the in-memory one backs
//! tests and rehearsals.

pub mod error;
pub mod http;
pub mod memory;
pub mod scroll;

pub use error::{StoreError, StoreResult};
pub use http::HttpStoreClient;
pub use memory::MemoryStore;
pub use scroll::{Scroller, scroll_each};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Default keep-alive for scroll contexts.
pub const DEFAULT_SCROLL_KEEP_ALIVE: &str = "1m";

#[async_trait]
pub trait StoreClient: Send + Sync {
    async fn index_exists(&self, index: &str) -> StoreResult<bool>;

    /// Creates an index from a full creation body (`settings` + `mappings`).
    async fn create_index(&self, index: &str, body: &Value) -> StoreResult<()>;

    async fn delete_index(&self, index: &str) -> StoreResult<()>;

    async fn clone_index(&self, source: &str, target: &str) -> StoreResult<()>;

    async fn put_settings(&self, index: &str, settings: &Value) -> StoreResult<()>;

    async fn refresh(&self, index: &str) -> StoreResult<()>;

    /// Returns the `mappings` object of an index.
    async fn get_mapping(&self, index: &str) -> StoreResult<Value>;

    async fn put_mapping(&self, index: &str, mapping: &Value) -> StoreResult<()>;

    /// Counts documents matching `query` (all documents when `None`).
    async fn count(&self, index: &str, query: Option<&Value>) -> StoreResult<u64>;

    async fn search(&self, index: &str, body: &Value) -> StoreResult<SearchPage>;

    async fn scroll_start(&self, index: &str, body: &Value, keep_alive: &str)
    -> StoreResult<SearchPage>;

    async fn scroll_next(&self, scroll_id: &str, keep_alive: &str) -> StoreResult<SearchPage>;

    async fn clear_scroll(&self, scroll_id: &str) -> StoreResult<()>;

    /// Creates or replaces an index lifecycle (rollover) policy.
    async fn put_lifecycle_policy(&self, name: &str, policy: &Value) -> StoreResult<()>;

    /// Runs a `_reindex` request to completion.
    async fn reindex(&self, body: &Value) -> StoreResult<ByQueryResponse>;

    async fn update_by_query(&self, index: &str, body: &Value) -> StoreResult<ByQueryResponse>;

    async fn delete_by_query(&self, index: &str, body: &Value) -> StoreResult<ByQueryResponse>;

    /// Lists index names starting with `prefix`, sorted.
    async fn list_indices(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Blocks until the cluster reports at least `status` or `timeout` elapses.
    async fn wait_for_status(
        &self,
        status: HealthStatus,
        timeout: Duration,
    ) -> StoreResult<ClusterHealth>;

    async fn list_snapshots(&self, repository: &str) -> StoreResult<Vec<SnapshotInfo>>;

    async fn restore_snapshot(
        &self,
        repository: &str,
        snapshot: &str,
        body: &Value,
    ) -> StoreResult<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub index: String,
    pub id: String,
    pub source: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub scroll_id: Option<String>,
    pub total: u64,
    pub hits: Vec<Hit>,
}

impl SearchPage {
    /// Decodes a `_search` / `_search/scroll` response body.
    pub fn from_response(body: &Value) -> Option<Self> {
        let hits_object = body.get("hits")?;
        let total = match hits_object.get("total") {
            Some(Value::Number(n)) => n.as_u64().unwrap_or_default(),
            Some(Value::Object(obj)) => obj.get("value").and_then(Value::as_u64).unwrap_or_default(),
            _ => 0,
        };

        let hits = hits_object
            .get("hits")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|item| Hit {
                        index: item
                            .get("_index")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        id: item
                            .get("_id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        source: item.get("_source").cloned().unwrap_or(Value::Null),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            scroll_id: body
                .get("_scroll_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            total,
            hits,
        })
    }
}

/// Summary returned by `_reindex`, `_update_by_query` and `_delete_by_query`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ByQueryResponse {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub created: u64,
    #[serde(default)]
    pub updated: u64,
    #[serde(default)]
    pub deleted: u64,
    #[serde(default)]
    pub took: u64,
    #[serde(default)]
    pub failures: Vec<Value>,
}

impl ByQueryResponse {
    pub fn affected(&self) -> u64 {
        self.created + self.updated + self.deleted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Red,
    Yellow,
    Green,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Yellow => "yellow",
            Self::Green => "green",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterHealth {
    pub status: HealthStatus,
    #[serde(default)]
    pub timed_out: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub snapshot: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub indices: Vec<String>,
}
