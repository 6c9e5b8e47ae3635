use super::{
    ByQueryResponse, ClusterHealth, HealthStatus, Hit, SearchPage, SnapshotInfo, StoreClient,
    StoreError, StoreResult,
};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const DEFAULT_SCROLL_BATCH: usize = 100;

#[derive(Debug, Clone, Default)]
struct MemoryIndex {
    settings: Value,
    mappings: Value,
    docs: BTreeMap<String, Value>,
}

#[derive(Debug)]
struct OpenScroll {
    remaining: VecDeque<Hit>,
    batch: usize,
}

#[derive(Debug, Default)]
struct State {
    indices: BTreeMap<String, MemoryIndex>,
    scrolls: HashMap<String, OpenScroll>,
    next_scroll: u64,
    policies: BTreeMap<String, Value>,
    snapshots: BTreeMap<String, Vec<SnapshotInfo>>,
    snapshot_data: HashMap<(String, String), BTreeMap<String, MemoryIndex>>,
    health: Option<HealthStatus>,
    fail_all: Option<StoreError>,
    fail_operations: HashMap<String, StoreError>,
    calls: u64,
    mutations: Vec<String>,
}

/// In-process [`StoreClient`] keeping indices in ordered maps.
///
/// Query support covers `match_all`, `term`, `terms`, `exists`, `ids` and
/// `bool.must`/`bool.must_not` over those. `_update_by_query` ignores the
/// script source and applies `script.params.set` (merged into each matched
/// document) and `script.params.remove` (field names to drop).
///
/// Clones share state, so a test can hand one clone to a migrator and keep
/// another to inspect what happened.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    scroll_batch: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                health: Some(HealthStatus::Green),
                ..State::default()
            })),
            scroll_batch: DEFAULT_SCROLL_BATCH,
        }
    }

    pub fn with_scroll_batch_size(mut self, size: usize) -> Self {
        self.scroll_batch = size.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not hide the state from the others.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Entry point of every trait call: counts it, records mutations and
    /// applies injected failures.
    fn enter(&self, operation: &str, target: &str, mutating: bool) -> StoreResult<MutexGuard<'_, State>> {
        let mut state = self.lock();
        state.calls += 1;
        if let Some(err) = state.fail_all.clone() {
            return Err(err);
        }
        if let Some(err) = state.fail_operations.get(operation).cloned() {
            return Err(err);
        }
        if mutating {
            state.mutations.push(format!("{} {}", operation, target));
        }
        Ok(state)
    }

    pub fn seed_index(&self, name: &str, body: Value) {
        let mut state = self.lock();
        state
            .indices
            .insert(name.to_string(), index_from_body(&body));
    }

    pub fn seed_document(&self, index: &str, id: &str, source: Value) {
        let mut state = self.lock();
        state
            .indices
            .entry(index.to_string())
            .or_default()
            .docs
            .insert(id.to_string(), source);
    }

    pub fn document(&self, index: &str, id: &str) -> Option<Value> {
        self.lock()
            .indices
            .get(index)
            .and_then(|idx| idx.docs.get(id).cloned())
    }

    pub fn document_count(&self, index: &str) -> usize {
        self.lock()
            .indices
            .get(index)
            .map(|idx| idx.docs.len())
            .unwrap_or(0)
    }

    pub fn indices(&self) -> Vec<String> {
        self.lock().indices.keys().cloned().collect()
    }

    pub fn settings(&self, index: &str) -> Option<Value> {
        self.lock().indices.get(index).map(|idx| idx.settings.clone())
    }

    pub fn mappings(&self, index: &str) -> Option<Value> {
        self.lock().indices.get(index).map(|idx| idx.mappings.clone())
    }

    pub fn lifecycle_policy(&self, name: &str) -> Option<Value> {
        self.lock().policies.get(name).cloned()
    }

    pub fn open_scrolls(&self) -> usize {
        self.lock().scrolls.len()
    }

    /// Number of trait calls served, reads included.
    pub fn calls(&self) -> u64 {
        self.lock().calls
    }

    /// Mutating calls in order, as `"<operation> <target>"`.
    pub fn mutations(&self) -> Vec<String> {
        self.lock().mutations.clone()
    }

    /// Makes every subsequent call fail with `err`; `None` heals the store.
    pub fn fail_with(&self, err: Option<StoreError>) {
        self.lock().fail_all = err;
    }

    /// Makes one operation (trait method name) fail until healed.
    pub fn fail_operation(&self, operation: &str, err: Option<StoreError>) {
        let mut state = self.lock();
        match err {
            Some(err) => {
                state.fail_operations.insert(operation.to_string(), err);
            }
            None => {
                state.fail_operations.remove(operation);
            }
        }
    }

    pub fn set_health(&self, status: HealthStatus) {
        self.lock().health = Some(status);
    }

    /// Captures the current content of `indices` as a snapshot in `repository`.
    pub fn add_snapshot(&self, repository: &str, snapshot: &str, indices: &[&str]) {
        let mut state = self.lock();
        let captured: BTreeMap<String, MemoryIndex> = indices
            .iter()
            .filter_map(|name| {
                state
                    .indices
                    .get(*name)
                    .map(|idx| (name.to_string(), idx.clone()))
            })
            .collect();
        let info = SnapshotInfo {
            snapshot: snapshot.to_string(),
            state: Some("SUCCESS".to_string()),
            indices: captured.keys().cloned().collect(),
        };
        state
            .snapshots
            .entry(repository.to_string())
            .or_default()
            .push(info);
        state
            .snapshot_data
            .insert((repository.to_string(), snapshot.to_string()), captured);
    }

    fn collect_hits(state: &State, index: &str, body: &Value) -> StoreResult<Vec<Hit>> {
        let idx = existing(state, index)?;
        let query = body.get("query").cloned().unwrap_or(json!({"match_all": {}}));
        let mut hits = Vec::new();
        for (id, source) in &idx.docs {
            if matches_query(&query, id, source)? {
                hits.push(Hit {
                    index: index.to_string(),
                    id: id.clone(),
                    source: source.clone(),
                });
            }
        }
        Ok(hits)
    }
}

fn index_from_body(body: &Value) -> MemoryIndex {
    MemoryIndex {
        settings: body.get("settings").cloned().unwrap_or(json!({})),
        mappings: body.get("mappings").cloned().unwrap_or(json!({})),
        docs: BTreeMap::new(),
    }
}

fn status_error(method: &str, target: &str, status: u16, kind: &str) -> StoreError {
    StoreError::Status {
        method: method.to_string(),
        url: format!("memory://{}", target),
        status,
        body: json!({"error": {"type": kind, "index": target}}).to_string(),
    }
}

fn existing<'s>(state: &'s State, index: &str) -> StoreResult<&'s MemoryIndex> {
    state
        .indices
        .get(index)
        .ok_or_else(|| status_error("GET", index, 404, "index_not_found_exception"))
}

fn existing_mut<'s>(state: &'s mut State, index: &str) -> StoreResult<&'s mut MemoryIndex> {
    state
        .indices
        .get_mut(index)
        .ok_or_else(|| status_error("POST", index, 404, "index_not_found_exception"))
}

fn bad_query(query: &Value) -> StoreError {
    StoreError::Status {
        method: "POST".to_string(),
        url: "memory://_search".to_string(),
        status: 400,
        body: format!("unsupported query: {}", query),
    }
}

fn field<'v>(source: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.')
        .try_fold(source, |current, segment| current.get(segment))
}

fn matches_query(query: &Value, id: &str, source: &Value) -> StoreResult<bool> {
    let Some((kind, clause)) = query.as_object().and_then(|obj| obj.iter().next()) else {
        return Err(bad_query(query));
    };
    match kind.as_str() {
        "match_all" => Ok(true),
        "term" => {
            let (name, expected) = clause
                .as_object()
                .and_then(|obj| obj.iter().next())
                .ok_or_else(|| bad_query(query))?;
            let expected = expected.get("value").unwrap_or(expected);
            Ok(field(source, name) == Some(expected))
        }
        "terms" => {
            let (name, allowed) = clause
                .as_object()
                .and_then(|obj| obj.iter().next())
                .ok_or_else(|| bad_query(query))?;
            let allowed = allowed.as_array().ok_or_else(|| bad_query(query))?;
            Ok(field(source, name).is_some_and(|value| allowed.contains(value)))
        }
        "exists" => {
            let name = clause
                .get("field")
                .and_then(Value::as_str)
                .ok_or_else(|| bad_query(query))?;
            Ok(field(source, name).is_some_and(|value| !value.is_null()))
        }
        "ids" => {
            let values = clause
                .get("values")
                .and_then(Value::as_array)
                .ok_or_else(|| bad_query(query))?;
            Ok(values.iter().any(|value| value.as_str() == Some(id)))
        }
        "bool" => {
            for clause_query in clauses(clause.get("must")) {
                if !matches_query(clause_query, id, source)? {
                    return Ok(false);
                }
            }
            for clause_query in clauses(clause.get("must_not")) {
                if matches_query(clause_query, id, source)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        _ => Err(bad_query(query)),
    }
}

fn clauses(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single @ Value::Object(_)) => vec![single],
        _ => Vec::new(),
    }
}

fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                merge(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

fn hits_page(scroll_id: Option<String>, total: usize, hits: Vec<Hit>) -> SearchPage {
    SearchPage {
        scroll_id,
        total: total as u64,
        hits,
    }
}

fn index_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(joined)) => joined
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn index_exists(&self, index: &str) -> StoreResult<bool> {
        let state = self.enter("index_exists", index, false)?;
        Ok(state.indices.contains_key(index))
    }

    async fn create_index(&self, index: &str, body: &Value) -> StoreResult<()> {
        let mut state = self.enter("create_index", index, true)?;
        if state.indices.contains_key(index) {
            return Err(status_error(
                "PUT",
                index,
                400,
                "resource_already_exists_exception",
            ));
        }
        state.indices.insert(index.to_string(), index_from_body(body));
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> StoreResult<()> {
        let mut state = self.enter("delete_index", index, true)?;
        state
            .indices
            .remove(index)
            .map(|_| ())
            .ok_or_else(|| status_error("DELETE", index, 404, "index_not_found_exception"))
    }

    async fn clone_index(&self, source: &str, target: &str) -> StoreResult<()> {
        let mut state = self.enter("clone_index", &format!("{}->{}", source, target), true)?;
        let copy = existing(&state, source)?.clone();
        if state.indices.contains_key(target) {
            return Err(status_error(
                "POST",
                target,
                400,
                "resource_already_exists_exception",
            ));
        }
        state.indices.insert(target.to_string(), copy);
        Ok(())
    }

    async fn put_settings(&self, index: &str, settings: &Value) -> StoreResult<()> {
        let mut state = self.enter("put_settings", index, true)?;
        let idx = existing_mut(&mut state, index)?;
        merge(&mut idx.settings, settings);
        Ok(())
    }

    async fn refresh(&self, index: &str) -> StoreResult<()> {
        let state = self.enter("refresh", index, false)?;
        existing(&state, index).map(|_| ())
    }

    async fn get_mapping(&self, index: &str) -> StoreResult<Value> {
        let state = self.enter("get_mapping", index, false)?;
        Ok(existing(&state, index)?.mappings.clone())
    }

    async fn put_mapping(&self, index: &str, mapping: &Value) -> StoreResult<()> {
        let mut state = self.enter("put_mapping", index, true)?;
        let idx = existing_mut(&mut state, index)?;
        merge(&mut idx.mappings, mapping);
        Ok(())
    }

    async fn count(&self, index: &str, query: Option<&Value>) -> StoreResult<u64> {
        let state = self.enter("count", index, false)?;
        let body = match query {
            Some(query) => json!({ "query": query }),
            None => json!({}),
        };
        Ok(Self::collect_hits(&state, index, &body)?.len() as u64)
    }

    async fn search(&self, index: &str, body: &Value) -> StoreResult<SearchPage> {
        let state = self.enter("search", index, false)?;
        let hits = Self::collect_hits(&state, index, body)?;
        let total = hits.len();
        let from = body.get("from").and_then(Value::as_u64).unwrap_or(0) as usize;
        let size = body.get("size").and_then(Value::as_u64).unwrap_or(10) as usize;
        let page = hits.into_iter().skip(from).take(size).collect();
        Ok(hits_page(None, total, page))
    }

    async fn scroll_start(
        &self,
        index: &str,
        body: &Value,
        _keep_alive: &str,
    ) -> StoreResult<SearchPage> {
        let mut state = self.enter("scroll_start", index, false)?;
        let mut remaining: VecDeque<Hit> = Self::collect_hits(&state, index, body)?.into();
        let total = remaining.len();
        let batch = body
            .get("size")
            .and_then(Value::as_u64)
            .map(|size| size as usize)
            .unwrap_or(self.scroll_batch)
            .max(1);
        let first: Vec<Hit> = remaining.drain(..batch.min(remaining.len())).collect();

        state.next_scroll += 1;
        let scroll_id = format!("scroll-{}", state.next_scroll);
        state
            .scrolls
            .insert(scroll_id.clone(), OpenScroll { remaining, batch });
        Ok(hits_page(Some(scroll_id), total, first))
    }

    async fn scroll_next(&self, scroll_id: &str, _keep_alive: &str) -> StoreResult<SearchPage> {
        let mut state = self.enter("scroll_next", scroll_id, false)?;
        let scroll = state.scrolls.get_mut(scroll_id).ok_or_else(|| {
            status_error("POST", scroll_id, 404, "search_context_missing_exception")
        })?;
        let take = scroll.batch.min(scroll.remaining.len());
        let batch: Vec<Hit> = scroll.remaining.drain(..take).collect();
        let total = batch.len() + scroll.remaining.len();
        Ok(hits_page(Some(scroll_id.to_string()), total, batch))
    }

    async fn clear_scroll(&self, scroll_id: &str) -> StoreResult<()> {
        let mut state = self.enter("clear_scroll", scroll_id, false)?;
        state.scrolls.remove(scroll_id);
        Ok(())
    }

    async fn put_lifecycle_policy(&self, name: &str, policy: &Value) -> StoreResult<()> {
        let mut state = self.enter("put_lifecycle_policy", name, true)?;
        state.policies.insert(name.to_string(), policy.clone());
        Ok(())
    }

    async fn reindex(&self, body: &Value) -> StoreResult<ByQueryResponse> {
        let source = body
            .pointer("/source/index")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let dest = body
            .pointer("/dest/index")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut state = self.enter("reindex", &format!("{}->{}", source, dest), true)?;

        let query = body
            .pointer("/source/query")
            .map(|query| json!({ "query": query }))
            .unwrap_or(json!({}));
        let hits = Self::collect_hits(&state, &source, &query)?;
        let target = state.indices.entry(dest).or_default();

        let mut response = ByQueryResponse {
            total: hits.len() as u64,
            ..ByQueryResponse::default()
        };
        for hit in hits {
            if target.docs.insert(hit.id, hit.source).is_some() {
                response.updated += 1;
            } else {
                response.created += 1;
            }
        }
        Ok(response)
    }

    async fn update_by_query(&self, index: &str, body: &Value) -> StoreResult<ByQueryResponse> {
        let mut state = self.enter("update_by_query", index, true)?;
        let hits = Self::collect_hits(&state, index, body)?;
        let set = body
            .pointer("/script/params/set")
            .cloned()
            .unwrap_or(Value::Object(Map::new()));
        let remove = index_list(body.pointer("/script/params/remove"));

        let idx = existing_mut(&mut state, index)?;
        let mut response = ByQueryResponse {
            total: hits.len() as u64,
            ..ByQueryResponse::default()
        };
        for hit in hits {
            if let Some(doc) = idx.docs.get_mut(&hit.id) {
                merge(doc, &set);
                if let Some(obj) = doc.as_object_mut() {
                    for name in &remove {
                        obj.remove(name);
                    }
                }
                response.updated += 1;
            }
        }
        Ok(response)
    }

    async fn delete_by_query(&self, index: &str, body: &Value) -> StoreResult<ByQueryResponse> {
        let mut state = self.enter("delete_by_query", index, true)?;
        let hits = Self::collect_hits(&state, index, body)?;
        let idx = existing_mut(&mut state, index)?;
        let mut response = ByQueryResponse {
            total: hits.len() as u64,
            ..ByQueryResponse::default()
        };
        for hit in hits {
            if idx.docs.remove(&hit.id).is_some() {
                response.deleted += 1;
            }
        }
        Ok(response)
    }

    async fn list_indices(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let state = self.enter("list_indices", prefix, false)?;
        Ok(state
            .indices
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn wait_for_status(
        &self,
        status: HealthStatus,
        _timeout: Duration,
    ) -> StoreResult<ClusterHealth> {
        let state = self.enter("wait_for_status", status.as_str(), false)?;
        let current = state.health.unwrap_or(HealthStatus::Green);
        if current < status {
            return Err(StoreError::Timeout {
                url: format!("memory://_cluster/health?wait_for_status={}", status.as_str()),
            });
        }
        Ok(ClusterHealth {
            status: current,
            timed_out: false,
        })
    }

    async fn list_snapshots(&self, repository: &str) -> StoreResult<Vec<SnapshotInfo>> {
        let state = self.enter("list_snapshots", repository, false)?;
        state.snapshots.get(repository).cloned().ok_or_else(|| {
            status_error("GET", repository, 404, "repository_missing_exception")
        })
    }

    async fn restore_snapshot(
        &self,
        repository: &str,
        snapshot: &str,
        body: &Value,
    ) -> StoreResult<()> {
        let mut state = self.enter("restore_snapshot", &format!("{}/{}", repository, snapshot), true)?;
        let captured = state
            .snapshot_data
            .get(&(repository.to_string(), snapshot.to_string()))
            .cloned()
            .ok_or_else(|| status_error("POST", snapshot, 404, "snapshot_missing_exception"))?;

        let wanted = index_list(body.get("indices"));
        for (name, idx) in captured {
            if !wanted.is_empty() && !wanted.contains(&name) {
                continue;
            }
            if state.indices.contains_key(&name) {
                return Err(status_error("POST", &name, 500, "snapshot_restore_exception"));
            }
            state.indices.insert(name, idx);
        }
        Ok(())
    }
}
