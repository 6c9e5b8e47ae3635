use super::{
    ByQueryResponse, ClusterHealth, HealthStatus, SearchPage, SnapshotInfo, StoreClient,
    StoreError, StoreResult,
};
use crate::config::StoreConfig;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tracing::{Level, event};

const HEALTH_POLL_WINDOW: Duration = Duration::from_secs(60);

/// [`StoreClient`] speaking HTTP(S) JSON to an Elasticsearch/OpenSearch node.
#[derive(Clone)]
pub struct HttpStoreClient {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<(String, String)>,
}

impl HttpStoreClient {
    pub fn new(config: &StoreConfig) -> StoreResult<Self> {
        let started = Instant::now();
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .danger_accept_invalid_certs(config.trust_all_certificates)
            .build()
            .map_err(|err| StoreError::Transport {
                url: config.base_url.clone(),
                message: format!("cannot build HTTP client: {}", err),
            })?;

        let credentials = match (&config.username, &config.password) {
            (Some(user), password) if !user.is_empty() => {
                Some((user.clone(), password.clone().unwrap_or_default()))
            }
            _ => None,
        };

        event!(
            Level::DEBUG,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "store http client initialised"
        );

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Sends a request and returns the status code with the raw body, without
    /// treating 4xx/5xx as errors.
    async fn send_raw(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> StoreResult<(u16, String)> {
        let url = self.url(path);
        let started = Instant::now();

        let mut builder = self
            .client
            .request(method.clone(), &url)
            .header("accept", "application/json");
        if let Some((user, password)) = &self.credentials {
            builder = builder.basic_auth(user, Some(password));
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                StoreError::Timeout { url: url.clone() }
            } else {
                StoreError::Transport {
                    url: url.clone(),
                    message: err.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|err| StoreError::Transport {
            url: url.clone(),
            message: format!("reading response body: {}", err),
        })?;

        event!(
            Level::DEBUG,
            method = %method,
            url = %url,
            status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "store request executed"
        );

        Ok((status, text))
    }

    /// Sends a request and decodes the JSON response; any status >= 400 is an error.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> StoreResult<Value> {
        let (status, text) = self.send_raw(method.clone(), path, body, None).await?;
        if status >= 400 {
            return Err(StoreError::Status {
                method: method.to_string(),
                url: self.url(path),
                status,
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|err| StoreError::Decode {
            url: self.url(path),
            message: err.to_string(),
        })
    }

    fn decode<T: serde::de::DeserializeOwned>(&self, path: &str, value: Value) -> StoreResult<T> {
        serde_json::from_value(value).map_err(|err| StoreError::Decode {
            url: self.url(path),
            message: err.to_string(),
        })
    }

    fn decode_page(&self, path: &str, value: &Value) -> StoreResult<SearchPage> {
        SearchPage::from_response(value).ok_or_else(|| StoreError::Decode {
            url: self.url(path),
            message: "response has no 'hits' section".to_string(),
        })
    }
}

#[async_trait]
impl StoreClient for HttpStoreClient {
    async fn index_exists(&self, index: &str) -> StoreResult<bool> {
        let (status, body) = self.send_raw(Method::HEAD, index, None, None).await?;
        match status {
            200 => Ok(true),
            404 => Ok(false),
            _ => Err(StoreError::Status {
                method: "HEAD".to_string(),
                url: self.url(index),
                status,
                body,
            }),
        }
    }

    async fn create_index(&self, index: &str, body: &Value) -> StoreResult<()> {
        self.request(Method::PUT, index, Some(body)).await?;
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> StoreResult<()> {
        self.request(Method::DELETE, index, None).await?;
        Ok(())
    }

    async fn clone_index(&self, source: &str, target: &str) -> StoreResult<()> {
        self.request(Method::POST, &format!("{}/_clone/{}", source, target), None)
            .await?;
        Ok(())
    }

    async fn put_settings(&self, index: &str, settings: &Value) -> StoreResult<()> {
        self.request(Method::PUT, &format!("{}/_settings", index), Some(settings))
            .await?;
        Ok(())
    }

    async fn refresh(&self, index: &str) -> StoreResult<()> {
        self.request(Method::POST, &format!("{}/_refresh", index), None)
            .await?;
        Ok(())
    }

    async fn get_mapping(&self, index: &str) -> StoreResult<Value> {
        let path = format!("{}/_mapping", index);
        let response = self.request(Method::GET, &path, None).await?;
        // The response is keyed by concrete index name, which differs from `index` for aliases.
        let mappings = response
            .as_object()
            .and_then(|by_index| {
                by_index
                    .get(index)
                    .or_else(|| by_index.values().next())
                    .and_then(|entry| entry.get("mappings"))
            })
            .cloned()
            .ok_or_else(|| StoreError::Decode {
                url: self.url(&path),
                message: "response has no 'mappings' section".to_string(),
            })?;
        Ok(mappings)
    }

    async fn put_mapping(&self, index: &str, mapping: &Value) -> StoreResult<()> {
        self.request(Method::PUT, &format!("{}/_mapping", index), Some(mapping))
            .await?;
        Ok(())
    }

    async fn count(&self, index: &str, query: Option<&Value>) -> StoreResult<u64> {
        let path = format!("{}/_count", index);
        let body = query.map(|q| json!({ "query": q }));
        let response = self.request(Method::POST, &path, body.as_ref()).await?;
        response
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| StoreError::Decode {
                url: self.url(&path),
                message: "response has no 'count'".to_string(),
            })
    }

    async fn search(&self, index: &str, body: &Value) -> StoreResult<SearchPage> {
        let path = format!("{}/_search", index);
        let response = self.request(Method::POST, &path, Some(body)).await?;
        self.decode_page(&path, &response)
    }

    async fn scroll_start(
        &self,
        index: &str,
        body: &Value,
        keep_alive: &str,
    ) -> StoreResult<SearchPage> {
        let path = format!("{}/_search?scroll={}", index, keep_alive);
        let response = self.request(Method::POST, &path, Some(body)).await?;
        self.decode_page(&path, &response)
    }

    async fn scroll_next(&self, scroll_id: &str, keep_alive: &str) -> StoreResult<SearchPage> {
        let path = "_search/scroll";
        let body = json!({ "scroll_id": scroll_id, "scroll": keep_alive });
        let response = self.request(Method::POST, path, Some(&body)).await?;
        self.decode_page(path, &response)
    }

    async fn clear_scroll(&self, scroll_id: &str) -> StoreResult<()> {
        let body = json!({ "scroll_id": [scroll_id] });
        match self
            .request(Method::DELETE, "_search/scroll", Some(&body))
            .await
        {
            Ok(_) => Ok(()),
            // Already expired on the node.
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn put_lifecycle_policy(&self, name: &str, policy: &Value) -> StoreResult<()> {
        self.request(Method::PUT, &format!("_ilm/policy/{}", name), Some(policy))
            .await?;
        Ok(())
    }

    async fn reindex(&self, body: &Value) -> StoreResult<ByQueryResponse> {
        let path = "_reindex?wait_for_completion=true&refresh=true";
        let response = self.request(Method::POST, path, Some(body)).await?;
        self.decode(path, response)
    }

    async fn update_by_query(&self, index: &str, body: &Value) -> StoreResult<ByQueryResponse> {
        let path = format!(
            "{}/_update_by_query?conflicts=proceed&refresh=true&wait_for_completion=true",
            index
        );
        let response = self.request(Method::POST, &path, Some(body)).await?;
        self.decode(&path, response)
    }

    async fn delete_by_query(&self, index: &str, body: &Value) -> StoreResult<ByQueryResponse> {
        let path = format!(
            "{}/_delete_by_query?conflicts=proceed&refresh=true&wait_for_completion=true",
            index
        );
        let response = self.request(Method::POST, &path, Some(body)).await?;
        self.decode(&path, response)
    }

    async fn list_indices(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let response = self.request(Method::GET, "_aliases", None).await?;
        let mut names: Vec<String> = response
            .as_object()
            .map(|by_index| {
                by_index
                    .keys()
                    .filter(|name| name.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }

    async fn wait_for_status(
        &self,
        status: HealthStatus,
        timeout: Duration,
    ) -> StoreResult<ClusterHealth> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let window = remaining.min(HEALTH_POLL_WINDOW).max(Duration::from_secs(1));
            let path = format!(
                "_cluster/health?wait_for_status={}&timeout={}s",
                status.as_str(),
                window.as_secs()
            );
            let (code, text) = self
                .send_raw(
                    Method::GET,
                    &path,
                    None,
                    Some(window + Duration::from_secs(10)),
                )
                .await?;
            // 408 carries a regular health body with `timed_out: true`.
            if code != 200 && code != 408 {
                return Err(StoreError::Status {
                    method: Method::GET.to_string(),
                    url: self.url(&path),
                    status: code,
                    body: text,
                });
            }
            let health: ClusterHealth =
                serde_json::from_str(&text).map_err(|err| StoreError::Decode {
                    url: self.url(&path),
                    message: err.to_string(),
                })?;

            if !health.timed_out && health.status >= status {
                event!(Level::INFO, status = health.status.as_str(), "cluster health reached");
                return Ok(health);
            }
            if Instant::now() >= deadline {
                return Err(StoreError::Timeout {
                    url: self.url(&path),
                });
            }
            event!(
                Level::INFO,
                current = health.status.as_str(),
                wanted = status.as_str(),
                "waiting for cluster health"
            );
        }
    }

    async fn list_snapshots(&self, repository: &str) -> StoreResult<Vec<SnapshotInfo>> {
        let path = format!("_snapshot/{}/_all", repository);
        let response = self.request(Method::GET, &path, None).await?;
        let snapshots = response.get("snapshots").cloned().unwrap_or(json!([]));
        self.decode(&path, snapshots)
    }

    async fn restore_snapshot(
        &self,
        repository: &str,
        snapshot: &str,
        body: &Value,
    ) -> StoreResult<()> {
        let path = format!(
            "_snapshot/{}/{}/_restore?wait_for_completion=true",
            repository, snapshot
        );
        self.request(Method::POST, &path, Some(body)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_url_joining_trims_slashes() {
        let config = StoreConfig {
            base_url: "http://localhost:9200/".to_string(),
            ..StoreConfig::default()
        };
        let client = HttpStoreClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "http://localhost:9200");
        assert_eq!(
            client.url("/context-profile/_mapping"),
            "http://localhost:9200/context-profile/_mapping"
        );
    }

    #[test]
    fn test_empty_username_means_no_credentials() {
        let config = StoreConfig {
            username: Some(String::new()),
            password: Some("secret".to_string()),
            ..StoreConfig::default()
        };
        let client = HttpStoreClient::new(&config).unwrap();
        assert!(client.credentials.is_none());
    }

    /// Answers one connection per canned response, counting the requests.
    async fn stub_server(responses: Vec<(u16, &'static str)>) -> (StoreConfig, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&requests);
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 4096];
                let _ = socket.read(&mut buf).await;
                counter.fetch_add(1, Ordering::SeqCst);
                let response = format!(
                    "HTTP/1.1 {} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });
        let config = StoreConfig {
            base_url: format!("http://{}", addr),
            ..StoreConfig::default()
        };
        (config, requests)
    }

    #[tokio::test]
    async fn test_health_wait_keeps_polling_after_a_timed_out_window() {
        let (config, requests) = stub_server(vec![
            (408, r#"{"status":"red","timed_out":true}"#),
            (200, r#"{"status":"yellow","timed_out":false}"#),
        ])
        .await;
        let client = HttpStoreClient::new(&config).unwrap();

        let health = client
            .wait_for_status(HealthStatus::Yellow, Duration::from_secs(300))
            .await
            .unwrap();

        assert_eq!(health.status, HealthStatus::Yellow);
        assert_eq!(requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_health_wait_fails_on_other_error_statuses() {
        let (config, _) = stub_server(vec![(503, r#"{"error":"master_not_discovered_exception"}"#)]).await;
        let client = HttpStoreClient::new(&config).unwrap();

        let err = client
            .wait_for_status(HealthStatus::Yellow, Duration::from_secs(300))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Status { status: 503, .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_unreachable_store_is_a_typed_transport_error() {
        let config = StoreConfig {
            // Port 9 (discard) is closed on test machines; connection is refused.
            base_url: "http://127.0.0.1:9".to_string(),
            request_timeout_ms: 2_000,
            ..StoreConfig::default()
        };
        let client = HttpStoreClient::new(&config).unwrap();
        let err = client.index_exists("context-profile").await.unwrap_err();
        assert!(err.is_transient(), "{err:?}");
    }
}
