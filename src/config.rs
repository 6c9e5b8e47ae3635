use crate::core::{MigrateError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connection settings for the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base URL, e.g. `https://search.internal:9200`
    pub base_url: String,

    pub username: Option<String>,

    pub password: Option<String>,

    /// Accept any TLS certificate (self-signed clusters)
    pub trust_all_certificates: bool,

    /// Timeout applied to every store call
    pub request_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9200".to_string(),
            username: None,
            password: None,
            trust_all_certificates: false,
            request_timeout_ms: 60_000,
        }
    }
}

impl StoreConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            ..Self::default()
        }
    }

    /// Set basic-auth credentials
    pub fn credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    /// Set per-call timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn trust_all_certificates(mut self, trust: bool) -> Self {
        self.trust_all_certificates = trust;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Shape of indices the transformation steps create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// Prefix of every index name (`<prefix>-profile`, `<prefix>-session`, ...)
    pub index_prefix: String,

    pub number_of_shards: u32,
    pub number_of_replicas: u32,
    pub total_fields_limit: u32,
    pub max_doc_value_fields_search: u32,

    /// Same knobs for time-based (event, session) indices
    pub monthly_number_of_shards: u32,
    pub monthly_number_of_replicas: u32,
    pub monthly_total_fields_limit: u32,
    pub monthly_max_doc_value_fields_search: u32,

    pub rollover_max_size: Option<String>,
    pub rollover_max_age: Option<String>,
    pub rollover_max_docs: Option<u64>,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            index_prefix: "context".to_string(),
            number_of_shards: 5,
            number_of_replicas: 0,
            total_fields_limit: 1000,
            max_doc_value_fields_search: 1000,
            monthly_number_of_shards: 5,
            monthly_number_of_replicas: 0,
            monthly_total_fields_limit: 1000,
            monthly_max_doc_value_fields_search: 1000,
            rollover_max_size: Some("30gb".to_string()),
            rollover_max_age: None,
            rollover_max_docs: None,
        }
    }
}

impl IndexSettings {
    /// Set the index name prefix
    pub fn index_prefix(mut self, prefix: &str) -> Self {
        self.index_prefix = prefix.to_string();
        self
    }

    /// Set shard and replica counts for regular indices
    pub fn shards(mut self, shards: u32, replicas: u32) -> Self {
        self.number_of_shards = shards;
        self.number_of_replicas = replicas;
        self
    }

    /// Set shard and replica counts for monthly/rollover indices
    pub fn monthly_shards(mut self, shards: u32, replicas: u32) -> Self {
        self.monthly_number_of_shards = shards;
        self.monthly_number_of_replicas = replicas;
        self
    }

    /// Full index name for a logical item type.
    pub fn index_name(&self, item_type: &str) -> String {
        format!("{}-{}", self.index_prefix, item_type)
    }
}

/// Everything one migration invocation needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub store: StoreConfig,

    /// Directory holding the ledger and the run lock
    pub ledger_dir: PathBuf,

    /// Optional scope; ledger and lock live under `<ledger_dir>/<tenant>/`
    pub tenant: Option<String>,

    #[serde(flatten)]
    pub index: IndexSettings,

    /// Resume from recorded history; when false the history is purged first
    pub recover_from_history: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            ledger_dir: PathBuf::from("./data/migration"),
            tenant: None,
            index: IndexSettings::default(),
            recover_from_history: true,
        }
    }
}

pub const ENV_STORE_URL: &str = "MIGRATE_STORE_URL";
pub const ENV_STORE_USER: &str = "MIGRATE_STORE_USER";
pub const ENV_STORE_PASSWORD: &str = "MIGRATE_STORE_PASSWORD";
pub const ENV_LEDGER_DIR: &str = "MIGRATE_LEDGER_DIR";
pub const ENV_TENANT: &str = "MIGRATE_TENANT";
pub const ENV_INDEX_PREFIX: &str = "MIGRATE_INDEX_PREFIX";
pub const ENV_TIMEOUT_MS: &str = "MIGRATE_TIMEOUT_MS";
pub const ENV_TRUST_ALL_CERTS: &str = "MIGRATE_TRUST_ALL_CERTS";

impl MigrationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a JSON config file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            MigrateError::Config(format!("cannot read config '{}': {}", path.display(), err))
        })?;
        serde_json::from_str(&raw).map_err(|err| {
            MigrateError::Config(format!("invalid config '{}': {}", path.display(), err))
        })
    }

    /// Applies `MIGRATE_*` overrides from the process environment.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_STORE_URL) {
            self.store.base_url = url;
        }
        if let Some(user) = lookup(ENV_STORE_USER) {
            self.store.username = Some(user);
        }
        if let Some(password) = lookup(ENV_STORE_PASSWORD) {
            self.store.password = Some(password);
        }
        if let Some(dir) = lookup(ENV_LEDGER_DIR) {
            self.ledger_dir = PathBuf::from(dir);
        }
        if let Some(tenant) = lookup(ENV_TENANT) {
            self.tenant = Some(tenant).filter(|t| !t.is_empty());
        }
        if let Some(prefix) = lookup(ENV_INDEX_PREFIX) {
            self.index.index_prefix = prefix;
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            self.store.request_timeout_ms = raw.trim().parse().map_err(|_| {
                MigrateError::Config(format!("{} must be milliseconds, got '{}'", ENV_TIMEOUT_MS, raw))
            })?;
        }
        if let Some(raw) = lookup(ENV_TRUST_ALL_CERTS) {
            self.store.trust_all_certificates = parse_flag(&raw).ok_or_else(|| {
                MigrateError::Config(format!("{} must be true/false, got '{}'", ENV_TRUST_ALL_CERTS, raw))
            })?;
        }
        Ok(self)
    }

    /// Set the store configuration
    pub fn store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Set the ledger directory
    pub fn ledger_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ledger_dir = dir.into();
        self
    }

    /// Set the tenant scope
    pub fn tenant(mut self, tenant: &str) -> Self {
        self.tenant = Some(tenant.to_string());
        self
    }

    /// Set index settings
    pub fn index_settings(mut self, index: IndexSettings) -> Self {
        self.index = index;
        self
    }

    pub fn recover_from_history(mut self, recover: bool) -> Self {
        self.recover_from_history = recover;
        self
    }

    /// Directory actually holding ledger and lock, tenant scope applied.
    pub fn scoped_dir(&self) -> PathBuf {
        match &self.tenant {
            Some(tenant) => self.ledger_dir.join(tenant),
            None => self.ledger_dir.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.base_url.trim().is_empty() {
            return Err(MigrateError::Config("store base_url is empty".to_string()));
        }
        if !self.store.base_url.starts_with("http://") && !self.store.base_url.starts_with("https://") {
            return Err(MigrateError::Config(format!(
                "store base_url must start with http:// or https://, got '{}'",
                self.store.base_url
            )));
        }
        if self.store.request_timeout_ms == 0 {
            return Err(MigrateError::Config("request timeout must be > 0".to_string()));
        }
        if self.index.index_prefix.is_empty() {
            return Err(MigrateError::Config("index_prefix is empty".to_string()));
        }
        if let Some(tenant) = &self.tenant {
            if tenant.is_empty() || tenant.contains(['/', '\\']) || tenant == ".." {
                return Err(MigrateError::Config(format!("invalid tenant name '{}'", tenant)));
            }
        }
        Ok(())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}
