//! Result sink: persistence plus the optional HTTP forward.
//!
//! Records are stored as pretty-printed JSON under a timestamp-derived key,
//! with an append-only index of all keys under a fixed well-known key so an
//! external harvester can find them. The forward is fire-and-forget: an
//! empty endpoint disables it, and failures are reported but never block
//! persistence.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::dom::{DomError, DomSurface};
use crate::extract::Citation;

/// Fixed key of the append-only list of record keys.
pub const INDEX_KEY: &str = "chatgpt-files";

const KEY_PREFIX: &str = "chatgpt-response-";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Dom(#[from] DomError),

    #[error("record index is corrupt: {0}")]
    BadIndex(String),

    #[error("serializing the record failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Forward failures are non-fatal; callers log and notify, never abort.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("forward request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("forward endpoint rejected the record ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// The payload that is persisted and forwarded. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub prompt: String,
    pub response: String,
    /// `null` in the serialized record when the response had no citations.
    pub sources: Option<Vec<Citation>>,
    /// ISO-8601 with milliseconds; also the basis of the storage key.
    pub timestamp: String,
    pub url: String,
}

impl ResultRecord {
    pub fn new(prompt: String, response: String, sources: Vec<Citation>, url: String) -> Self {
        Self {
            prompt,
            response,
            sources: if sources.is_empty() {
                None
            } else {
                Some(sources)
            },
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            url,
        }
    }
}

/// Storage key for a record: the timestamp with `:` and `.` replaced, since
/// the key doubles as a filename on the harvesting side.
pub fn record_key(timestamp: &str) -> String {
    format!("{KEY_PREFIX}{}.json", timestamp.replace([':', '.'], "-"))
}

/// Key-value storage seam. Production writes through the page's own
/// `localStorage` ([`PageStore`]); tests use [`MemoryStore`]. The index
/// methods are shared: an index entry is appended at most once per key, so
/// retrying a persist cannot duplicate it.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn index(&self) -> Result<Vec<String>, StoreError> {
        match self.get(INDEX_KEY).await? {
            None => Ok(Vec::new()),
            Some(raw) => {
                serde_json::from_str(&raw).map_err(|e| StoreError::BadIndex(e.to_string()))
            }
        }
    }

    async fn append_index(&self, key: &str) -> Result<(), StoreError> {
        let mut keys = self.index().await?;
        if keys.iter().any(|existing| existing == key) {
            return Ok(());
        }
        keys.push(key.to_string());
        self.put(INDEX_KEY, &serde_json::to_string(&keys)?).await
    }
}

/// `localStorage` of the automated page, reached through the DOM seam.
pub struct PageStore<'a> {
    dom: &'a dyn DomSurface,
}

impl<'a> PageStore<'a> {
    pub fn new(dom: &'a dyn DomSurface) -> Self {
        Self { dom }
    }
}

#[async_trait]
impl RecordStore for PageStore<'_> {
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        Ok(self.dom.kv_set(key, value).await?)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.dom.kv_get(key).await?)
    }
}

/// In-memory store for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: std::sync::Mutex<std::collections::HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> std::collections::HashMap<String, String> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned())
    }
}

/// Write the record and append its key to the index. Returns the key.
pub async fn persist(store: &dyn RecordStore, record: &ResultRecord) -> Result<String, StoreError> {
    let key = record_key(&record.timestamp);
    let json = serde_json::to_string_pretty(record)?;
    store.put(&key, &json).await?;
    store.append_index(&key).await?;
    info!("persisted response as {key}");
    Ok(key)
}

/// Forward target configuration; part of the YAML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    pub endpoint: String,
    pub api_key: String,
    /// Extra static headers sent with every forward.
    pub headers: BTreeMap<String, String>,
}

impl ForwardConfig {
    pub fn enabled(&self) -> bool {
        !self.endpoint.trim().is_empty()
    }
}

/// POST the record to the configured endpoint. An empty endpoint is a
/// disabled no-op. A non-2xx reply surfaces the server's `error` field when
/// the body carries one.
pub async fn forward(
    http: &reqwest::Client,
    config: &ForwardConfig,
    record: &ResultRecord,
) -> Result<Option<serde_json::Value>, ForwardError> {
    if !config.enabled() {
        debug!("forward endpoint not configured; skipping forward");
        return Ok(None);
    }
    let endpoint = config.endpoint.trim();

    let mut request = http.post(endpoint).json(record);
    for (name, value) in &config.headers {
        request = request.header(name, value);
    }
    if !config.api_key.is_empty() {
        request = request.bearer_auth(&config.api_key);
    }

    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(ForwardError::Rejected {
            status: status.as_u16(),
            message: rejection_message(status, &body),
        });
    }
    info!("response forwarded to {endpoint}");
    Ok(serde_json::from_str(&body).ok())
}

fn rejection_message(status: reqwest::StatusCode, body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("error")
                .and_then(|e| e.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("endpoint responded with status {status}"))
}
