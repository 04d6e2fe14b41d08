//! Pinecone vector index client.
//!
//! Data-plane calls (`/query`, `/vectors/upsert`, `/describe_index_stats`) go to
//! the index host. The control plane is only used to resolve that host and to
//! create the index during ingestion.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use super::{IndexRecord, MetadataValue, RetrievedRecord, VectorIndex};
use crate::config::IndexConfig;
use crate::error::ProviderError;
use crate::http;

const PROVIDER: &str = "pinecone";

/// Pinecone caps upsert requests well above this, but large batches of
/// 1536-dim vectors hit the request size limit first.
const UPSERT_BATCH: usize = 100;

/// Connection handle for one Pinecone index.
pub struct PineconeIndex {
    client: Client,
    host: String,
    api_key: String,
    api_version: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    namespace: &'a str,
    include_metadata: bool,
    include_values: bool,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<BTreeMap<String, MetadataValue>>,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [IndexRecord],
    namespace: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

/// Vector counts reported by `describe_index_stats`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    #[serde(default)]
    pub dimension: usize,
    #[serde(default)]
    pub total_vector_count: u64,
    #[serde(default)]
    pub namespaces: BTreeMap<String, NamespaceStats>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceStats {
    #[serde(default)]
    pub vector_count: u64,
}

/// Index description returned by the control plane.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexDescription {
    pub name: String,
    #[serde(default)]
    pub dimension: usize,
    #[serde(default)]
    pub metric: String,
    pub host: String,
    #[serde(default)]
    pub status: IndexStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndexStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub state: String,
}

impl PineconeIndex {
    /// Build a client for an index whose data-plane host is already known.
    pub fn new(config: &IndexConfig, host: &str) -> Result<Self> {
        anyhow::ensure!(
            !config.api_key.is_empty(),
            "Pinecone API key missing. Set PINECONE_API_KEY or index.api_key."
        );
        Ok(Self {
            client: http::request_client(10, config.timeout_secs)?,
            host: normalize_host(host),
            api_key: config.api_key.clone(),
            api_version: config.api_version.clone(),
        })
    }

    /// Build a client, resolving the host through the control plane when it is not configured.
    pub async fn connect(config: &IndexConfig) -> Result<Self> {
        if !config.host.is_empty() {
            return Self::new(config, &config.host);
        }

        let control = PineconeControl::new(config)?;
        let description = control
            .describe_index(&config.name)
            .await
            .with_context(|| format!("failed to resolve host for index '{}'", config.name))?;
        tracing::info!(index = %description.name, host = %description.host, "resolved index host");
        Self::new(config, &description.host)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{path}", self.host))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", &self.api_version)
    }

    /// Vector counts for the whole index and per namespace.
    pub async fn describe_index_stats(&self) -> Result<IndexStats, ProviderError> {
        let response = self
            .post("/describe_index_stats")
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER, &e))?;
        let response = http::check_status(PROVIDER, response).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER, &e))
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: &str,
    ) -> Result<Vec<RetrievedRecord>, ProviderError> {
        if top_k == 0 {
            return Err(ProviderError::new(PROVIDER, None, "topK must be at least 1"));
        }
        if vector.is_empty() {
            return Err(ProviderError::new(PROVIDER, None, "query vector is empty"));
        }

        let request = QueryRequest {
            vector,
            top_k,
            namespace,
            include_metadata: true,
            include_values: false,
        };

        let response = self
            .post("/query")
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER, &e))?;
        let response = http::check_status(PROVIDER, response).await?;
        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER, &e))?;

        let records: Vec<RetrievedRecord> = body
            .matches
            .into_iter()
            .map(|m| RetrievedRecord {
                id: m.id,
                score: m.score,
                metadata: m.metadata.unwrap_or_default(),
            })
            .collect();

        tracing::debug!(namespace, top_k, matches = records.len(), "index query complete");
        Ok(records)
    }

    async fn upsert(&self, records: &[IndexRecord], namespace: &str) -> Result<usize, ProviderError> {
        let mut written = 0;
        for batch in records.chunks(UPSERT_BATCH) {
            let response = self
                .post("/vectors/upsert")
                .json(&UpsertRequest {
                    vectors: batch,
                    namespace,
                })
                .send()
                .await
                .map_err(|e| ProviderError::transport(PROVIDER, &e))?;
            let response = http::check_status(PROVIDER, response).await?;
            let body: UpsertResponse = response
                .json()
                .await
                .map_err(|e| ProviderError::transport(PROVIDER, &e))?;
            written += body.upserted_count;
        }
        tracing::info!(namespace, written, "upserted vectors");
        Ok(written)
    }
}

/// Pinecone control-plane client (index management).
pub struct PineconeControl {
    client: Client,
    base_url: String,
    api_key: String,
    api_version: String,
}

impl PineconeControl {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        anyhow::ensure!(
            !config.api_key.is_empty(),
            "Pinecone API key missing. Set PINECONE_API_KEY or index.api_key."
        );
        Ok(Self {
            client: http::request_client(10, config.timeout_secs)?,
            base_url: config.control_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
            api_version: config.api_version.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", &self.api_version)
    }

    pub async fn describe_index(&self, name: &str) -> Result<IndexDescription, ProviderError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/indexes/{name}"))
            .send()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER, &e))?;
        let response = http::check_status(PROVIDER, response).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER, &e))
    }

    /// Create a serverless index. Returns `false` if it already existed.
    pub async fn create_index(
        &self,
        name: &str,
        dimension: usize,
        metric: &str,
        cloud: &str,
        region: &str,
    ) -> Result<bool, ProviderError> {
        let body = serde_json::json!({
            "name": name,
            "dimension": dimension,
            "metric": metric,
            "spec": { "serverless": { "cloud": cloud, "region": region } },
        });
        let response = self
            .request(reqwest::Method::POST, "/indexes")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER, &e))?;

        if response.status() == reqwest::StatusCode::CONFLICT {
            tracing::info!(index = name, "index already exists");
            return Ok(false);
        }
        http::check_status(PROVIDER, response).await?;
        tracing::info!(index = name, dimension, metric, "index created");
        Ok(true)
    }

    /// Poll `describe_index` until the index reports ready.
    pub async fn wait_until_ready(
        &self,
        name: &str,
        attempts: u32,
        interval: Duration,
    ) -> Result<IndexDescription> {
        for attempt in 1..=attempts {
            let description = self.describe_index(name).await?;
            if description.status.ready {
                return Ok(description);
            }
            tracing::debug!(index = name, attempt, state = %description.status.state, "index not ready yet");
            tokio::time::sleep(interval).await;
        }
        anyhow::bail!("index '{name}' not ready after {attempts} attempts")
    }
}

/// Index hosts are reported without a scheme.
fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_owned()
    } else {
        format!("https://{host}")
    }
}
