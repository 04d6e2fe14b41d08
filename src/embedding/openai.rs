//! OpenAI-compatible embedding provider (`POST {base_url}/embeddings`).

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;
use crate::error::ProviderError;
use crate::http;

const PROVIDER: &str = "openai";

/// Inputs per request when embedding a batch.
const MAX_BATCH: usize = 96;

pub struct OpenAiEmbeddings {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a, I: Serialize> {
    model: &'a str,
    input: I,
    encoding_format: &'static str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbeddings {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        anyhow::ensure!(
            !config.api_key.is_empty(),
            "embedding API key missing. Set OPENAI_API_KEY or embedding.api_key."
        );
        Ok(Self {
            client: http::request_client(10, config.timeout_secs)?,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }

    async fn request<I: Serialize + Send + Sync>(
        &self,
        input: I,
        expected: usize,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input,
            encoding_format: "float",
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER, &e))?;
        let response = http::check_status(PROVIDER, response).await?;
        let mut body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER, &e))?;

        if body.data.len() != expected {
            return Err(ProviderError::new(
                PROVIDER,
                None,
                format!("expected {expected} embeddings, got {}", body.data.len()),
            ));
        }

        body.data.sort_by_key(|d| d.index);
        let vectors: Vec<Vec<f32>> = body.data.into_iter().map(|d| d.embedding).collect();

        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimensions) {
            return Err(ProviderError::new(
                PROVIDER,
                None,
                format!(
                    "embedding has {} dimensions, model {} is configured for {}",
                    bad.len(),
                    self.model,
                    self.dimensions
                ),
            ));
        }

        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        if text.trim().is_empty() {
            return Err(ProviderError::new(PROVIDER, None, "cannot embed empty text"));
        }
        tracing::debug!(model = %self.model, chars = text.len(), "embedding query");
        let mut vectors = self.request(text, 1).await?;
        vectors
            .pop()
            .ok_or_else(|| ProviderError::new(PROVIDER, None, "no embedding returned"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(MAX_BATCH) {
            vectors.extend(self.request(chunk, chunk.len()).await?);
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
