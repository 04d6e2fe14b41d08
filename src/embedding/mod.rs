//! Text-to-vector embedding.
//!
//! Provides the [`EmbeddingProvider`] trait and an OpenAI-compatible HTTP
//! implementation. The provider is created via [`create_provider`] from
//! configuration.

pub mod openai;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::ProviderError;

/// Trait for embedding text into vectors.
///
/// Every call is one outbound request; nothing is cached and nothing is retried.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name for errors and logs.
    fn name(&self) -> &str;

    /// Embed a single text string into a vector of [`dimensions`](Self::dimensions) floats.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Embed a batch of text strings. Implementations may override for batched requests.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize;
}

/// Create an embedding provider from config.
///
/// Currently only `"openai"` is supported (any OpenAI-compatible `/embeddings` endpoint).
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => {
            let provider = openai::OpenAiEmbeddings::new(config)?;
            Ok(Box::new(provider))
        }
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: openai"),
    }
}
