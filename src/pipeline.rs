//! Request pipeline: embed → search → assemble → stream.
//!
//! [`RagPipeline`] holds the three provider clients and the per-deployment
//! settings. It keeps no per-request state, so one instance serves any number
//! of concurrent requests.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};

use crate::completion::{self, CompletionProvider, StreamFragment};
use crate::config::RagConfig;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::{PipelineError, Stage};
use crate::prompt::{self, ContextFormat, Message, Role};
use crate::retrieval::{self, VectorIndex};

/// Answer stream handed to the caller. Mid-stream failures arrive as a final
/// `Err` tagged [`Stage::Completion`].
pub type AnswerStream = BoxStream<'static, Result<StreamFragment, PipelineError>>;

/// Per-deployment knobs passed to the providers on every request.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub top_k: usize,
    pub namespace: String,
    pub system_instruction: String,
    pub format: ContextFormat,
}

impl From<&RagConfig> for PipelineSettings {
    fn from(config: &RagConfig) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            namespace: config.index.namespace.clone(),
            system_instruction: config.retrieval.system_prompt.clone(),
            format: ContextFormat::from(&config.retrieval),
        }
    }
}

pub struct RagPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    completion: Arc<dyn CompletionProvider>,
    settings: PipelineSettings,
}

impl RagPipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        completion: Arc<dyn CompletionProvider>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            embedder,
            index,
            completion,
            settings,
        }
    }

    /// Build the production clients described by `config`.
    pub async fn from_config(config: &RagConfig) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> =
            Arc::from(embedding::create_provider(&config.embedding)?);
        let index: Arc<dyn VectorIndex> = Arc::from(retrieval::create_index(&config.index).await?);
        let completion: Arc<dyn CompletionProvider> =
            Arc::from(completion::create_provider(&config.completion)?);

        tracing::info!(
            embedder = embedder.name(),
            index = index.name(),
            completion = completion.name(),
            namespace = %config.index.namespace,
            top_k = config.retrieval.top_k,
            "pipeline ready"
        );

        Ok(Self::new(embedder, index, completion, PipelineSettings::from(config)))
    }

    /// Answer the last user message of `history`.
    ///
    /// Every failure before the first fragment (validation, embedding, search,
    /// or the completion request being rejected) is returned here as `Err`.
    /// Once `Ok`, the only possible failure is a terminal item on the stream.
    pub async fn handle_query(&self, history: &[Message]) -> Result<AnswerStream, PipelineError> {
        let query = validate_history(history)?;

        let started = Instant::now();
        let vector = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| PipelineError::provider(Stage::Embedding, e))?;
        tracing::debug!(
            dimensions = vector.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "embedded query"
        );

        let started = Instant::now();
        let records = self
            .index
            .search(&vector, self.settings.top_k, &self.settings.namespace)
            .await
            .map_err(|e| PipelineError::provider(Stage::Search, e))?;
        tracing::debug!(
            matches = records.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "retrieved context records"
        );

        let payload = prompt::build_prompt(
            history,
            query,
            &records,
            &self.settings.system_instruction,
            &self.settings.format,
        );

        let started = Instant::now();
        let stream = self
            .completion
            .stream_completion(&payload)
            .await
            .map_err(|e| PipelineError::provider(Stage::Completion, e))?;
        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "completion stream opened"
        );

        Ok(stream
            .map_err(|e| PipelineError::provider(Stage::Completion, e))
            .boxed())
    }
}

/// Check that `history` ends in a non-blank user message and return its content.
pub fn validate_history(history: &[Message]) -> Result<&str, PipelineError> {
    let last = history
        .last()
        .ok_or_else(|| PipelineError::Validation("conversation history is empty".into()))?;

    if last.role != Role::User {
        return Err(PipelineError::Validation(format!(
            "last message must come from the user, got {}",
            last.role
        )));
    }
    if last.content.trim().is_empty() {
        return Err(PipelineError::Validation("user message is empty".into()));
    }

    Ok(&last.content)
}
