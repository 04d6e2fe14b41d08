//! OpenAI-compatible streaming chat completion (`POST {base_url}/chat/completions`).

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::sse::SseDecoder;
use super::{CompletionProvider, CompletionStream, StreamFragment};
use crate::config::CompletionConfig;
use crate::error::ProviderError;
use crate::http;
use crate::prompt::{Message, PromptPayload};

const PROVIDER: &str = "openai";

/// Data payload that marks the end of a chat completion stream.
const DONE_MARKER: &str = "[DONE]";

pub struct OpenAiCompletions {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChunkError {
    message: String,
}

impl OpenAiCompletions {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        anyhow::ensure!(
            !config.api_key.is_empty(),
            "completion API key missing. Set OPENAI_API_KEY or completion.api_key."
        );
        Ok(Self {
            client: http::streaming_client(config.connect_timeout_secs, config.idle_timeout_secs)?,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompletions {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn stream_completion(&self, payload: &PromptPayload) -> Result<CompletionStream, ProviderError> {
        let request = ChatRequest {
            model: &self.model,
            messages: payload.to_messages(),
            stream: true,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        tracing::debug!(
            model = %self.model,
            messages = request.messages.len(),
            "requesting streamed completion"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER, &e))?;
        let response = http::check_status(PROVIDER, response).await?;

        let body = SseBody {
            bytes: response.bytes_stream().boxed(),
            decoder: SseDecoder::new(),
            finished: false,
        };
        let fragments = stream::unfold(body, |mut body| async move {
            let item = body.next_fragment().await?;
            Some((item, body))
        });

        Ok(CompletionStream::new(PROVIDER, fragments.boxed()))
    }
}

/// Pull state for one streamed response body.
struct SseBody {
    bytes: BoxStream<'static, reqwest::Result<Bytes>>,
    decoder: SseDecoder,
    finished: bool,
}

impl SseBody {
    /// Next non-empty fragment, the terminal error, or `None` after `[DONE]`.
    async fn next_fragment(&mut self) -> Option<Result<StreamFragment, ProviderError>> {
        if self.finished {
            return None;
        }

        loop {
            while let Some(data) = self.next_event() {
                let data = match data {
                    Ok(data) => data,
                    Err(err) => {
                        self.finished = true;
                        return Some(Err(err));
                    }
                };
                if data.trim() == DONE_MARKER {
                    self.finished = true;
                    return None;
                }
                match parse_chunk(&data) {
                    Ok(Some(text)) => return Some(Ok(StreamFragment::new(text))),
                    Ok(None) => continue,
                    Err(err) => {
                        self.finished = true;
                        return Some(Err(err));
                    }
                }
            }

            match self.bytes.next().await {
                Some(Ok(chunk)) => self.decoder.push(&chunk),
                Some(Err(err)) => {
                    self.finished = true;
                    return Some(Err(ProviderError::transport(PROVIDER, &err)));
                }
                None => {
                    self.finished = true;
                    let message = if self.decoder.pending().is_empty() {
                        "stream ended before the completion signal".to_owned()
                    } else {
                        format!(
                            "stream ended mid-event with {} unterminated byte(s)",
                            self.decoder.pending().len()
                        )
                    };
                    return Some(Err(ProviderError::new(PROVIDER, None, message)));
                }
            }
        }
    }

    /// Next decoded event, with invalid UTF-8 mapped to a provider error.
    fn next_event(&mut self) -> Option<Result<String, ProviderError>> {
        self.decoder
            .next_event()
            .map_err(|e| {
                ProviderError::new(PROVIDER, None, format!("stream event is not valid UTF-8: {e}"))
            })
            .transpose()
    }
}

/// Extract the text delta from one event. `Ok(None)` for events without text
/// (role announcements, finish reasons).
fn parse_chunk(data: &str) -> Result<Option<String>, ProviderError> {
    let chunk: ChatChunk = serde_json::from_str(data).map_err(|e| {
        ProviderError::new(PROVIDER, None, format!("malformed stream event: {e}"))
    })?;

    if let Some(error) = chunk.error {
        return Err(ProviderError::new(PROVIDER, None, error.message));
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|text| !text.is_empty()))
}
