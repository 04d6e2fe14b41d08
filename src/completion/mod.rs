//! Streaming chat completion.
//!
//! A [`CompletionProvider`] turns a [`PromptPayload`] into a [`CompletionStream`]:
//! a lazy, finite, non-restartable sequence of [`StreamFragment`]s. Awaiting
//! [`CompletionProvider::stream_completion`] covers sending the request and
//! receiving the response head; everything after that arrives through the stream.
//!
//! The stream ends exactly once. A provider error is yielded as the last item and
//! every later poll returns `None`. Dropping the stream early cancels the request
//! and releases the connection.

pub mod openai;
pub mod sse;

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};

use crate::error::ProviderError;
use crate::prompt::PromptPayload;

/// One chunk of generated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFragment(String);

impl StreamFragment {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for StreamFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw fragment stream produced by a provider implementation.
pub type FragmentStream = BoxStream<'static, Result<StreamFragment, ProviderError>>;

/// Lifecycle of a [`CompletionStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Request accepted; fragments may still arrive.
    Streaming,
    /// The provider signalled end of output.
    Completed,
    /// The provider failed; the error has been yielded.
    Failed,
}

/// Fragment stream for one completion request.
///
/// Wraps the provider's raw stream and enforces termination: after the first
/// `None` or `Err`, the inner stream is dropped and nothing more is yielded.
pub struct CompletionStream {
    provider: String,
    inner: Option<FragmentStream>,
    state: StreamState,
    fragments: usize,
}

impl CompletionStream {
    pub fn new(provider: impl Into<String>, inner: FragmentStream) -> Self {
        Self {
            provider: provider.into(),
            inner: Some(inner),
            state: StreamState::Streaming,
            fragments: 0,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Fragments relayed so far.
    pub fn fragments(&self) -> usize {
        self.fragments
    }
}

impl Stream for CompletionStream {
    type Item = Result<StreamFragment, ProviderError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        match inner.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(fragment))) => {
                this.fragments += 1;
                Poll::Ready(Some(Ok(fragment)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.inner = None;
                this.state = StreamState::Failed;
                tracing::warn!(
                    provider = %this.provider,
                    fragments = this.fragments,
                    error = %err,
                    "completion stream failed"
                );
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.inner = None;
                this.state = StreamState::Completed;
                tracing::info!(
                    provider = %this.provider,
                    fragments = this.fragments,
                    "completion stream finished"
                );
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for CompletionStream {
    fn drop(&mut self) {
        if self.inner.is_some() {
            tracing::debug!(
                provider = %self.provider,
                fragments = self.fragments,
                "completion stream dropped before end, releasing provider connection"
            );
        }
    }
}

/// Streaming chat completion against an external language model.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Provider name for errors and logs.
    fn name(&self) -> &str;

    /// Send the prompt and return the answer stream once the provider has
    /// accepted the request. Each call is a new request.
    async fn stream_completion(&self, payload: &PromptPayload) -> Result<CompletionStream, ProviderError>;
}

/// Create a completion provider from config.
///
/// Currently only `"openai"` is supported (any OpenAI-compatible `/chat/completions` endpoint).
pub fn create_provider(
    config: &crate::config::CompletionConfig,
) -> Result<Box<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "openai" => {
            let provider = openai::OpenAiCompletions::new(config)?;
            Ok(Box::new(provider))
        }
        other => anyhow::bail!("unknown completion provider: {other}. Supported: openai"),
    }
}
