//! Error types shared by the provider clients and the pipeline.
//!
//! [`ProviderError`] is what every external client (embedding, vector index,
//! completion) returns. [`PipelineError`] is what callers of
//! [`crate::pipeline::RagPipeline`] see: either the request was invalid, or a
//! provider failed at a known [`Stage`].

use std::fmt;

use thiserror::Error;

/// Failure reported by an external provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{provider} request failed{}: {message}", format_status(.status))]
pub struct ProviderError {
    /// Provider name, e.g. `"openai"` or `"pinecone"`.
    pub provider: String,
    /// HTTP status, when the provider answered at all.
    pub status: Option<u16>,
    pub message: String,
}

fn format_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" ({code})"),
        None => String::new(),
    }
}

impl ProviderError {
    pub fn new(provider: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            status,
            message: message.into(),
        }
    }

    /// Build from a non-2xx response body. Uses the provider's `error.message`
    /// (or top-level `message`) field when the body is JSON, the raw body otherwise.
    pub fn from_status(provider: impl Into<String>, status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|value| {
                value
                    .pointer("/error/message")
                    .or_else(|| value.get("message"))
                    .and_then(|m| m.as_str())
                    .map(str::to_owned)
            })
            .unwrap_or_else(|| {
                let trimmed = body.trim();
                if trimmed.is_empty() {
                    "empty response body".to_owned()
                } else {
                    trimmed.to_owned()
                }
            });
        Self::new(provider, Some(status), message)
    }

    /// Build from a transport-level failure (connect, timeout, body read).
    pub fn transport(provider: impl Into<String>, err: &reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("timed out: {err}")
        } else {
            err.to_string()
        };
        Self::new(provider, err.status().map(|s| s.as_u16()), message)
    }
}

/// Pipeline step at which a provider failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Embedding,
    Search,
    Completion,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Embedding => "embedding",
            Self::Search => "search",
            Self::Completion => "completion",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error surfaced by [`crate::pipeline::RagPipeline::handle_query`] and by the
/// answer stream it returns.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The conversation history is malformed. Caller's fault.
    #[error("invalid conversation: {0}")]
    Validation(String),

    /// An external provider failed at `stage`.
    #[error("{stage} stage failed: {source}")]
    Provider {
        stage: Stage,
        #[source]
        source: ProviderError,
    },
}

impl PipelineError {
    pub fn provider(stage: Stage, source: ProviderError) -> Self {
        Self::Provider { stage, source }
    }

    /// The failing stage, or `None` for validation errors.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Validation(_) => None,
            Self::Provider { stage, .. } => Some(*stage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_status_extracts_nested_error_message() {
        let body = r#"{"error":{"message":"Rate limit reached","type":"requests"}}"#;
        let err = ProviderError::from_status("openai", 429, body);
        assert_eq!(err.status, Some(429));
        assert_eq!(err.message, "Rate limit reached");
        assert_eq!(err.to_string(), "openai request failed (429): Rate limit reached");
    }

    #[test]
    fn from_status_extracts_top_level_message() {
        let err = ProviderError::from_status("pinecone", 404, r#"{"code":5,"message":"Namespace not found"}"#);
        assert_eq!(err.message, "Namespace not found");
    }

    #[test]
    fn from_status_falls_back_to_raw_body() {
        let err = ProviderError::from_status("pinecone", 503, "  upstream unavailable \n");
        assert_eq!(err.message, "upstream unavailable");

        let empty = ProviderError::from_status("pinecone", 503, "");
        assert_eq!(empty.message, "empty response body");
    }

    #[test]
    fn display_without_status() {
        let err = ProviderError::new("openai", None, "connection refused");
        assert_eq!(err.to_string(), "openai request failed: connection refused");
    }

    #[test]
    fn pipeline_error_reports_stage() {
        let err = PipelineError::provider(Stage::Search, ProviderError::new("pinecone", Some(500), "boom"));
        assert_eq!(err.stage(), Some(Stage::Search));
        assert_eq!(
            err.to_string(),
            "search stage failed: pinecone request failed (500): boom"
        );
        assert_eq!(PipelineError::Validation("empty".into()).stage(), None);
    }
}
