//! Shared HTTP plumbing for the provider clients.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Response};

use crate::error::ProviderError;

/// Build a pooled client with connect and total request timeouts.
pub fn request_client(connect_timeout_secs: u64, timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .timeout(Duration::from_secs(timeout_secs))
        .tcp_nodelay(true)
        .build()
        .context("failed to build HTTP client")
}

/// Build a client for long-lived streaming responses: no total timeout, only
/// a limit on how long the body may stay silent between chunks.
pub fn streaming_client(connect_timeout_secs: u64, idle_timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .read_timeout(Duration::from_secs(idle_timeout_secs))
        .tcp_nodelay(true)
        .build()
        .context("failed to build streaming HTTP client")
}

/// Pass 2xx responses through; turn anything else into a [`ProviderError`]
/// carrying the status and the provider's error message.
pub async fn check_status(provider: &str, response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "failed to read error response".to_owned());
    tracing::warn!(provider, status = status.as_u16(), "provider returned an error status");
    Err(ProviderError::from_status(provider, status.as_u16(), &body))
}
