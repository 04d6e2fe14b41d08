//! HTTP server for the chat endpoint.
//!
//! Provides [`router`] (used directly by tests) and [`serve`], which binds the
//! configured address and runs until ctrl-c.

use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::Instrument;

use crate::config::RagConfig;
use crate::error::PipelineError;
use crate::pipeline::RagPipeline;
use crate::prompt::Message;

#[derive(Clone)]
struct AppState {
    pipeline: Arc<RagPipeline>,
}

/// Routes: `POST /api/chat` and `GET /health`.
pub fn router(pipeline: Arc<RagPipeline>) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/health", get(health))
        .with_state(AppState { pipeline })
}

async fn health() -> &'static str {
    "ok"
}

/// Stream the answer for a conversation as UTF-8 text.
///
/// Everything logged while answering, including the completion stream's own
/// lines, runs inside a `chat` span carrying the request id.
async fn chat(
    State(state): State<AppState>,
    Json(history): Json<Vec<Message>>,
) -> Result<Response, PipelineError> {
    let request_id = uuid::Uuid::now_v7();
    let span = tracing::info_span!("chat", %request_id);
    tracing::info!(parent: &span, turns = history.len(), "chat request");

    let mut answer = state
        .pipeline
        .handle_query(&history)
        .instrument(span.clone())
        .await
        .map_err(|err| {
            tracing::warn!(parent: &span, error = %err, "chat request failed before streaming");
            err
        })?;

    // The body is polled by the connection task, outside the handler's future.
    let fragments = stream::poll_fn(move |cx| {
        let _entered = span.enter();
        answer.poll_next_unpin(cx)
    });
    let body = Body::from_stream(fragments.map_ok(|fragment| Bytes::from(fragment.into_string())));
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response())
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = match &self {
            PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
            PipelineError::Provider { .. } => StatusCode::BAD_GATEWAY,
        };
        let body = serde_json::json!({
            "error": self.to_string(),
            "stage": self.stage().map(|s| s.as_str()),
        });
        (status, Json(body)).into_response()
    }
}

/// Start the HTTP server on the configured address.
pub async fn serve(config: RagConfig) -> Result<()> {
    let bind_addr = config.bind_addr();
    tracing::info!(addr = %bind_addr, "starting ragline HTTP server");

    let pipeline = Arc::new(RagPipeline::from_config(&config).await?);
    let app = router(pipeline);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "chat endpoint listening at http://{bind_addr}/api/chat");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutting down HTTP server");
        })
        .await?;

    Ok(())
}
