//! CLI `ask` command — run one question through the pipeline and print the answer as it streams.

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use ragline::config::RagConfig;
use ragline::pipeline::RagPipeline;
use ragline::prompt::Message;

pub async fn ask(config: &RagConfig, question: &str) -> Result<()> {
    let pipeline = RagPipeline::from_config(config).await?;
    let history = vec![Message::user(question)];

    let mut answer = pipeline.handle_query(&history).await?;
    let mut stdout = tokio::io::stdout();

    while let Some(fragment) = answer.next().await {
        let fragment = fragment.context("answer stream interrupted")?;
        stdout.write_all(fragment.as_str().as_bytes()).await?;
        stdout.flush().await?;
    }

    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}
