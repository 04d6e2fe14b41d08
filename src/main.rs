mod cli;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ragline::config::{self, RagConfig};
use ragline::server;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ragline", version, about = "Retrieval-augmented chat service")]
struct Cli {
    /// Config file (defaults to ~/.ragline/config.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP chat server
    Serve,
    /// Ask one question and stream the answer to stdout
    Ask {
        /// The question to answer
        question: String,
    },
    /// Embed records from a JSON file and upsert them into the index
    Ingest {
        /// JSON file: an array of objects, or {"reviews": [...]}
        file: PathBuf,
        /// Field used as the record id
        #[arg(long, default_value = "professor")]
        id_field: String,
        /// Field whose text is embedded
        #[arg(long, default_value = "review")]
        text_field: String,
        /// Create the index first if it does not exist
        #[arg(long)]
        create_index: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RagConfig::load_from(config::expand_tilde(path))?,
        None => RagConfig::load()?,
    };

    // Log to stderr so `ask` output on stdout stays clean.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve => {
            server::serve(config).await?;
        }
        Command::Ask { question } => {
            cli::ask::ask(&config, &question).await?;
        }
        Command::Ingest {
            file,
            id_field,
            text_field,
            create_index,
        } => {
            let options = cli::ingest::IngestOptions {
                id_field,
                text_field,
                create_index,
            };
            cli::ingest::ingest(&config, &file, &options).await?;
        }
    }

    Ok(())
}
