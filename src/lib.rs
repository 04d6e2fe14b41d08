//! Retrieval-augmented chat: embed the user's question, pull the closest
//! records from a vector index, and stream a grounded answer back.
//!
//! A request flows through one [`pipeline::RagPipeline`]:
//!
//! 1. [`embedding`] turns the latest user message into a vector.
//! 2. [`retrieval`] fetches the top-K nearest records from the index.
//! 3. [`prompt`] appends those records to the question and adds the system
//!    instruction and earlier turns.
//! 4. [`completion`] streams the model's answer fragment by fragment.
//!
//! Failures before the first fragment come back as a single
//! [`error::PipelineError`]; a failure mid-answer is the stream's last item.
//!
//! # Modules
//!
//! - [`config`] — Configuration loading from TOML files and environment variables
//! - [`error`] — Provider and pipeline error types
//! - [`server`] — axum HTTP server exposing `POST /api/chat`

pub mod completion;
pub mod config;
pub mod embedding;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod prompt;
pub mod retrieval;
pub mod server;
