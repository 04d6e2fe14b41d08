//! Vector index search.
//!
//! Provides the [`VectorIndex`] trait, the [`RetrievedRecord`] it returns, and a
//! Pinecone implementation. The index is created via [`create_index`] from
//! configuration.

pub mod pinecone;

use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Number of records retrieved per query when not configured.
pub const DEFAULT_TOP_K: usize = 5;

/// A metadata value attached to an index record, passed through verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    Number(f64),
    Bool(bool),
    List(Vec<String>),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::List(items) => f.write_str(&items.join(", ")),
        }
    }
}

/// A search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedRecord {
    pub id: String,
    /// Similarity as defined by the index metric (higher is closer).
    pub score: f32,
    #[serde(default)]
    pub metadata: BTreeMap<String, MetadataValue>,
}

/// A vector to write into the index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: BTreeMap<String, MetadataValue>,
}

/// Nearest-neighbour search over an external vector index.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Provider name for errors and logs.
    fn name(&self) -> &str;

    /// Return up to `top_k` records closest to `vector` within `namespace`,
    /// ordered by descending score. Zero matches is `Ok(vec![])`.
    /// Never mutates the index.
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: &str,
    ) -> Result<Vec<RetrievedRecord>, ProviderError>;

    /// Insert or overwrite records. Returns the number written.
    async fn upsert(&self, records: &[IndexRecord], namespace: &str) -> Result<usize, ProviderError>;
}

/// Create a vector index client from config.
///
/// Currently only `"pinecone"` is supported. When `index.host` is empty the data-plane
/// host is looked up through the control plane, which needs network access.
pub async fn create_index(
    config: &crate::config::IndexConfig,
) -> Result<Box<dyn VectorIndex>> {
    match config.provider.as_str() {
        "pinecone" => {
            let index = pinecone::PineconeIndex::connect(config).await?;
            Ok(Box::new(index))
        }
        other => anyhow::bail!("unknown index provider: {other}. Supported: pinecone"),
    }
}
