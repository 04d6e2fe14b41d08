//! CLI `ingest` command — embed records from a JSON file and upsert them into the index.
//!
//! Accepts either a top-level array of objects or an object holding the array
//! under `"reviews"` (or `"records"`). Each object's id field becomes the vector
//! id, its text field is embedded, and every scalar field except the id is kept
//! as metadata.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::Value;

use ragline::config::RagConfig;
use ragline::embedding;
use ragline::retrieval::pinecone::{PineconeControl, PineconeIndex};
use ragline::retrieval::{IndexRecord, MetadataValue, VectorIndex};

/// Texts sent per embedding call.
const EMBED_BATCH: usize = 32;

pub struct IngestOptions {
    pub id_field: String,
    pub text_field: String,
    pub create_index: bool,
}

/// One parsed input record, before embedding.
#[derive(Debug, PartialEq)]
pub struct IngestEntry {
    pub id: String,
    pub text: String,
    pub metadata: BTreeMap<String, MetadataValue>,
}

pub async fn ingest(config: &RagConfig, path: &Path, options: &IngestOptions) -> Result<()> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let json: Value = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse {} as JSON", path.display()))?;
    let entries = parse_entries(&json, options)?;

    if entries.is_empty() {
        println!("No records found in {}.", path.display());
        return Ok(());
    }
    println!("Loaded {} record(s) from {}", entries.len(), path.display());

    if options.create_index {
        let control = PineconeControl::new(&config.index)?;
        let created = control
            .create_index(
                &config.index.name,
                config.embedding.dimensions,
                &config.index.metric,
                &config.index.cloud,
                &config.index.region,
            )
            .await?;
        if created {
            println!("Created index '{}', waiting for it to become ready...", config.index.name);
            control
                .wait_until_ready(&config.index.name, 30, Duration::from_secs(2))
                .await?;
        }
    }

    let embedder = embedding::create_provider(&config.embedding)?;
    let index = PineconeIndex::connect(&config.index).await?;

    let pb = super::progress_bar(entries.len() as u64);
    let mut records = Vec::with_capacity(entries.len());
    for chunk in entries.chunks(EMBED_BATCH) {
        let texts: Vec<String> = chunk.iter().map(|e| e.text.clone()).collect();
        let vectors = embedder
            .embed_batch(&texts)
            .await
            .context("embedding failed")?;
        for (entry, values) in chunk.iter().zip(vectors) {
            records.push(IndexRecord {
                id: entry.id.clone(),
                values,
                metadata: entry.metadata.clone(),
            });
        }
        pb.inc(chunk.len() as u64);
    }
    pb.finish_and_clear();

    let written = index
        .upsert(&records, &config.index.namespace)
        .await
        .context("upsert failed")?;
    println!(
        "Upserted {written} vector(s) into '{}' (namespace '{}')",
        config.index.name, config.index.namespace
    );

    let stats = index.describe_index_stats().await?;
    println!();
    println!("Index stats:");
    println!("  Dimension:       {}", stats.dimension);
    println!("  Total vectors:   {}", stats.total_vector_count);
    for (namespace, ns) in &stats.namespaces {
        println!("  {namespace:<16} {} vector(s)", ns.vector_count);
    }

    Ok(())
}

/// Pull the record list out of the file and convert each object.
pub fn parse_entries(json: &Value, options: &IngestOptions) -> Result<Vec<IngestEntry>> {
    let items = match json {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("reviews").or_else(|| map.get("records")) {
            Some(Value::Array(items)) => items,
            _ => bail!("expected a top-level array or a \"reviews\" array"),
        },
        _ => bail!("expected a top-level array or a \"reviews\" array"),
    };

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            parse_entry(item, options).with_context(|| format!("record #{i} is invalid"))
        })
        .collect()
}

fn parse_entry(item: &Value, options: &IngestOptions) -> Result<IngestEntry> {
    let Value::Object(fields) = item else {
        bail!("not a JSON object");
    };

    let id = match fields.get(&options.id_field) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => bail!("missing id field '{}'", options.id_field),
    };
    let text = match fields.get(&options.text_field) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        _ => bail!("missing text field '{}'", options.text_field),
    };

    let mut metadata = BTreeMap::new();
    for (key, value) in fields {
        if key == &options.id_field {
            continue;
        }
        match to_metadata(value) {
            Some(v) => {
                metadata.insert(key.clone(), v);
            }
            None => tracing::warn!(record = %id, field = %key, "skipping non-scalar metadata field"),
        }
    }

    Ok(IngestEntry { id, text, metadata })
}

fn to_metadata(value: &Value) -> Option<MetadataValue> {
    match value {
        Value::String(s) => Some(MetadataValue::Text(s.clone())),
        Value::Number(n) => n.as_f64().map(MetadataValue::Number),
        Value::Bool(b) => Some(MetadataValue::Bool(*b)),
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_owned))
            .collect::<Option<Vec<_>>>()
            .map(MetadataValue::List),
        Value::Null | Value::Object(_) => None,
    }
}
