#![allow(dead_code)]

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use ragline::completion::{CompletionProvider, CompletionStream, StreamFragment};
use ragline::embedding::EmbeddingProvider;
use ragline::error::{PipelineError, ProviderError};
use ragline::pipeline::{AnswerStream, PipelineSettings, RagPipeline};
use ragline::prompt::{ContextFormat, PromptPayload};
use ragline::retrieval::{IndexRecord, MetadataValue, RetrievedRecord, VectorIndex};

pub const TEST_SYSTEM_PROMPT: &str = "You help students pick professors.";

/// Embedder returning a fixed 4-dim vector and recording every input.
#[derive(Default)]
pub struct FakeEmbedder {
    pub inputs: Mutex<Vec<String>>,
    pub fail: Option<ProviderError>,
}

impl FakeEmbedder {
    pub fn failing(err: ProviderError) -> Self {
        Self {
            fail: Some(err),
            ..Self::default()
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    fn name(&self) -> &str {
        "fake-embedder"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.inputs.lock().unwrap().push(text.to_owned());
        match &self.fail {
            Some(err) => Err(err.clone()),
            None => Ok(vec![0.1, 0.2, 0.3, 0.4]),
        }
    }

    fn dimensions(&self) -> usize {
        4
    }
}

/// Index returning canned records and recording `(top_k, namespace)` per query.
#[derive(Default)]
pub struct FakeIndex {
    pub records: Vec<RetrievedRecord>,
    pub queries: Mutex<Vec<(usize, String)>>,
    pub fail: Option<ProviderError>,
}

impl FakeIndex {
    pub fn with_records(records: Vec<RetrievedRecord>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    pub fn failing(err: ProviderError) -> Self {
        Self {
            fail: Some(err),
            ..Self::default()
        }
    }
}

#[async_trait]
impl VectorIndex for FakeIndex {
    fn name(&self) -> &str {
        "fake-index"
    }

    async fn search(
        &self,
        _vector: &[f32],
        top_k: usize,
        namespace: &str,
    ) -> Result<Vec<RetrievedRecord>, ProviderError> {
        self.queries.lock().unwrap().push((top_k, namespace.to_owned()));
        match &self.fail {
            Some(err) => Err(err.clone()),
            None => Ok(self.records.iter().take(top_k).cloned().collect()),
        }
    }

    async fn upsert(&self, records: &[IndexRecord], _namespace: &str) -> Result<usize, ProviderError> {
        Ok(records.len())
    }
}

/// One scripted step of a fake completion stream.
#[derive(Clone)]
pub enum Step {
    Text(&'static str),
    Fail(&'static str),
}

/// Completion provider replaying a script and recording every payload.
///
/// `polls` counts polls of the provider-side stream and `released` flips once
/// that stream (the stand-in for the HTTP connection) is dropped.
#[derive(Default)]
pub struct ScriptedCompletion {
    pub script: Vec<Step>,
    pub payloads: Mutex<Vec<PromptPayload>>,
    pub reject: Option<ProviderError>,
    pub polls: Arc<AtomicUsize>,
    pub released: Arc<AtomicBool>,
}

impl ScriptedCompletion {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    pub fn rejecting(err: ProviderError) -> Self {
        Self {
            reject: Some(err),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// Provider-side stream that records polls and its own drop.
struct Tracked {
    inner: BoxStream<'static, Result<StreamFragment, ProviderError>>,
    polls: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
}

impl Stream for Tracked {
    type Item = Result<StreamFragment, ProviderError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompletion {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_completion(&self, payload: &PromptPayload) -> Result<CompletionStream, ProviderError> {
        self.payloads.lock().unwrap().push(payload.clone());
        if let Some(err) = &self.reject {
            return Err(err.clone());
        }

        let items: Vec<Result<StreamFragment, ProviderError>> = self
            .script
            .iter()
            .map(|step| match step {
                Step::Text(text) => Ok(StreamFragment::new(*text)),
                Step::Fail(msg) => Err(ProviderError::new("scripted", None, *msg)),
            })
            .collect();
        let tracked = Tracked {
            inner: stream::iter(items).boxed(),
            polls: self.polls.clone(),
            released: self.released.clone(),
        };
        Ok(CompletionStream::new("scripted", tracked.boxed()))
    }
}

pub fn settings() -> PipelineSettings {
    PipelineSettings {
        top_k: 5,
        namespace: "ns1".into(),
        system_instruction: TEST_SYSTEM_PROMPT.into(),
        format: ContextFormat::default(),
    }
}

pub fn pipeline(
    embedder: Arc<FakeEmbedder>,
    index: Arc<FakeIndex>,
    completion: Arc<ScriptedCompletion>,
) -> RagPipeline {
    RagPipeline::new(embedder, index, completion, settings())
}

pub fn record(id: &str, score: f32, fields: &[(&str, &str)]) -> RetrievedRecord {
    RetrievedRecord {
        id: id.into(),
        score,
        metadata: fields
            .iter()
            .map(|(k, v)| (k.to_string(), MetadataValue::Text(v.to_string())))
            .collect::<BTreeMap<_, _>>(),
    }
}

/// Drain an answer stream: concatenated text, fragment count, terminal error.
pub async fn drain(mut answer: AnswerStream) -> (String, usize, Option<PipelineError>) {
    let mut text = String::new();
    let mut count = 0;
    let mut error = None;
    while let Some(item) = answer.next().await {
        match item {
            Ok(fragment) => {
                assert!(error.is_none(), "fragment after terminal error");
                count += 1;
                text.push_str(fragment.as_str());
            }
            Err(err) => {
                assert!(error.is_none(), "more than one terminal error");
                error = Some(err);
            }
        }
    }
    (text, count, error)
}
