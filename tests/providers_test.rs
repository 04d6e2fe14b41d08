use futures::StreamExt;
use ragline::completion::openai::OpenAiCompletions;
use ragline::completion::{CompletionProvider, StreamState};
use ragline::config::{CompletionConfig, EmbeddingConfig, IndexConfig};
use ragline::embedding::openai::OpenAiEmbeddings;
use ragline::embedding::EmbeddingProvider;
use ragline::prompt::{Message, PromptPayload};
use ragline::retrieval::pinecone::PineconeIndex;
use ragline::retrieval::{MetadataValue, VectorIndex};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn embedding_config(server: &MockServer) -> EmbeddingConfig {
    EmbeddingConfig {
        base_url: server.uri(),
        api_key: "sk-test".into(),
        dimensions: 4,
        ..EmbeddingConfig::default()
    }
}

fn index_config(server: &MockServer) -> IndexConfig {
    IndexConfig {
        host: server.uri(),
        control_url: server.uri(),
        api_key: "pc-test".into(),
        ..IndexConfig::default()
    }
}

fn completion_config(server: &MockServer) -> CompletionConfig {
    CompletionConfig {
        base_url: server.uri(),
        api_key: "sk-test".into(),
        ..CompletionConfig::default()
    }
}

fn payload() -> PromptPayload {
    PromptPayload {
        system_instruction: "You help students pick professors.".into(),
        history: vec![Message::assistant("Hi! How can I help you today?")],
        augmented_user_message: "Who teaches algorithms?\n\nProfessor: Prof. A".into(),
    }
}

fn sse(events: &[&str]) -> String {
    events.iter().map(|e| format!("data: {e}\n\n")).collect()
}

fn delta(text: &str) -> String {
    serde_json::json!({
        "id": "chatcmpl-1",
        "object": "chat.completion.chunk",
        "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]
    })
    .to_string()
}

// ── Embeddings ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn embeds_query_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({
            "model": "text-embedding-3-small",
            "input": "Who teaches algorithms?",
            "encoding_format": "float"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "object": "list",
            "data": [{"object": "embedding", "index": 0, "embedding": [0.1, 0.2, 0.3, 0.4]}],
            "model": "text-embedding-3-small"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiEmbeddings::new(&embedding_config(&server)).unwrap();
    let vector = provider.embed("Who teaches algorithms?").await.unwrap();
    assert_eq!(vector, vec![0.1, 0.2, 0.3, 0.4]);
}

#[tokio::test]
async fn embedding_error_carries_status_and_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
            "error": {"message": "You exceeded your current quota", "type": "insufficient_quota"}
        })))
        .mount(&server)
        .await;

    let provider = OpenAiEmbeddings::new(&embedding_config(&server)).unwrap();
    let err = provider.embed("q").await.unwrap_err();
    assert_eq!(err.provider, "openai");
    assert_eq!(err.status, Some(429));
    assert_eq!(err.message, "You exceeded your current quota");
}

#[tokio::test]
async fn wrong_dimension_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{"index": 0, "embedding": [0.1, 0.2]}]
        })))
        .mount(&server)
        .await;

    let provider = OpenAiEmbeddings::new(&embedding_config(&server)).unwrap();
    let err = provider.embed("q").await.unwrap_err();
    assert!(err.message.contains("dimensions"), "{err}");
}

#[tokio::test]
async fn batch_results_follow_input_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0, 0.0, 0.0]},
                {"index": 0, "embedding": [1.0, 0.0, 0.0, 0.0]}
            ]
        })))
        .mount(&server)
        .await;

    let provider = OpenAiEmbeddings::new(&embedding_config(&server)).unwrap();
    let vectors = provider
        .embed_batch(&["first".to_string(), "second".to_string()])
        .await
        .unwrap();
    assert_eq!(vectors[0][0], 1.0);
    assert_eq!(vectors[1][1], 1.0);
}

// ── Vector index ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn query_maps_matches_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .and(header("Api-Key", "pc-test"))
        .and(body_partial_json(serde_json::json!({
            "topK": 5,
            "namespace": "ns1",
            "includeMetadata": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "matches": [
                {"id": "Prof. A", "score": 0.9, "metadata": {"subject": "CS", "review": "clear lectures", "stars": 5}},
                {"id": "Prof. B", "score": 0.8, "metadata": {"subject": "CS", "review": "tough grader", "stars": 2}},
                {"id": "Prof. C", "score": 0.4}
            ],
            "namespace": "ns1"
        })))
        .mount(&server)
        .await;

    let index = PineconeIndex::connect(&index_config(&server)).await.unwrap();
    let records = index.search(&[0.1, 0.2, 0.3, 0.4], 5, "ns1").await.unwrap();

    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["Prof. A", "Prof. B", "Prof. C"]);
    assert_eq!(records[0].metadata["review"], MetadataValue::Text("clear lectures".into()));
    assert_eq!(records[1].metadata["stars"], MetadataValue::Number(2.0));
    assert!(records[2].metadata.is_empty());
}

#[tokio::test]
async fn zero_matches_is_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "matches": [],
            "namespace": "ns1"
        })))
        .mount(&server)
        .await;

    let index = PineconeIndex::connect(&index_config(&server)).await.unwrap();
    let records = index.search(&[0.1], 5, "ns1").await.unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn index_failure_is_a_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let index = PineconeIndex::connect(&index_config(&server)).await.unwrap();
    let err = index.search(&[0.1], 5, "ns1").await.unwrap_err();
    assert_eq!(err.provider, "pinecone");
    assert_eq!(err.status, Some(500));
}

#[tokio::test]
async fn invalid_query_fails_without_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let index = PineconeIndex::connect(&index_config(&server)).await.unwrap();
    assert!(index.search(&[0.1], 0, "ns1").await.is_err());
    assert!(index.search(&[], 5, "ns1").await.is_err());
}

#[tokio::test]
async fn host_is_resolved_through_control_plane() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/indexes/rag"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "rag",
            "dimension": 1536,
            "metric": "cosine",
            "host": server.uri(),
            "status": {"ready": true, "state": "Ready"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = IndexConfig {
        host: String::new(),
        ..index_config(&server)
    };
    let index = PineconeIndex::connect(&config).await.unwrap();
    assert_eq!(index.host(), server.uri());
}

// ── Streaming completion ──────────────────────────────────────────────────────

#[tokio::test]
async fn streams_fragments_in_order() {
    let server = MockServer::start().await;
    let body = sse(&[
        r#"{"choices":[{"index":0,"delta":{"role":"assistant","content":""}}]}"#,
        &delta("Prof. A "),
        &delta("teaches "),
        &delta("algorithms."),
        r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
        "[DONE]",
    ]);
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({"model": "gpt-3.5-turbo", "stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = OpenAiCompletions::new(&completion_config(&server)).unwrap();
    let mut stream = provider.stream_completion(&payload()).await.unwrap();

    let mut fragments = Vec::new();
    while let Some(item) = stream.next().await {
        fragments.push(item.unwrap().into_string());
    }
    assert_eq!(fragments, vec!["Prof. A ", "teaches ", "algorithms."]);
    assert_eq!(stream.state(), StreamState::Completed);

    let requests = server.received_requests().await.unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(sent["messages"][0]["role"], "system");
    assert_eq!(sent["messages"][1]["role"], "assistant");
    assert_eq!(sent["messages"][2]["role"], "user");
    assert!(sent["messages"][2]["content"]
        .as_str()
        .unwrap()
        .starts_with("Who teaches algorithms?"));
}

#[tokio::test]
async fn error_event_after_two_fragments_ends_stream() {
    let server = MockServer::start().await;
    let body = sse(&[
        &delta("one "),
        &delta("two "),
        r#"{"error":{"message":"The server had an error while processing your request","type":"server_error"}}"#,
        &delta("three"),
        "[DONE]",
    ]);
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = OpenAiCompletions::new(&completion_config(&server)).unwrap();
    let mut stream = provider.stream_completion(&payload()).await.unwrap();

    assert_eq!(stream.next().await.unwrap().unwrap().as_str(), "one ");
    assert_eq!(stream.next().await.unwrap().unwrap().as_str(), "two ");
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(err.message.contains("server had an error"));
    assert!(stream.next().await.is_none());
    assert_eq!(stream.state(), StreamState::Failed);
    assert_eq!(stream.fragments(), 2);
}

#[tokio::test]
async fn truncated_body_is_a_failure() {
    let server = MockServer::start().await;
    let body = sse(&[&delta("partial answer")]);
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = OpenAiCompletions::new(&completion_config(&server)).unwrap();
    let mut stream = provider.stream_completion(&payload()).await.unwrap();

    assert_eq!(stream.next().await.unwrap().unwrap().as_str(), "partial answer");
    assert!(stream.next().await.unwrap().is_err());
    assert!(stream.next().await.is_none());
    assert_eq!(stream.state(), StreamState::Failed);
}

#[tokio::test]
async fn invalid_utf8_event_fails_the_stream() {
    let server = MockServer::start().await;
    let mut body = sse(&[&delta("clean ")]).into_bytes();
    body.extend_from_slice(b"data: {\"choices\":[{\"delta\":{\"content\":\"ab\xFFcd\"}}]}\n\n");
    body.extend_from_slice(sse(&[&delta("never relayed"), "[DONE]"]).as_bytes());
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = OpenAiCompletions::new(&completion_config(&server)).unwrap();
    let mut stream = provider.stream_completion(&payload()).await.unwrap();

    assert_eq!(stream.next().await.unwrap().unwrap().as_str(), "clean ");
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(err.message.contains("not valid UTF-8"), "{}", err.message);
    assert!(stream.next().await.is_none());
    assert_eq!(stream.state(), StreamState::Failed);
    assert_eq!(stream.fragments(), 1);
}

#[tokio::test]
async fn rejected_request_fails_before_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
        })))
        .mount(&server)
        .await;

    let provider = OpenAiCompletions::new(&completion_config(&server)).unwrap();
    let err = provider.stream_completion(&payload()).await.err().expect("request rejected");
    assert_eq!(err.status, Some(401));
    assert_eq!(err.message, "Incorrect API key provided");
}
