//! Gateway tests against a local OpenAI-compatible mock served by axum.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use balanced_rag::completion::{Completer, OpenAICompleter};
use balanced_rag::config::{CompletionConfig, EmbeddingConfig};
use balanced_rag::embedding::OpenAIEmbedder;
use balanced_rag_core::embedding::Embedder;
use balanced_rag_core::error::RagError;

/// Mock behavior: the first `rate_limited` calls get 429, later ones the
/// given status (200 serves a real payload).
#[derive(Clone)]
struct Mock {
    calls: Arc<AtomicUsize>,
    rate_limited: usize,
    then_status: u16,
    delay: Duration,
}

async fn embeddings(State(mock): State<Mock>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let call = mock.calls.fetch_add(1, Ordering::SeqCst);
    if call < mock.rate_limited {
        return (StatusCode::TOO_MANY_REQUESTS, Json(json!({"error": "slow down"})));
    }
    if mock.then_status != 200 {
        let status = StatusCode::from_u16(mock.then_status).unwrap();
        return (status, Json(json!({"error": "failed"})));
    }
    let inputs = body["input"].as_array().map(|a| a.len()).unwrap_or(0);
    let data: Vec<Value> = (0..inputs)
        .map(|i| json!({"index": i, "embedding": [i as f64, 1.0]}))
        .collect();
    (StatusCode::OK, Json(json!({ "data": data })))
}

async fn chat(State(mock): State<Mock>) -> Json<Value> {
    mock.calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(mock.delay).await;
    Json(json!({"choices": [{"message": {"role": "assistant", "content": "ok"}}]}))
}

async fn start_mock(mock: Mock) -> String {
    let app = Router::new()
        .route("/v1/embeddings", post(embeddings))
        .route("/v1/chat/completions", post(chat))
        .with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{}/v1", addr)
}

fn mock(rate_limited: usize, then_status: u16) -> Mock {
    Mock {
        calls: Arc::new(AtomicUsize::new(0)),
        rate_limited,
        then_status,
        delay: Duration::ZERO,
    }
}

fn embedding_config(base_url: &str, max_retries: u32) -> EmbeddingConfig {
    EmbeddingConfig {
        provider: "openai".to_string(),
        model: Some("text-embedding-3-small".to_string()),
        dims: Some(2),
        max_retries,
        base_url: base_url.to_string(),
        ..Default::default()
    }
}

fn texts(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("passage {}", i)).collect()
}

#[tokio::test]
async fn test_rate_limit_is_retried_until_success() {
    let m = mock(2, 200);
    let base = start_mock(m.clone()).await;
    let embedder = OpenAIEmbedder::new(&embedding_config(&base, 3), "test-key")
        .unwrap()
        .with_backoff_base(Duration::from_millis(5));

    let vectors = embedder.embed_batch(&texts(3)).await.unwrap();
    assert_eq!(vectors.len(), 3);
    assert_eq!(vectors[2], vec![2.0, 1.0]);
    assert_eq!(m.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_rate_limit_gives_up_after_max_retries() {
    let m = mock(10, 200);
    let base = start_mock(m.clone()).await;
    let embedder = OpenAIEmbedder::new(&embedding_config(&base, 2), "test-key")
        .unwrap()
        .with_backoff_base(Duration::from_millis(5));

    let err = embedder.embed_batch(&texts(1)).await.unwrap_err();
    assert!(matches!(err, RagError::UpstreamFailure { .. }));
    assert_eq!(m.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let m = mock(0, 500);
    let base = start_mock(m.clone()).await;
    let embedder = OpenAIEmbedder::new(&embedding_config(&base, 3), "test-key")
        .unwrap()
        .with_backoff_base(Duration::from_millis(5));

    let err = embedder.embed_batch(&texts(1)).await.unwrap_err();
    assert!(err.to_string().contains("500"));
    assert_eq!(m.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_slow_completion_is_timeout() {
    let m = Mock {
        delay: Duration::from_millis(500),
        ..mock(0, 200)
    };
    let base = start_mock(m).await;
    let config = CompletionConfig {
        provider: "openai".to_string(),
        timeout_ms: 100,
        base_url: base,
        ..Default::default()
    };
    let completer = OpenAICompleter::new(&config, "test-key").unwrap();

    let err = completer.complete("system", "user").await.unwrap_err();
    assert!(matches!(err, RagError::UpstreamTimeout { timeout_ms: 100, .. }));
    assert!(err.is_retriable());
}

#[tokio::test]
async fn test_completion_returns_message_content() {
    let base = start_mock(mock(0, 200)).await;
    let config = CompletionConfig {
        provider: "openai".to_string(),
        base_url: base,
        ..Default::default()
    };
    let completer = OpenAICompleter::new(&config, "test-key").unwrap();

    assert_eq!(completer.complete("system", "user").await.unwrap(), "ok");
}
