#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! End-to-end tests over the HTTP router with stubbed embedding and
//! generation backends.

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use portfolio_chat::Result;
use portfolio_chat::chat::Orchestrator;
use portfolio_chat::config::Config;
use portfolio_chat::embeddings::Embedder;
use portfolio_chat::generation::{AnswerGenerator, CompletionClient, CompletionError};
use portfolio_chat::server::{AppState, create_router};
use portfolio_chat::store::{Retriever, VectorStore};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tokio::sync::RwLock;
use tower::ServiceExt;

#[derive(Debug, Clone)]
struct HashEmbedder;

fn hash_vector(text: &str) -> Vec<f32> {
    let mut values = [0.0f32; 8];
    for (i, byte) in text.to_lowercase().bytes().enumerate() {
        values[(byte as usize + i) % 8] += f32::from(byte % 31);
    }
    let norm = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut values {
            *value /= norm;
        }
    }
    values.to_vec()
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(hash_vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| hash_vector(text)).collect())
    }
}

struct StubCompletion {
    answer: String,
    calls: AtomicUsize,
}

#[async_trait]
impl CompletionClient for StubCompletion {
    async fn complete(
        &self,
        _model: &str,
        _prompt: &str,
    ) -> std::result::Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.clone())
    }
}

struct TestApp {
    router: Router,
    completion: Arc<StubCompletion>,
    _index_dir: TempDir,
    _data_dir: TempDir,
}

async fn build_app(with_data: bool, reload_token: Option<&str>) -> TestApp {
    let index_dir = TempDir::new().expect("should create index dir");
    let data_dir = TempDir::new().expect("should create data dir");

    let data_file = data_dir.path().join("portfolio.json");
    std::fs::write(
        &data_file,
        r#"{
            "personal_info": {
                "name": "Budi Santoso",
                "title": "Backend Engineer",
                "email": "a@b.com"
            },
            "skills": {"Backend": ["Rust", "Go"]},
            "projects": [{"name": "chat-service", "description": "Layanan chat real-time."}]
        }"#,
    )
    .expect("should write data file");

    let mut config = Config::default();
    config.groq.api_key = "test-key".to_string();
    config.paths.data_file = data_file;
    config.paths.index_dir = index_dir.path().to_path_buf();
    config.server.reload_token = reload_token.map(str::to_string);

    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder);
    let mut store = VectorStore::open(&config.paths.index_dir, embedder)
        .await
        .expect("should open store");
    if with_data {
        store
            .reload(&config.paths.data_file, config.chunking)
            .await
            .expect("should build index");
    }
    let store = Arc::new(RwLock::new(store));

    let completion = Arc::new(StubCompletion {
        answer: "Jawaban dari model".to_string(),
        calls: AtomicUsize::new(0),
    });
    let generator = Arc::new(AnswerGenerator::new(
        Arc::clone(&completion) as Arc<dyn CompletionClient>,
        &config.groq,
    ));
    let retriever = Arc::new(Retriever::new(Arc::clone(&store), config.retrieval.k));
    let orchestrator = Arc::new(Orchestrator::new(retriever, Arc::clone(&generator)));

    let state = AppState::new(store, generator, orchestrator, &config);
    let router = create_router(state, &config.server);

    TestApp {
        router,
        completion,
        _index_dir: index_dir,
        _data_dir: data_dir,
    }
}

async fn send_json(router: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("should build request");
    send(router, request).await
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("request should not fail");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("should read body");
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("should build request");
    send(router, request).await
}

#[tokio::test]
async fn root_returns_welcome() {
    let app = build_app(true, None).await;
    let (status, body) = get(&app.router, "/").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Selamat datang di Portfolio Chatbot API!");
}

#[tokio::test]
async fn health_is_healthy_with_data_and_key() {
    let app = build_app(true, None).await;
    let (status, body) = get(&app.router, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["groq_status"], "initialized");
    assert_eq!(body["vector_store_status"], "ready");
}

#[tokio::test]
async fn health_degrades_with_empty_index() {
    let app = build_app(false, None).await;
    let (status, body) = get(&app.router, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["groq_status"], "initialized");
    assert_eq!(body["vector_store_status"], "empty");
}

#[tokio::test]
async fn chat_rejects_empty_and_oversized_messages() {
    let app = build_app(true, None).await;

    let (status, _) = send_json(&app.router, "POST", "/chat", json!({"message": ""})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let long = "x".repeat(1001);
    let (status, _) = send_json(&app.router, "POST", "/chat", json!({"message": long})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chat_unavailable_until_index_is_built() {
    let app = build_app(false, None).await;

    let (status, body) = send_json(
        &app.router,
        "POST",
        "/chat",
        json!({"message": "apa saja proyek kamu?"}),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(
        body["detail"]
            .as_str()
            .expect("detail should be a string")
            .contains("Vector store belum siap")
    );
}

#[tokio::test]
async fn chat_greeting_shortcut_returns_no_sources() {
    let app = build_app(true, None).await;

    let (status, body) =
        send_json(&app.router, "POST", "/chat", json!({"message": "halo"})).await;

    assert_eq!(status, StatusCode::OK);
    assert!(
        body["response"]
            .as_str()
            .expect("response should be a string")
            .starts_with("Halo!")
    );
    assert_eq!(body["sources"], json!([]));
    assert_eq!(app.completion.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn chat_contact_shortcut_extracts_fields() {
    let app = build_app(true, None).await;

    let (status, body) = send_json(
        &app.router,
        "POST",
        "/chat",
        json!({"message": "apa email kamu?"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let response = body["response"].as_str().expect("response string");
    assert!(response.contains("Email: a@b.com"));
    assert!(!body["sources"].as_array().expect("sources array").is_empty());
    // Extraction answered without consulting the generation model.
    assert_eq!(app.completion.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn chat_standard_path_uses_the_model_and_reports_sources() {
    let app = build_app(true, None).await;

    let (status, body) = send_json(
        &app.router,
        "POST",
        "/chat",
        json!({"message": "ceritakan tentang proyek chat-service yang pernah dibuat"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "Jawaban dari model");
    assert_eq!(app.completion.calls.load(Ordering::SeqCst), 1);
    let sources = body["sources"].as_array().expect("sources array");
    assert!(!sources.is_empty());
    assert!(sources.len() <= 3);
    for source in sources {
        assert!(source["metadata"]["type"].is_string());
        assert!(
            source["content"]
                .as_str()
                .expect("content string")
                .chars()
                .count()
                <= 500
        );
    }
}

#[tokio::test]
async fn chat_accepts_unused_history() {
    let app = build_app(true, None).await;

    let (status, _) = send_json(
        &app.router,
        "POST",
        "/chat",
        json!({
            "message": "apa saja keahlian backend yang dikuasai?",
            "history": [{"role": "user", "content": "halo"}]
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn reload_requires_a_configured_token() {
    let app = build_app(true, None).await;

    let (status, _) = send_json(&app.router, "POST", "/reload-data", json!({})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn reload_rejects_bad_tokens() {
    let app = build_app(true, Some("secret")).await;

    let request = Request::builder()
        .method("POST")
        .uri("/reload-data")
        .header("x-reload-token", "wrong")
        .body(Body::empty())
        .expect("should build request");
    let (status, _) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn reload_rebuilds_and_recovers_a_degraded_service() {
    let app = build_app(false, Some("secret")).await;

    let (status, body) = get(&app.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");

    let request = Request::builder()
        .method("POST")
        .uri("/reload-data")
        .header(header::AUTHORIZATION, "Bearer secret")
        .body(Body::empty())
        .expect("should build request");
    let (status, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert!(body["documents_loaded"].as_u64().expect("count") > 0);

    let (_, body) = get(&app.router, "/health").await;
    assert_eq!(body["status"], "healthy");
}
