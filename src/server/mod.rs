
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tracing::{debug, error, info};

use crate::chat::Orchestrator;
use crate::config::{ChunkingConfig, Config, ServerConfig};
use crate::generation::AnswerGenerator;
use crate::ingest::ChunkMetadata;
use crate::store::VectorStore;
use crate::{PortfolioError, Result};

const MAX_MESSAGE_CHARS: usize = 1000;
const SOURCE_CONTENT_LIMIT: usize = 500;

/// Shared application context handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RwLock<VectorStore>>,
    pub generator: Arc<AnswerGenerator>,
    pub orchestrator: Arc<Orchestrator>,
    pub data_file: PathBuf,
    pub chunking: ChunkingConfig,
    pub reload_token: Option<String>,
}

impl AppState {
    #[inline]
    pub fn new(
        store: Arc<RwLock<VectorStore>>,
        generator: Arc<AnswerGenerator>,
        orchestrator: Arc<Orchestrator>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            generator,
            orchestrator,
            data_file: config.paths.data_file.clone(),
            chunking: config.chunking,
            reload_token: config.server.reload_token.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Option<Vec<HistoryMessage>>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub sources: Vec<SourceDocument>,
}

#[derive(Debug, Serialize)]
pub struct SourceDocument {
    pub content: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub groq_status: String,
    pub vector_store_status: String,
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub status: String,
    pub message: String,
    pub documents_loaded: usize,
}

/// Error envelope returned by every handler: an HTTP status plus a
/// human-readable `detail` message.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    #[inline]
    pub fn new(status: StatusCode, detail: String) -> Self {
        Self { status, detail }
    }

    #[inline]
    pub fn internal(detail: String) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
    }
}

impl From<PortfolioError> for ApiError {
    #[inline]
    fn from(error: PortfolioError) -> Self {
        let status = match &error {
            PortfolioError::NotFound(_) => StatusCode::NOT_FOUND,
            PortfolioError::Auth => StatusCode::UNAUTHORIZED,
            PortfolioError::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.to_string())
    }
}

impl IntoResponse for ApiError {
    #[inline]
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, detail = %self.detail, "Request failed");
        } else {
            debug!(status = %self.status, detail = %self.detail, "Request rejected");
        }
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

#[inline]
pub fn create_router(state: AppState, server: &ServerConfig) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/chat", post(chat))
        .route("/health", get(health))
        .route("/reload-data", post(reload_data))
        .layer(cors_layer(server))
        .with_state(state)
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let origin = if server.allowed_origins.iter().any(|origin| origin == "*") {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(
            server
                .allowed_origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok()),
        )
    };

    let mut layer = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(AllowHeaders::mirror_request());
    if server.allow_credentials {
        layer = layer.allow_credentials(true);
    }
    layer
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Selamat datang di Portfolio Chatbot API!",
        "health": "/health"
    }))
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> std::result::Result<Json<ChatResponse>, ApiError> {
    let message_chars = request.message.chars().count();
    if message_chars == 0 || message_chars > MAX_MESSAGE_CHARS {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("Pesan harus antara 1 dan {MAX_MESSAGE_CHARS} karakter"),
        ));
    }
    if let Some(history) = &request.history {
        // Accepted for interface compatibility; retrieval is per-question.
        debug!("Ignoring {} history messages", history.len());
    }

    if !state.generator.is_initialized() {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "LLM Manager belum di-inisialisasi".to_string(),
        ));
    }
    if !state.store.read().await.is_ready().await {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "Vector store belum siap. Silakan reload data terlebih dahulu.".to_string(),
        ));
    }

    info!("Received chat request: {:.50}", request.message);

    match state.orchestrator.answer(&request.message).await {
        Ok(outcome) => {
            let sources = outcome
                .sources
                .into_iter()
                .map(|chunk| SourceDocument {
                    content: truncate_chars(&chunk.text, SOURCE_CONTENT_LIMIT),
                    metadata: chunk.metadata,
                })
                .collect();
            Ok(Json(ChatResponse {
                response: outcome.response,
                sources,
            }))
        }
        Err(error @ PortfolioError::NotInitialized) => Err(ApiError::from(error)),
        Err(error) => {
            error!("Chat error: {}", error);
            Err(ApiError::internal(format!(
                "Error memproses pertanyaan: {error}"
            )))
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let groq_initialized = state.generator.is_initialized();
    let store_status = if state.store.read().await.is_ready().await {
        StoreStatus::Ready
    } else {
        StoreStatus::Empty
    };

    Json(HealthResponse {
        status: derive_health(groq_initialized, store_status).to_string(),
        groq_status: if groq_initialized {
            "initialized".to_string()
        } else {
            "not_initialized".to_string()
        },
        vector_store_status: store_status.as_str().to_string(),
    })
}

async fn reload_data(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> std::result::Result<Json<ReloadResponse>, ApiError> {
    let Some(token) = &state.reload_token else {
        return Err(ApiError::internal(
            "Reload token belum dikonfigurasi di server".to_string(),
        ));
    };
    if !reload_token_matches(token, &headers) {
        return Err(ApiError::from(PortfolioError::Auth));
    }

    if !state.data_file.exists() {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!(
                "File portfolio tidak ditemukan: {}",
                state.data_file.display()
            ),
        ));
    }

    info!("Reloading portfolio data...");

    let count = {
        let mut store = state.store.write().await;
        store
            .reload(&state.data_file, state.chunking)
            .await
            .map_err(|error| {
                error!("Reload error: {}", error);
                match error {
                    PortfolioError::NotFound(path) => ApiError::new(
                        StatusCode::NOT_FOUND,
                        format!("File portfolio tidak ditemukan: {path}"),
                    ),
                    other => ApiError::internal(format!("Error reload data: {other}")),
                }
            })?
    };

    // The retrieval context changed; answer from the configured primary
    // model again.
    state.generator.reset();

    info!("Portfolio data reloaded successfully. Documents: {}", count);

    Ok(Json(ReloadResponse {
        status: "success".to_string(),
        message: "Data portfolio berhasil di-reload".to_string(),
        documents_loaded: count,
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    Ready,
    Empty,
    NotInitialized,
}

impl StoreStatus {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Empty => "empty",
            Self::NotInitialized => "not_initialized",
        }
    }
}

/// Healthy only when both collaborators are usable; a merely empty or
/// unconfigured dependency degrades rather than fails the service.
#[inline]
pub fn derive_health(generator_initialized: bool, store: StoreStatus) -> &'static str {
    if generator_initialized && store == StoreStatus::Ready {
        "healthy"
    } else if !generator_initialized
        || matches!(store, StoreStatus::Empty | StoreStatus::NotInitialized)
    {
        "degraded"
    } else {
        "unhealthy"
    }
}

/// The shared secret may arrive in a dedicated header or as a bearer token.
fn reload_token_matches(configured: &str, headers: &HeaderMap) -> bool {
    let presented = headers
        .get("x-reload-token")
        .and_then(|value| value.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
        });

    presented == Some(configured)
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

/// Bind and serve until shutdown.
#[inline]
pub async fn serve(state: AppState, server: &ServerConfig) -> Result<()> {
    let app = create_router(state, server);
    let address = format!("{}:{}", server.host, server.port);

    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("Listening on {}", address);

    axum::serve(listener, app).await?;

    Ok(())
}
