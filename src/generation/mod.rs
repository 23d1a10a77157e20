
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::GroqConfig;
use crate::{PortfolioError, Result};

const DEFAULT_TIMEOUT_SECONDS: u64 = 60;

/// Per-attempt failure classes. Only the first two advance the fallback
/// roster; everything else surfaces immediately.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("completion failed: {0}")]
    Failed(String),
}

/// Remote completion endpoint, injectable for tests.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
    ) -> std::result::Result<String, CompletionError>;
}

/// Groq chat-completions client (OpenAI-compatible wire format).
#[derive(Debug, Clone)]
pub struct GroqClient {
    api_url: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: String,
}

impl GroqClient {
    #[inline]
    pub fn new(config: &GroqConfig) -> Self {
        // Non-2xx statuses come back as readable responses so failures can
        // be classified from the body, not just the status line.
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)))
            .http_status_as_error(false)
            .build()
            .into();

        Self {
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            agent,
        }
    }

    fn complete_blocking(
        &self,
        model: &str,
        prompt: &str,
    ) -> std::result::Result<String, CompletionError> {
        let request = ChatCompletionRequest {
            model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };
        let request_json = serde_json::to_string(&request)
            .map_err(|e| CompletionError::Failed(format!("Failed to serialize request: {e}")))?;

        debug!("Requesting completion from model {}", model);

        let auth = format!("Bearer {}", self.api_key.trim());
        let mut response = self
            .agent
            .post(self.api_url.as_str())
            .header("Authorization", auth.as_str())
            .header("Content-Type", "application/json")
            .send(&request_json)
            .map_err(|e| CompletionError::Failed(format!("Completion request failed: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| CompletionError::Failed(format!("Failed to read response body: {e}")))?;

        if !(200..300).contains(&status) {
            return Err(classify_failure(status, &body));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&body)
            .map_err(|e| CompletionError::Failed(format!("Failed to parse response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| CompletionError::Failed("Response contained no choices".to_string()))
    }
}

#[async_trait]
impl CompletionClient for GroqClient {
    #[inline]
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
    ) -> std::result::Result<String, CompletionError> {
        let client = self.clone();
        let model = model.to_string();
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || client.complete_blocking(&model, &prompt))
            .await
            .map_err(|e| CompletionError::Failed(format!("Completion task failed: {e}")))?
    }
}

/// Sort a failed completion into the class that decides whether the
/// fallback roster advances.
fn classify_failure(status: u16, body: &str) -> CompletionError {
    let lower = body.to_lowercase();

    if status == 429
        || lower.contains("rate_limit")
        || lower.contains("rate limit")
        || lower.contains("over capacity")
        || lower.contains("resource exhausted")
    {
        return CompletionError::RateLimited(format!("HTTP {status}: {body}"));
    }

    if status == 404
        || lower.contains("model_not_found")
        || lower.contains("model_decommissioned")
        || lower.contains("does not exist")
        || lower.contains("unsupported model")
    {
        return CompletionError::ModelUnavailable(format!("HTTP {status}: {body}"));
    }

    CompletionError::Failed(format!("HTTP {status}: {body}"))
}

/// Drives the completion client through an ordered candidate list: the
/// sticky current model first, then the fixed fallback roster. A model that
/// answers stays current for subsequent calls.
pub struct AnswerGenerator {
    client: Arc<dyn CompletionClient>,
    primary_model: String,
    fallback_models: Vec<String>,
    current_model: Mutex<String>,
    initialized: bool,
}

impl AnswerGenerator {
    #[inline]
    pub fn new(client: Arc<dyn CompletionClient>, config: &GroqConfig) -> Self {
        info!("AnswerGenerator initialized. Model: {}", config.model);
        Self {
            client,
            primary_model: config.model.clone(),
            fallback_models: config.fallback_models.clone(),
            current_model: Mutex::new(config.model.clone()),
            initialized: !config.api_key.trim().is_empty(),
        }
    }

    /// Whether an API key is configured; surfaced by the health endpoint.
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The model currently answering requests.
    #[inline]
    pub fn current_model(&self) -> String {
        self.current_model
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reset the sticky model to the configured primary, used after a data
    /// reload rebuilds the retrieval context.
    #[inline]
    pub fn reset(&self) {
        self.set_current_model(&self.primary_model);
    }

    fn set_current_model(&self, model: &str) {
        let mut current = self
            .current_model
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *current = model.to_string();
    }

    fn candidates(&self) -> Vec<String> {
        let current = self.current_model();
        let mut candidates = vec![current.clone()];
        for model in &self.fallback_models {
            if *model != current {
                candidates.push(model.clone());
            }
        }
        candidates
    }

    /// Run the prompt against each candidate in order. Capacity and
    /// unknown-model failures advance to the next candidate; any other
    /// failure surfaces immediately.
    #[inline]
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let candidates = self.candidates();
        let mut last_failure = String::new();

        for model in &candidates {
            match self.client.complete(model, prompt).await {
                Ok(answer) => {
                    if *model != self.current_model() {
                        info!("Switched generation model to {}", model);
                    }
                    self.set_current_model(model);
                    return Ok(answer);
                }
                Err(CompletionError::RateLimited(message)) => {
                    warn!("Model {} at capacity, trying next candidate", model);
                    last_failure = message;
                }
                Err(CompletionError::ModelUnavailable(message)) => {
                    warn!("Model {} unavailable, trying next candidate", model);
                    last_failure = message;
                }
                Err(CompletionError::Failed(message)) => {
                    return Err(PortfolioError::Generation(message));
                }
            }
        }

        Err(PortfolioError::Generation(format!(
            "All candidate models exhausted ({} tried); last failure: {last_failure}",
            candidates.len()
        )))
    }
}
