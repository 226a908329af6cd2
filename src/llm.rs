use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::GeminiConfig;

/// Failure of a single completion request.
///
/// The relay collapses every variant into one chat reply; the variants exist
/// so the server-side log says what actually went wrong.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("request to Gemini failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Gemini rejected the API key ({status}): {message}")]
    Auth { status: StatusCode, message: String },

    #[error("Gemini quota exhausted: {0}")]
    Quota(String),

    #[error("Gemini API error ({status}): {message}")]
    Api { status: StatusCode, message: String },

    #[error("prompt blocked by Gemini: {0}")]
    Blocked(String),

    #[error("malformed Gemini response: {0}")]
    Malformed(String),
}

impl InferenceError {
    /// Short label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            InferenceError::Transport(_) => "transport",
            InferenceError::Auth { .. } => "auth",
            InferenceError::Quota(_) => "quota",
            InferenceError::Api { .. } => "api",
            InferenceError::Blocked(_) => "blocked",
            InferenceError::Malformed(_) => "malformed",
        }
    }
}

/// Anything that turns a prompt into a single text completion.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, InferenceError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Pull `error.message` out of a Gemini error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

impl GenerateResponse {
    fn into_text(self) -> Result<String, InferenceError> {
        let Some(candidate) = self.candidates.into_iter().next() else {
            return match self.prompt_feedback.and_then(|f| f.block_reason) {
                Some(reason) => Err(InferenceError::Blocked(reason)),
                None => Err(InferenceError::Malformed(
                    "response contained no candidates".to_string(),
                )),
            };
        };

        // A candidate stopped by a safety filter has no parts; the relay
        // treats that as an empty completion.
        Ok(candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default())
    }
}

pub struct GeminiClient {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client for Gemini")?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, InferenceError> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        let url = self.endpoint();
        debug!("Sending request to Gemini: {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(InferenceError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    debug!("Failed to read Gemini error body ({}): {}", status, e);
                    String::new()
                }
            };
            let message = error_message(&body);
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    InferenceError::Auth { status, message }
                }
                StatusCode::TOO_MANY_REQUESTS => InferenceError::Quota(message),
                _ => InferenceError::Api { status, message },
            });
        }

        let body = response.text().await.map_err(InferenceError::Transport)?;
        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| InferenceError::Malformed(format!("undecodable body: {e}")))?;

        parsed.into_text()
    }
}
