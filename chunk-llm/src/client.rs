//! LLM Client: unified interface for Ollama, OpenAI-compatible, and Gemini
//! backends.
//!
//! One call to [`Completion::complete`] is exactly one HTTP request. Retry
//! policy belongs to the caller, which knows whether a request is worth
//! repeating.

use std::future::Future;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use chunk_core::config::LlmConfig;

use crate::error::LlmError;
use crate::types::{LlmRequest, LlmResponse};

/// Anything that can turn a prompt into text.
///
/// [`LlmClient`] is the production implementation; tests plug in scripted
/// doubles.
pub trait Completion: Send + Sync {
    /// Run one completion.
    fn complete(
        &self,
        request: &LlmRequest,
    ) -> impl Future<Output = Result<LlmResponse, LlmError>> + Send;

    /// Whether a backend is configured at all.
    fn is_available(&self) -> bool {
        true
    }
}

/// Provider backend for LLM inference.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    /// Ollama running locally.
    Ollama {
        /// e.g. `http://localhost:11434`.
        base_url: String,
    },
    /// OpenAI-compatible chat completions API.
    OpenAiCompatible {
        /// e.g. `https://api.openai.com`.
        base_url: String,
        /// Bearer token.
        api_key: String,
    },
    /// Google Gemini `generateContent` API.
    Gemini {
        /// e.g. `https://generativelanguage.googleapis.com`.
        base_url: String,
        /// API key.
        api_key: String,
    },
    /// No LLM available. Every call fails with `Unavailable`.
    None,
}

/// HTTP client that routes requests to the configured provider.
#[derive(Debug, Clone)]
pub struct LlmClient {
    provider: LlmProvider,
    http: Client,
    model: String,
}

impl LlmClient {
    /// Create a new LLM client.
    #[must_use]
    pub fn new(provider: LlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            http: Client::new(),
            model: model.into(),
        }
    }

    /// Create a client with no LLM backend.
    #[must_use]
    pub fn none() -> Self {
        Self::new(LlmProvider::None, "")
    }

    /// Build a client from the `[llm]` config section.
    ///
    /// # Errors
    /// Returns [`LlmError::ConfigError`] for an unknown provider or a hosted
    /// provider without an API key.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let require_key = || {
            config
                .api_key
                .clone()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| {
                    LlmError::ConfigError(format!("provider '{}' needs an api_key", config.provider))
                })
        };

        let provider = match config.provider.as_str() {
            "ollama" => LlmProvider::Ollama { base_url },
            "openai" => LlmProvider::OpenAiCompatible {
                base_url,
                api_key: require_key()?,
            },
            "gemini" => LlmProvider::Gemini {
                base_url,
                api_key: require_key()?,
            },
            "none" => LlmProvider::None,
            other => {
                return Err(LlmError::ConfigError(format!("unknown LLM provider '{other}'")));
            }
        };
        Ok(Self::new(provider, config.model.clone()))
    }

    /// The configured provider.
    #[must_use]
    pub fn provider(&self) -> &LlmProvider {
        &self.provider
    }

    /// Generate a response from the LLM.
    ///
    /// # Errors
    /// Returns an error if the provider is unavailable, the request fails or
    /// times out, or the provider answers with a non-success status.
    pub async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let (url, body, auth) = match &self.provider {
            LlmProvider::None => {
                return Err(LlmError::Unavailable("No LLM provider configured".into()));
            }
            LlmProvider::Ollama { base_url } => {
                (format!("{base_url}/api/generate"), self.ollama_body(request), None)
            }
            LlmProvider::OpenAiCompatible { base_url, api_key } => (
                format!("{base_url}/v1/chat/completions"),
                self.openai_body(request),
                Some(("Authorization", format!("Bearer {api_key}"))),
            ),
            LlmProvider::Gemini { base_url, api_key } => (
                format!("{base_url}/v1beta/models/{}:generateContent", self.model),
                Self::gemini_body(request),
                Some(("x-goog-api-key", api_key.clone())),
            ),
        };

        let start = Instant::now();
        let mut http = self
            .http
            .post(&url)
            .json(&body)
            .timeout(Duration::from_millis(request.timeout_ms));
        if let Some((name, value)) = auth {
            http = http.header(name, value);
        }

        let resp = http.send().await.map_err(|e| {
            let err = LlmError::from(e);
            warn!(model = %self.model, error = %err, "LLM request failed");
            match err {
                LlmError::Timeout(_) => LlmError::Timeout(request.timeout_ms),
                other => other,
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body: String = resp.text().await.unwrap_or_default().chars().take(200).collect();
            warn!(status = status.as_u16(), "LLM provider returned error status");
            return Err(LlmError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let json: Value = resp.json().await?;
        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let (text, tokens) = self.extract_text(&json);

        debug!(model = %self.model, latency_ms, tokens, "LLM call completed");
        Ok(LlmResponse {
            text,
            tokens_generated: tokens,
            latency_ms,
            model: self.model.clone(),
        })
    }

    fn ollama_body(&self, request: &LlmRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "prompt": format!("{}\n\n{}", request.system, request.user),
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            }
        });
        if request.json_mode {
            body["format"] = json!("json");
        }
        body
    }

    fn openai_body(&self, request: &LlmRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if request.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }

    fn gemini_body(request: &LlmRequest) -> Value {
        let mut body = json!({
            "systemInstruction": { "parts": [{ "text": request.system }] },
            "contents": [{ "role": "user", "parts": [{ "text": request.user }] }],
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
            }
        });
        if request.json_mode {
            body["generationConfig"]["responseMimeType"] = json!("application/json");
        }
        body
    }

    /// Pull the generated text and token count out of a provider response.
    fn extract_text(&self, json: &Value) -> (String, u32) {
        let (text, tokens) = match &self.provider {
            LlmProvider::Ollama { .. } => (&json["response"], &json["eval_count"]),
            LlmProvider::OpenAiCompatible { .. } => (
                &json["choices"][0]["message"]["content"],
                &json["usage"]["completion_tokens"],
            ),
            LlmProvider::Gemini { .. } => (
                &json["candidates"][0]["content"]["parts"][0]["text"],
                &json["usageMetadata"]["candidatesTokenCount"],
            ),
            LlmProvider::None => return (String::new(), 0),
        };
        (
            text.as_str().unwrap_or_default().to_string(),
            tokens.as_u64().and_then(|t| u32::try_from(t).ok()).unwrap_or(0),
        )
    }
}

impl Completion for LlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.generate(request).await
    }

    fn is_available(&self) -> bool {
        !matches!(self.provider, LlmProvider::None)
    }
}
