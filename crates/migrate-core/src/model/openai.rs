//! OpenAI-compatible chat completion backend

use super::{ChatMessage, ChatRequest, LanguageModel, ModelError};
use crate::config::LlmConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Client for any server exposing `/v1/chat/completions`
pub struct OpenAiCompatibleModel {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    http: Client,
    timeout: Duration,
}

impl OpenAiCompatibleModel {
    /// Client without authentication
    ///
    /// # Errors
    /// [`ModelError::Configuration`] if the HTTP client cannot be built.
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::Configuration(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            http,
            timeout,
        })
    }

    /// Send a bearer token with every request
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Client from configuration; the key is read from `api_key_env`
    ///
    /// # Errors
    /// [`ModelError::Configuration`] when the key variable is named but
    /// unset, or the client cannot be built.
    pub fn from_config(config: &LlmConfig) -> Result<Self, ModelError> {
        let client = Self::new(
            config.endpoint.clone(),
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        )?;
        match &config.api_key_env {
            Some(var) => {
                let key = std::env::var(var).map_err(|_| {
                    ModelError::Configuration(format!("environment variable {var} is not set"))
                })?;
                Ok(client.with_api_key(key))
            }
            None => Ok(client),
        }
    }

    /// Bases that already carry a version segment (`/v1`, `/v1beta/openai`)
    /// only get `/chat/completions` appended
    fn url(&self) -> String {
        if has_version_segment(&self.endpoint) {
            format!("{}/chat/completions", self.endpoint)
        } else {
            format!("{}/v1/chat/completions", self.endpoint)
        }
    }

    fn body<'a>(&'a self, request: &'a ChatRequest) -> CompletionRequest<'a> {
        CompletionRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            stream: false,
        }
    }
}

impl std::fmt::Debug for OpenAiCompatibleModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleModel")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

fn first_content(response: CompletionResponse) -> Result<String, ModelError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .ok_or_else(|| ModelError::InvalidResponse("no content in completion response".into()))
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, ModelError> {
        let url = self.url();
        tracing::debug!(model = %self.model, messages = request.messages.len(), "sending completion request");
        let start = Instant::now();

        let mut builder = self.http.post(&url).json(&self.body(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                tracing::error!(timeout = ?self.timeout, "completion request timed out");
                ModelError::Timeout {
                    secs: self.timeout.as_secs(),
                }
            } else if e.is_connect() {
                tracing::error!(endpoint = %self.endpoint, "cannot connect to model endpoint");
                ModelError::Network(format!("connection failed: {e}"))
            } else {
                ModelError::Network(format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), "model endpoint returned an error");
            return Err(ModelError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(format!("JSON parse error: {e}")))?;
        if let Some(usage) = &parsed.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "token usage"
            );
        }
        let content = first_content(parsed)?;
        tracing::info!(
            model = %self.model,
            elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            chars = content.len(),
            "completion received"
        );
        Ok(content)
    }
}

fn has_version_segment(endpoint: &str) -> bool {
    let after_scheme = endpoint.split_once("://").map_or(endpoint, |(_, rest)| rest);
    after_scheme.split('/').skip(1).any(|segment| {
        let mut chars = segment.chars();
        chars.next() == Some('v') && chars.next().is_some_and(|c| c.is_ascii_digit())
    })
}
