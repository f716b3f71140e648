//! Language model collaborator
//!
//! Agent stages talk to a model only through [`LanguageModel`]; the
//! shipped backend is [`OpenAiCompatibleModel`].

mod openai;

pub use openai::OpenAiCompatibleModel;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Role of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions
    System,
    /// Input from the pipeline
    User,
    /// Model output
    Assistant,
}

/// One chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sender role
    pub role: ChatRole,
    /// Text
    pub content: String,
}

impl ChatMessage {
    /// System message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// User message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A completion request
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatRequest {
    /// Conversation so far
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature; backend default when `None`
    pub temperature: Option<f32>,
}

impl ChatRequest {
    /// Request over a conversation
    #[must_use]
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
        }
    }

    /// Set the temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Append a message
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }
}

/// Model backend errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// Transport failure
    #[error("network error: {0}")]
    Network(String),

    /// No response within the budget
    #[error("request timed out after {secs}s")]
    Timeout {
        /// Budget in seconds
        secs: u64,
    },

    /// Non-success HTTP status
    #[error("API error {status}: {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// Response did not have the expected shape
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Backend could not be set up
    #[error("model configuration error: {0}")]
    Configuration(String),
}

/// Chat completion backend
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Complete a conversation with one assistant message
    ///
    /// # Errors
    /// Any [`ModelError`]; the calling stage fails with it.
    async fn complete(&self, request: &ChatRequest) -> Result<String, ModelError>;
}
