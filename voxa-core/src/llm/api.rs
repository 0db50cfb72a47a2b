//! Wire types for the Ollama-compatible chat endpoint.

use serde::{Deserialize, Serialize};

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling parameters sent with each completion request.
#[derive(Debug, Clone, Copy, Serialize)]
pub(crate) struct GenerationOptions {
    pub temperature: f32,
    /// Token cap keeping replies short enough to speak.
    pub num_predict: u32,
    /// Context window; kept small so the language model shares the machine
    /// with the audio models.
    pub num_ctx: u32,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub stream: bool,
    pub options: GenerationOptions,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    pub message: ChatMessage,
}
