//! Request and response shapes of the Ollama chat endpoint.
//!
//! Responses are ad hoc JSON: every optional field is defaulted at the decode
//! boundary and unknown fields are ignored.

use serde::{Deserialize, Serialize};

pub const CHAT_PATH: &str = "chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    #[default]
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

impl WireMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub stream: bool,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<WireMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: true,
        }
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
pub struct ChunkMessage {
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub content: String,
}

/// One decoded line of a streaming response, or the whole non-streaming response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
pub struct ChatChunk {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub message: Option<ChunkMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub done_reason: Option<String>,
    #[serde(default)]
    pub total_duration: Option<u64>,
    #[serde(default)]
    pub load_duration: Option<u64>,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub prompt_eval_duration: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub eval_duration: Option<u64>,
}

impl ChatChunk {
    /// Returns the content fragment, if this chunk carries a non-empty one.
    pub fn content(&self) -> Option<&str> {
        self.message
            .as_ref()
            .map(|message| message.content.as_str())
            .filter(|content| !content.is_empty())
    }

    pub fn usage(&self) -> Option<Usage> {
        let usage = Usage {
            prompt_eval_count: self.prompt_eval_count,
            eval_count: self.eval_count,
            total_duration: self.total_duration,
            load_duration: self.load_duration,
            prompt_eval_duration: self.prompt_eval_duration,
            eval_duration: self.eval_duration,
        };

        (!usage.is_empty()).then_some(usage)
    }
}

/// Server-reported counters from the terminal chunk. Durations are nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage {
    pub prompt_eval_count: Option<u64>,
    pub eval_count: Option<u64>,
    pub total_duration: Option<u64>,
    pub load_duration: Option<u64>,
    pub prompt_eval_duration: Option<u64>,
    pub eval_duration: Option<u64>,
}

impl Usage {
    pub fn is_empty(&self) -> bool {
        self.prompt_eval_count.is_none()
            && self.eval_count.is_none()
            && self.total_duration.is_none()
            && self.load_duration.is_none()
            && self.prompt_eval_duration.is_none()
            && self.eval_duration.is_none()
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_eval_count.unwrap_or(0) + self.eval_count.unwrap_or(0)
    }

    /// Generation speed in tokens per second, when the server reported both inputs.
    pub fn tokens_per_second(&self) -> Option<f64> {
        let eval_count = self.eval_count?;
        let eval_duration = self.eval_duration.filter(|duration| *duration > 0)?;
        Some(eval_count as f64 / (eval_duration as f64 / 1_000_000_000.0))
    }
}
