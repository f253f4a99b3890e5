use std::fmt;

use localchat_llm::LlmError;
use localchat_storage::StorageError;
use snafu::Snafu;

pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("inference server at {endpoint} is unreachable: {source}"))]
    ServiceUnreachable {
        stage: &'static str,
        endpoint: String,
        source: LlmError,
    },
    #[snafu(display("inference request failed on `{stage}`: {source}"))]
    Inference {
        stage: &'static str,
        source: LlmError,
    },
    #[snafu(display("response stream ended before a terminal chunk"))]
    IncompleteStream { stage: &'static str },
    #[snafu(display("storage failed on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("storage task failed on `{stage}`: {source}"))]
    StoreTask {
        stage: &'static str,
        source: tokio::task::JoinError,
    },
    #[snafu(display("invalid system prompt: {reason}"))]
    InvalidSystemPrompt { stage: &'static str, reason: String },
}

impl ChatError {
    pub(crate) fn from_llm(stage: &'static str, endpoint: &str, source: LlmError) -> Self {
        if source.is_connection_refused() {
            Self::ServiceUnreachable {
                stage,
                endpoint: endpoint.to_string(),
                source,
            }
        } else {
            Self::Inference { stage, source }
        }
    }

    pub fn is_service_unreachable(&self) -> bool {
        matches!(self, Self::ServiceUnreachable { .. })
    }
}

/// User-facing description of a failed turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    pub message: String,
    pub details: String,
}

impl ErrorNotice {
    pub fn new(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: details.into(),
        }
    }
}

impl From<&ChatError> for ErrorNotice {
    fn from(error: &ChatError) -> Self {
        match error {
            ChatError::ServiceUnreachable {
                endpoint, source, ..
            } => Self::new(
                "Unable to connect to Ollama",
                format!(
                    "Please make sure Ollama is running and accessible at {endpoint}. Error: {source}"
                ),
            ),
            other => Self::new("Chat failed", other.to_string()),
        }
    }
}

impl fmt::Display for ErrorNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.message, self.details)
    }
}
