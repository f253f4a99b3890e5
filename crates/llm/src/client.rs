use std::collections::VecDeque;
use std::sync::Arc;

use futures::StreamExt;
use snafu::{OptionExt, ResultExt, Snafu};

use super::decoder::{DecoderSummary, StreamDecoder};
use super::transport::{
    ByteStream, HttpTransport, HttpTransportConfig, TransportAdapter, TransportError,
    TransportResult,
};
use super::wire::{CHAT_PATH, ChatChunk, ChatRequest};

pub type LlmResult<T> = Result<T, LlmError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum LlmError {
    #[snafu(display("transport failed on `{stage}`: {source}"))]
    Transport {
        stage: &'static str,
        source: TransportError,
    },
    #[snafu(display("failed to encode chat request: {source}"))]
    EncodeRequest {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to decode chat response: {source}"))]
    DecodeResponse {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("chat response on `{stage}` carried no message"))]
    MissingMessage { stage: &'static str },
}

impl LlmError {
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, Self::Transport { source, .. } if source.is_connection_refused())
    }
}

/// Speaks the Ollama chat wire shape over any [`TransportAdapter`].
#[derive(Clone)]
pub struct InferenceClient {
    transport: Arc<dyn TransportAdapter>,
}

impl InferenceClient {
    pub fn new(transport: Arc<dyn TransportAdapter>) -> Self {
        Self { transport }
    }

    pub fn http(config: HttpTransportConfig) -> TransportResult<Self> {
        Ok(Self::new(Arc::new(HttpTransport::new(config)?)))
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    /// Issues a `stream=false` request and returns the single response object.
    pub async fn chat(&self, request: ChatRequest) -> LlmResult<ChatChunk> {
        let request = request.with_stream(false);
        let body = serde_json::to_value(&request).context(EncodeRequestSnafu {
            stage: "chat-encode-request",
        })?;

        let payload = self
            .transport
            .request_json(CHAT_PATH, body)
            .await
            .context(TransportSnafu {
                stage: "chat-request",
            })?;
        let response: ChatChunk = serde_json::from_value(payload).context(DecodeResponseSnafu {
            stage: "chat-decode-response",
        })?;

        response.message.as_ref().context(MissingMessageSnafu {
            stage: "chat-response-message",
        })?;

        Ok(response)
    }

    /// Issues a `stream=true` request and returns its decoded chunk sequence.
    pub async fn chat_stream(&self, request: ChatRequest) -> LlmResult<ChunkStream> {
        let request = request.with_stream(true);
        let body = serde_json::to_value(&request).context(EncodeRequestSnafu {
            stage: "chat-stream-encode-request",
        })?;

        let bytes = self
            .transport
            .open_stream(CHAT_PATH, body)
            .await
            .context(TransportSnafu {
                stage: "chat-stream-open",
            })?;

        tracing::debug!(model = %request.model, message_count = request.messages.len(), "opened chat stream");
        Ok(ChunkStream::new(bytes))
    }
}

/// Chunks of one streaming response, decoded lazily as body fragments arrive.
pub struct ChunkStream {
    bytes: ByteStream,
    decoder: StreamDecoder<ChatChunk>,
    pending: VecDeque<ChatChunk>,
    ended: bool,
}

impl ChunkStream {
    pub fn new(bytes: ByteStream) -> Self {
        Self {
            bytes,
            decoder: StreamDecoder::new(),
            pending: VecDeque::new(),
            ended: false,
        }
    }

    /// Returns the next chunk, `None` at end of body. A transport error ends the stream.
    ///
    /// Cancel-safe: dropping the returned future loses no decoded chunk.
    pub async fn next_chunk(&mut self) -> Option<LlmResult<ChatChunk>> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Some(Ok(chunk));
            }

            if self.ended {
                return None;
            }

            match self.bytes.next().await {
                Some(Ok(fragment)) => {
                    let decoded = self.decoder.feed(&fragment);
                    self.pending.extend(decoded);
                }
                Some(Err(source)) => {
                    self.ended = true;
                    return Some(Err(LlmError::Transport {
                        stage: "chat-stream-read",
                        source,
                    }));
                }
                None => self.ended = true,
            }
        }
    }

    pub fn skipped_lines(&self) -> u64 {
        self.decoder.skipped_lines()
    }

    /// Closes the body and reports decoder counters.
    pub fn finish(self) -> DecoderSummary {
        drop(self.bytes);
        self.decoder.finish()
    }
}
