//! Client side of the local inference server: wire shapes, NDJSON stream
//! decoding and the HTTP transport seam.

pub mod client;
pub mod decoder;
pub mod transport;
pub mod wire;

pub use client::{ChunkStream, InferenceClient, LlmError, LlmResult};
pub use decoder::{DecoderSummary, StreamDecoder};
pub use transport::{
    BoxFuture, ByteStream, DEFAULT_BASE_URL, HttpTransport, HttpTransportConfig,
    TransportAdapter, TransportError, TransportResult,
};
pub use wire::{CHAT_PATH, ChatChunk, ChatRequest, ChunkMessage, Role, Usage, WireMessage};
