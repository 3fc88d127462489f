//! Provider trait: the abstraction over the model-inference endpoint.
//!
//! A Provider knows how to send a conversation to a model and get a response
//! back, either as a complete message or as an ordered stream of text deltas.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;
use crate::tool::ToolSpec;

/// One model turn's worth of request data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model identifier (e.g., "llama3.2")
    pub model: String,

    /// The conversation history, oldest first
    pub messages: Vec<Message>,

    /// Capabilities the model may request
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,

    /// Sampling temperature; endpoint default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,
}

impl ProviderRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>, tools: Vec<ToolSpec>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools,
            temperature: None,
            stream: false,
        }
    }
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message
    pub message: Message,

    /// Which model actually responded
    pub model: String,

    /// The decoded response body, for callers that need endpoint-specific fields
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// One increment of streamed model output.
///
/// Error conditions travel as the `Err` arm of the stream item rather than
/// as a field, so a consumer can never mistake a failed frame for text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Whether this is the terminal chunk of the turn
    #[serde(default)]
    pub done: bool,
}

impl StreamChunk {
    pub fn delta(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            done: false,
        }
    }

    pub fn terminal() -> Self {
        Self {
            content: None,
            done: true,
        }
    }
}

/// An ordered stream of chunks for one turn.
///
/// The stream owns its transport; dropping it releases the connection,
/// whether the consumer reached the terminal chunk, broke out early or
/// stopped on an error.
pub type ChunkStream = BoxStream<'static, std::result::Result<StreamChunk, ProviderError>>;

/// The core Provider trait.
///
/// The agent loop calls `stream()` (or `complete()`) without knowing which
/// endpoint is behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "ollama").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and yields the whole reply
    /// as one delta followed by the terminal chunk.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkStream, ProviderError> {
        let response = self.complete(request).await?;
        let chunks = vec![
            Ok(StreamChunk::delta(response.message.content)),
            Ok(StreamChunk::terminal()),
        ];
        Ok(stream::iter(chunks).boxed())
    }

    /// List models the endpoint can serve.
    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }

    /// Health check: can we reach the endpoint?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}
