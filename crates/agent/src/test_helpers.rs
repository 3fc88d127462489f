//! Scripted model endpoint for agent tests.

use atlas_core::error::ProviderError;
use atlas_core::message::Message;
use atlas_core::provider::{ChunkStream, Provider, ProviderRequest, ProviderResponse, StreamChunk};
use futures::StreamExt;
use futures::stream;
use std::collections::VecDeque;
use std::sync::Mutex;

/// One scripted model turn.
#[derive(Clone)]
pub enum Turn {
    /// Deltas followed by the terminal chunk.
    Deltas(Vec<String>),
    /// Deltas followed by a mid-stream error.
    Failing(Vec<String>, ProviderError),
    /// The request itself fails before any chunk.
    Rejected(ProviderError),
}

impl Turn {
    pub fn text(text: &str) -> Self {
        Self::Deltas(vec![text.to_string()])
    }

    pub fn deltas(parts: &[&str]) -> Self {
        Self::Deltas(parts.iter().map(|p| p.to_string()).collect())
    }

    pub fn failing(parts: &[&str], error: ProviderError) -> Self {
        Self::Failing(parts.iter().map(|p| p.to_string()).collect(), error)
    }

    pub fn rejected(error: ProviderError) -> Self {
        Self::Rejected(error)
    }
}

/// A provider that plays back scripted turns in order and records every request.
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<Turn>>,
    repeat: Option<Turn>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Plays the same turn forever.
    pub fn repeating(turn: Turn) -> Self {
        Self {
            turns: Mutex::new(VecDeque::new()),
            repeat: Some(turn),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_turn(&self, request: ProviderRequest) -> Turn {
        self.requests.lock().unwrap().push(request);
        self.turns
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.repeat.clone())
            .unwrap_or_else(|| Turn::Rejected(ProviderError::NotConfigured("script exhausted".into())))
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        match self.next_turn(request) {
            Turn::Deltas(parts) => Ok(ProviderResponse {
                message: Message::assistant(parts.concat()),
                model,
                raw: serde_json::Value::Null,
            }),
            Turn::Failing(_, error) | Turn::Rejected(error) => Err(error),
        }
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkStream, ProviderError> {
        let (parts, tail) = match self.next_turn(request) {
            Turn::Deltas(parts) => (parts, Ok(StreamChunk::terminal())),
            Turn::Failing(parts, error) => (parts, Err(error)),
            Turn::Rejected(error) => return Err(error),
        };

        let items: Vec<Result<StreamChunk, ProviderError>> = parts
            .into_iter()
            .map(|p| Ok(StreamChunk::delta(p)))
            .chain(std::iter::once(tail))
            .collect();
        Ok(stream::iter(items).boxed())
    }
}
