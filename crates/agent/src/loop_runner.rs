//! The conversation loop implementation.

use std::sync::Arc;
use std::time::Instant;

use atlas_core::error::{AgentError, Error, ProviderError};
use atlas_core::event::{DomainEvent, EventBus};
use atlas_core::message::{Conversation, Message, Role};
use atlas_core::provider::{Provider, ProviderRequest};
use atlas_core::tool::{ToolCall, ToolRegistry, ToolSpec, failure_payload};
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::display::DisplayGate;
use crate::extract::{extract_calls, visible_remainder};
use crate::prompt::build_system_prompt;
use crate::stream_event::AgentStreamEvent;

/// Default number of model turns per user message.
pub const DEFAULT_MAX_ROUNDS: u32 = 3;

/// The loop that interleaves streamed model turns with tool execution.
///
/// `C` is the context handed to every tool (a brokerage session, a job
/// coordinator handle, or `()`); the loop never looks inside it.
pub struct AgentLoop<C: Send + Sync + 'static = ()> {
    /// The model endpoint
    provider: Arc<dyn Provider>,

    /// The model to use
    model: String,

    /// Sampling temperature; endpoint default when unset
    temperature: Option<f32>,

    /// Tools the model may call
    tools: Arc<ToolRegistry<C>>,

    /// Caller state passed to tool handlers
    context: Arc<C>,

    /// Base system prompt; tool guidance is appended per turn
    system_prompt: String,

    /// Model turns allowed before the turn is aborted
    max_rounds: u32,

    /// Event bus for domain events
    event_bus: Arc<EventBus>,
}

/// What one streamed model turn produced.
struct TurnOutput {
    text: String,
    /// Unshown tail of `text` when display was suppressed.
    hidden: Option<String>,
}

impl<C: Send + Sync + 'static> AgentLoop<C> {
    /// Create a new agent loop.
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        tools: Arc<ToolRegistry<C>>,
        context: Arc<C>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: None,
            tools,
            context,
            system_prompt: String::new(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            event_bus,
        }
    }

    /// Set the base system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Set the maximum number of model turns per user message (at least one).
    pub fn with_max_rounds(mut self, max: u32) -> Self {
        self.max_rounds = max.max(1);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    /// Answer the latest user message in `conversation`.
    ///
    /// Streams model turns, runs any requested tools and appends every
    /// assistant and tool message to the history. Display-safe events go to
    /// `events` when given. Returns the final reply with tool blocks and any
    /// unterminated block removed.
    ///
    /// On failure nothing from the failing model turn is committed; the
    /// caller may drop the user message with
    /// [`Conversation::rollback_last_user`] and let the user retry.
    pub async fn process(
        &self,
        conversation: &mut Conversation,
        events: Option<&mpsc::Sender<AgentStreamEvent>>,
    ) -> Result<String, Error> {
        info!(
            conversation_id = %conversation.id,
            messages = conversation.messages.len(),
            "Processing conversation"
        );

        let specs = self.tools.describe();
        self.install_system_prompt(conversation, &specs);

        let mut tool_calls_made = 0usize;

        for round in 0..self.max_rounds {
            debug!(conversation_id = %conversation.id, round, "Streaming model turn");

            let turn = match self.stream_turn(conversation, &specs, events).await {
                Ok(turn) => turn,
                Err(e) => {
                    warn!(conversation_id = %conversation.id, round, error = %e, "Model turn failed");
                    let err = AgentError::Provider(e);
                    self.abort(conversation, &err, events).await;
                    return Err(err.into());
                }
            };

            conversation.push(Message::assistant(&turn.text));

            let calls = extract_calls(&turn.text);
            if calls.is_empty() {
                if let Some(hidden) = &turn.hidden {
                    // The marker showed up but no usable call followed.
                    let remainder = visible_remainder(hidden);
                    if !remainder.is_empty() {
                        emit(events, AgentStreamEvent::Chunk { content: remainder }).await;
                    }
                }

                let rounds = round + 1;
                info!(conversation_id = %conversation.id, rounds, tool_calls_made, "Turn complete");
                self.event_bus.publish(DomainEvent::TurnCompleted {
                    conversation_id: conversation.id.to_string(),
                    rounds,
                    timestamp: Utc::now(),
                });
                emit(
                    events,
                    AgentStreamEvent::Done {
                        rounds,
                        tool_calls_made,
                    },
                )
                .await;
                return Ok(visible_remainder(&turn.text));
            }

            debug!(round, tool_count = calls.len(), "Executing tool calls");
            for call in &calls {
                let message = self.run_tool(call, events).await;
                conversation.push(message);
                tool_calls_made += 1;
            }
        }

        warn!(
            conversation_id = %conversation.id,
            max_rounds = self.max_rounds,
            "Round budget exhausted"
        );
        let err = AgentError::TooManyToolRounds {
            max_rounds: self.max_rounds,
        };
        self.abort(conversation, &err, events).await;
        Err(err.into())
    }

    /// Make the first message the system prompt for the current tool set.
    fn install_system_prompt(&self, conversation: &mut Conversation, specs: &[ToolSpec]) {
        let prompt = Message::system(build_system_prompt(&self.system_prompt, specs));
        if conversation.messages.first().is_some_and(|m| m.role == Role::System) {
            conversation.messages[0] = prompt;
        } else {
            conversation.messages.insert(0, prompt);
        }
    }

    /// Stream one model turn through the display gate.
    async fn stream_turn(
        &self,
        conversation: &Conversation,
        specs: &[ToolSpec],
        events: Option<&mpsc::Sender<AgentStreamEvent>>,
    ) -> Result<TurnOutput, ProviderError> {
        let mut request =
            ProviderRequest::new(self.model.clone(), conversation.messages.clone(), specs.to_vec());
        request.temperature = self.temperature;
        request.stream = true;

        let mut stream = self.provider.stream(request).await?;
        let mut gate = DisplayGate::new();

        while let Some(item) = stream.next().await {
            let chunk = item?;
            if let Some(delta) = chunk.content.as_deref() {
                if let Some(visible) = gate.push(delta) {
                    emit(events, AgentStreamEvent::Chunk { content: visible }).await;
                }
            }
            if chunk.done {
                break;
            }
        }
        drop(stream);

        if let Some(rest) = gate.finish() {
            emit(events, AgentStreamEvent::Chunk { content: rest }).await;
        }

        let (text, hidden) = gate.into_parts();
        Ok(TurnOutput { text, hidden })
    }

    /// Invoke one call and build the `tool` message that records its outcome.
    async fn run_tool(
        &self,
        call: &ToolCall,
        events: Option<&mpsc::Sender<AgentStreamEvent>>,
    ) -> Message {
        emit(
            events,
            AgentStreamEvent::ToolCall {
                name: call.name.clone(),
                input: serde_json::Value::Object(call.arguments.clone()),
            },
        )
        .await;

        let start = Instant::now();
        let outcome = self
            .tools
            .invoke(&self.context, &call.name, &call.arguments)
            .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let (payload, success, summary) = match outcome {
            Ok(result) => {
                debug!(tool = %call.name, duration_ms, "Tool succeeded");
                let summary = result.message.clone();
                (result.to_model_value(), result.success, summary)
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool execution failed");
                let error = e.to_string();
                (failure_payload(&call.name, &error), false, error)
            }
        };

        self.event_bus.publish(DomainEvent::ToolExecuted {
            tool_name: call.name.clone(),
            success,
            duration_ms,
            timestamp: Utc::now(),
        });
        emit(
            events,
            AgentStreamEvent::ToolResult {
                name: call.name.clone(),
                success,
                message: summary,
            },
        )
        .await;

        Message::tool(&call.name, payload.to_string())
    }

    async fn abort(
        &self,
        conversation: &Conversation,
        err: &AgentError,
        events: Option<&mpsc::Sender<AgentStreamEvent>>,
    ) {
        self.event_bus.publish(DomainEvent::TurnAborted {
            conversation_id: conversation.id.to_string(),
            reason: err.to_string(),
            timestamp: Utc::now(),
        });
        emit(
            events,
            AgentStreamEvent::Error {
                message: err.to_string(),
            },
        )
        .await;
    }
}

async fn emit(events: Option<&mpsc::Sender<AgentStreamEvent>>, event: AgentStreamEvent) {
    if let Some(tx) = events {
        // A closed receiver only means nobody is rendering.
        let _ = tx.send(event).await;
    }
}
