//! Message and Conversation domain types.
//!
//! These are the value objects that flow through the whole system:
//! the caller appends a user turn → the agent loop streams the model → tool
//! results are appended → the final assistant text comes back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (base prompt, tool guidance)
    System,
    /// The end user
    User,
    /// The model
    Assistant,
    /// Serialized tool output
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// For `tool` messages, the name of the tool that produced the content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_role(role: Role, content: String, name: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            name,
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content.into(), None)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content.into(), None)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content.into(), None)
    }

    /// Create a tool message tagged with the originating tool's name.
    pub fn tool(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::with_role(Role::Tool, content.into(), Some(name.into()))
    }
}

/// A conversation is an ordered, append-only sequence of messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    /// Ordered messages
    pub messages: Vec<Message>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a message to the conversation.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// Drop the most recent user message and everything recorded after it.
    ///
    /// Used after a failed turn so the user can rephrase without the aborted
    /// exchange lingering in history. Returns the removed user message.
    pub fn rollback_last_user(&mut self) -> Option<Message> {
        let idx = self.messages.iter().rposition(|m| m.role == Role::User)?;
        self.updated_at = Utc::now();
        let mut removed = self.messages.split_off(idx);
        Some(removed.swap_remove(0))
    }

    /// Messages with the given role, in order.
    pub fn with_role(&self, role: Role) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(move |m| m.role == role)
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
