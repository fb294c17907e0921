//! Record types for conversations and their message turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::conversations::core::ids::{AccountId, SessionId};

/// Role of a stored message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// User input.
    User,
    /// Assistant response.
    Assistant,
    /// System message.
    System,
}

impl MessageRole {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            _ => Err(value.to_string()),
        }
    }
}

/// One message of an incoming turn, before it is persisted.
///
/// Content is an opaque JSON value: it is stored verbatim and returned
/// verbatim on read, so callers define its shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnMessage {
    /// Role of the message.
    pub role: MessageRole,
    /// Caller-defined content payload.
    pub content: serde_json::Value,
}

impl TurnMessage {
    /// Build a user message.
    #[must_use]
    pub fn user(content: impl Into<serde_json::Value>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Build an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<serde_json::Value>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    /// Build a system message.
    #[must_use]
    pub fn system(content: impl Into<serde_json::Value>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// A persisted message row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Row id, unique within the scope.
    pub id: i64,
    /// Owning conversation.
    pub session_id: SessionId,
    /// Append time.
    pub timestamp: DateTime<Utc>,
    /// Role of the message.
    pub role: MessageRole,
    /// Content payload, deserialized to its original structured form.
    pub content: serde_json::Value,
}

/// The metadata row for one conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Session identifier, unique within the scope.
    pub session_id: SessionId,
    /// Owning account.
    pub account_id: AccountId,
    /// Set once at first write, immutable thereafter.
    pub created_at: DateTime<Utc>,
    /// Advanced on every append or read; drives the purge decision.
    pub last_accessed_at: DateTime<Utc>,
    /// Opaque metadata blob, overwritten on each write.
    pub metadata: serde_json::Value,
}

/// A conversation together with its ordered messages.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConversationWithMessages {
    /// The conversation row.
    pub conversation: ConversationRecord,
    /// Messages sorted ascending by timestamp.
    pub messages: Vec<MessageRecord>,
}

/// Scope-level storage statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct StorageStats {
    /// Number of conversations in the scope.
    pub total_conversations: u64,
    /// Age in days of the oldest conversation, `None` when the scope is empty.
    pub oldest_conversation_age_days: Option<f64>,
    /// Conversations whose last access predates the retention threshold.
    pub conversations_ready_to_purge: u64,
}
