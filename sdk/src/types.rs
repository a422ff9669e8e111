//! Shared identity, conversation and event types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identity of a submitter. No structure beyond equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Create a new identity
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique conversation identifier (a UUID string when allocated by the registry)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-conversation turn number, assigned at submission time.
///
/// Turn ids increase strictly within one conversation; they carry no meaning
/// across conversations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(pub u64);

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of a history message author
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Input submitted by the conversation owner
    Submitter,

    /// Output produced by the agent
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Submitter => write!(f, "submitter"),
            Role::System => write!(f, "system"),
        }
    }
}

/// Event placed on a conversation's output channel
///
/// Consumers observe events in emission order. Every turn that starts ends with
/// exactly one of `TurnCancelled`, `TurnCompleted` or `TurnFailed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputEvent {
    /// A piece of agent output
    Fragment { turn: TurnId, text: String },

    /// The executor began running the turn
    TurnStarted { turn: TurnId },

    /// The turn was superseded by a newer submission
    TurnCancelled { turn: TurnId },

    /// The turn ran to its natural end
    TurnCompleted { turn: TurnId },

    /// The capability failed while running the turn
    TurnFailed { turn: TurnId, reason: String },
}

impl OutputEvent {
    /// Turn this event belongs to
    pub fn turn(&self) -> TurnId {
        match self {
            OutputEvent::Fragment { turn, .. }
            | OutputEvent::TurnStarted { turn }
            | OutputEvent::TurnCancelled { turn }
            | OutputEvent::TurnCompleted { turn }
            | OutputEvent::TurnFailed { turn, .. } => *turn,
        }
    }

    /// Whether this event ends its turn
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OutputEvent::TurnCancelled { .. }
                | OutputEvent::TurnCompleted { .. }
                | OutputEvent::TurnFailed { .. }
        )
    }
}
