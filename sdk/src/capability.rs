//! Agent turn capability
//!
//! This module defines the `TurnAgent` trait, the single capability the runner
//! consumes from the agent execution layer. An agent turns one input into a
//! lazy, finite stream of content fragments.
//!
//! # Cancellation contract
//!
//! Every call receives a [`CancelCheck`]. Cancellation is cooperative: the agent
//! must consult the check at its own suspension points (before awaiting
//! upstream work, between fragments) and stop producing fragments promptly once
//! it returns `true`. The runner additionally stops polling the stream as soon
//! as it observes the signal, so an agent that yields often is cancelled
//! quickly, while one that never yields delays cancellation until it does.

use crate::types::{ConversationId, TurnId};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Stream of fragments produced by one turn
///
/// The stream ends normally with `None`; an `Err` item ends the turn as failed.
pub type FragmentStream = BoxStream<'static, Result<String, TurnError>>;

/// Failure raised by an agent while running a turn
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TurnError {
    /// The agent could not be prepared for this turn
    #[error("agent setup failed: {0}")]
    Setup(String),

    /// The agent failed while producing output
    #[error("{0}")]
    Agent(String),
}

/// Cancellation check handed to the agent for one turn
///
/// Cheap to clone; every clone observes the same underlying signal.
#[derive(Clone)]
pub struct CancelCheck {
    inner: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl CancelCheck {
    /// Create a check backed by the given predicate
    pub fn new(check: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(check),
        }
    }

    /// A check that never reports cancellation
    pub fn never() -> Self {
        Self::new(|| false)
    }

    /// Returns true once the turn has been superseded
    pub fn is_cancelled(&self) -> bool {
        (self.inner)()
    }
}

impl fmt::Debug for CancelCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelCheck")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Input for one turn
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Conversation the turn belongs to
    pub conversation_id: ConversationId,

    /// Turn number within the conversation
    pub turn: TurnId,

    /// Submitted content
    pub content: String,

    /// Whether the conversation runs in agent (tool-using) mode
    pub agent_mode: bool,
}

/// Capability that executes agent turns
///
/// Implementations must be restartable per call: every `start_turn` returns an
/// independent stream. The returned stream is `'static`, so it must own what it
/// needs from `request` and `cancel`.
#[async_trait]
pub trait TurnAgent: Send + Sync {
    /// Returns the name of the agent
    fn name(&self) -> &str;

    /// Prepare a turn and return its fragment stream
    async fn start_turn(
        &self,
        request: TurnRequest,
        cancel: CancelCheck,
    ) -> Result<FragmentStream, TurnError>;
}
