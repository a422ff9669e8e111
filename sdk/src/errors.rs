//! Error types and handling
//!
//! This module provides the error types used throughout the Baton engine.
//! All errors implement the `BatonErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! Facade errors (`NotFound`, `NotAuthorized`, `ShuttingDown`) are returned
//! synchronously to the caller. Turn failures never reach the submitter as an
//! error: the executor reports them as a `turn-failed` output event.

use crate::types::ConversationId;
use thiserror::Error;

/// Trait for Baton error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait BatonErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and never echoes the
    /// identity or conversation id that caused the failure.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around. Non-recoverable
    /// errors typically require a restart of the runner.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Lookup**: unknown conversation, conversation owned by someone else
/// - **Execution**: capability-level turn failure
/// - **Lifecycle**: runner stopping
/// - **Configuration**: invalid or unreadable configuration
///
/// # Examples
///
/// ```
/// use sdk::errors::{BatonErrorExt, EngineError};
/// use sdk::types::ConversationId;
///
/// let error = EngineError::NotFound(ConversationId::from("c-1"));
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// assert!(!EngineError::ShuttingDown.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Lookup errors
    #[error("Conversation not found: {0}")]
    NotFound(ConversationId),

    #[error("Not authorized for conversation: {0}")]
    NotAuthorized(ConversationId),

    // Submission errors
    #[error("Input too large: {size} bytes > {limit} bytes")]
    InputTooLarge { size: usize, limit: usize },

    // Execution errors
    #[error("Turn failed: {0}")]
    TurnFailed(String),

    // Lifecycle errors
    #[error("Runner is shutting down")]
    ShuttingDown,

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BatonErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::NotFound(_) => "The conversation does not exist. Create it first",
            Self::NotAuthorized(_) => "This conversation belongs to another user",
            Self::InputTooLarge { .. } => "Input too large. Try a shorter message",
            Self::TurnFailed(_) => "The agent failed to answer. Send the message again",
            Self::ShuttingDown => "The runner is stopping. Try again after restart",
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::ShuttingDown => false,

            _ => true,
        }
    }
}
