//! Baton SDK
//!
//! Shared library providing the contract between the Baton runner and its
//! collaborators: identity and event types, the agent turn capability, and
//! the engine error type.

/// Agent turn capability trait and types
pub mod capability;

/// Error types and handling
pub mod errors;

/// Identity, conversation and output event types
pub mod types;

// Re-export commonly used types
pub use capability::{CancelCheck, FragmentStream, TurnAgent, TurnError, TurnRequest};
pub use errors::{BatonErrorExt, EngineError};
pub use types::{ConversationId, Identity, OutputEvent, Role, TurnId};
