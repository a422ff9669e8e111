//! Baton Engine Library
//!
//! This library provides the core functionality of the Baton turn runner.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Per-conversation cancellation signal
pub mod cancel;

/// Input and output channel pair
pub mod channel;

/// Conversation registry and history
pub mod registry;

/// Single-worker turn executor
pub mod executor;

/// Runner service facade
pub mod service;

/// Message bus for turn lifecycle notifications
pub mod message_bus;

/// Built-in turn agents
pub mod agent;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;

pub use service::RunnerService;
