//! Built-in turn agents
//!
//! The runner is agnostic to how output is produced; anything implementing
//! [`sdk::capability::TurnAgent`] can be plugged in. This module ships the
//! echo agent used by the CLI and the test suites.

pub mod echo;

pub use echo::EchoAgent;
