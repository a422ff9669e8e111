//! Channel pair
//!
//! Every conversation owns one input channel and one output channel. They are
//! the only path between submitters and the turn executor.
//!
//! - The input channel is a plain FIFO of [`InputEnvelope`]s. It is always used
//!   under the conversation's input lock; the "at most one pending envelope"
//!   property is enforced by the runner service, not by capacity.
//! - The output channel is an unbounded FIFO of [`OutputEvent`]s with a
//!   single producer (the executor) and a single consumer (`drain_output`).
//!   Fragment pushes are checked against the conversation's cancellation
//!   signal under the buffer lock, so nothing produced after a turn was
//!   superseded is ever buffered.

use crate::cancel::CancelSignal;
use chrono::{DateTime, Utc};
use sdk::types::{ConversationId, OutputEvent, TurnId};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, Notify};

/// Input waiting to be executed
#[derive(Debug, Clone)]
pub struct InputEnvelope {
    /// Conversation the input belongs to
    pub conversation_id: ConversationId,

    /// Turn number assigned at submission
    pub turn: TurnId,

    /// Submitted content
    pub content: String,

    /// When the envelope was enqueued
    pub enqueued_at: DateTime<Utc>,
}

impl InputEnvelope {
    pub fn new(conversation_id: ConversationId, turn: TurnId, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            turn,
            content: content.into(),
            enqueued_at: Utc::now(),
        }
    }
}

/// FIFO of pending envelopes for one conversation
#[derive(Debug, Default)]
pub struct InputChannel {
    pending: VecDeque<InputEnvelope>,
}

impl InputChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, envelope: InputEnvelope) {
        self.pending.push_back(envelope);
    }

    pub fn pop(&mut self) -> Option<InputEnvelope> {
        self.pending.pop_front()
    }

    /// Remove every envelope that has not been dequeued yet
    pub fn clear(&mut self) -> Vec<InputEnvelope> {
        self.pending.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Unbounded FIFO of output events for one conversation
#[derive(Debug, Default)]
pub struct OutputChannel {
    buffer: Mutex<VecDeque<OutputEvent>>,
    notify: Notify,
}

impl OutputChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event unconditionally
    pub async fn push(&self, event: OutputEvent) {
        self.buffer.lock().await.push_back(event);
        self.notify.notify_one();
    }

    /// Append a fragment unless the turn has been superseded
    ///
    /// Returns `false` (and buffers nothing) when the signal is set.
    pub async fn push_fragment(&self, turn: TurnId, text: String, signal: &CancelSignal) -> bool {
        let mut buffer = self.buffer.lock().await;
        if signal.is_set() {
            return false;
        }
        buffer.push_back(OutputEvent::Fragment { turn, text });
        drop(buffer);
        self.notify.notify_one();
        true
    }

    /// Append the terminal event of a turn
    ///
    /// A turn whose signal is set when it ends is reported as cancelled,
    /// whatever the agent itself returned. Returns the event actually pushed.
    pub async fn push_terminal(
        &self,
        event: OutputEvent,
        signal: &CancelSignal,
    ) -> OutputEvent {
        let mut buffer = self.buffer.lock().await;
        let event = if signal.is_set() {
            OutputEvent::TurnCancelled { turn: event.turn() }
        } else {
            event
        };
        buffer.push_back(event.clone());
        drop(buffer);
        self.notify.notify_one();
        event
    }

    /// Mark a running turn as superseded
    ///
    /// Sets the signal while holding the buffer lock, then discards undrained
    /// fragments of `running` if that turn has not pushed its terminal event
    /// yet. Lifecycle events are kept. Returns how many fragments were dropped.
    pub async fn supersede(&self, signal: &CancelSignal, running: Option<TurnId>) -> usize {
        let mut buffer = self.buffer.lock().await;
        signal.set();

        let Some(turn) = running else {
            return 0;
        };
        let finished = buffer.iter().any(|e| e.turn() == turn && e.is_terminal());
        if finished {
            return 0;
        }

        let before = buffer.len();
        buffer.retain(|e| !(e.turn() == turn && matches!(e, OutputEvent::Fragment { .. })));
        before - buffer.len()
    }

    /// Lock the buffer for a drain
    ///
    /// The caller removes events through the guard; holding it keeps the
    /// executor from appending while drained fragments are committed.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, VecDeque<OutputEvent>> {
        self.buffer.lock().await
    }

    /// Wait until at least one event is buffered, or the timeout elapses
    ///
    /// Returns whether the buffer is non-empty.
    pub async fn wait_nonempty(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.buffer.lock().await.is_empty() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return !self.buffer.lock().await.is_empty();
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.buffer.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(output: &OutputChannel) -> Vec<OutputEvent> {
        output.lock().await.drain(..).collect()
    }

    fn fragment(turn: u64, text: &str) -> OutputEvent {
        OutputEvent::Fragment {
            turn: TurnId(turn),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_input_channel_fifo_and_clear() {
        let id = ConversationId::from("c1");
        let mut input = InputChannel::new();
        input.push(InputEnvelope::new(id.clone(), TurnId(1), "a"));
        input.push(InputEnvelope::new(id.clone(), TurnId(2), "b"));
        assert_eq!(input.len(), 2);

        let first = input.pop().unwrap();
        assert_eq!(first.content, "a");

        let cleared = input.clear();
        assert_eq!(cleared.len(), 1);
        assert_eq!(cleared[0].turn, TurnId(2));
        assert!(input.is_empty());
    }

    #[tokio::test]
    async fn test_drain_is_ordered_and_idempotent() {
        let output = OutputChannel::new();
        let signal = CancelSignal::new();
        output.push(OutputEvent::TurnStarted { turn: TurnId(1) }).await;
        assert!(output.push_fragment(TurnId(1), "a".into(), &signal).await);
        assert!(output.push_fragment(TurnId(1), "b".into(), &signal).await);

        let drained = drain(&output).await;
        assert_eq!(
            drained,
            vec![
                OutputEvent::TurnStarted { turn: TurnId(1) },
                fragment(1, "a"),
                fragment(1, "b"),
            ]
        );
        assert!(drain(&output).await.is_empty());
    }

    #[tokio::test]
    async fn test_fragment_rejected_after_signal() {
        let output = OutputChannel::new();
        let signal = CancelSignal::new();
        signal.set();

        assert!(!output.push_fragment(TurnId(1), "late".into(), &signal).await);
        assert_eq!(output.len().await, 0);
    }

    #[tokio::test]
    async fn test_terminal_becomes_cancelled_when_signal_set() {
        let output = OutputChannel::new();
        let signal = CancelSignal::new();
        signal.set();

        let pushed = output
            .push_terminal(OutputEvent::TurnCompleted { turn: TurnId(4) }, &signal)
            .await;
        assert_eq!(pushed, OutputEvent::TurnCancelled { turn: TurnId(4) });
    }

    #[tokio::test]
    async fn test_supersede_drops_running_fragments_only() {
        let output = OutputChannel::new();
        let signal = CancelSignal::new();
        output.push(OutputEvent::TurnStarted { turn: TurnId(1) }).await;
        output.push_fragment(TurnId(1), "done".into(), &signal).await;
        output.push(OutputEvent::TurnCompleted { turn: TurnId(1) }).await;
        output.push(OutputEvent::TurnStarted { turn: TurnId(2) }).await;
        output.push_fragment(TurnId(2), "stale".into(), &signal).await;

        let dropped = output.supersede(&signal, Some(TurnId(2))).await;
        assert_eq!(dropped, 1);
        assert!(signal.is_set());

        let drained = drain(&output).await;
        assert_eq!(
            drained,
            vec![
                OutputEvent::TurnStarted { turn: TurnId(1) },
                fragment(1, "done"),
                OutputEvent::TurnCompleted { turn: TurnId(1) },
                OutputEvent::TurnStarted { turn: TurnId(2) },
            ]
        );
    }

    #[tokio::test]
    async fn test_supersede_keeps_fragments_of_finished_turn() {
        let output = OutputChannel::new();
        let signal = CancelSignal::new();
        output.push_fragment(TurnId(1), "kept".into(), &signal).await;
        output.push(OutputEvent::TurnCompleted { turn: TurnId(1) }).await;

        assert_eq!(output.supersede(&signal, Some(TurnId(1))).await, 0);
        assert_eq!(output.len().await, 2);
    }

    #[tokio::test]
    async fn test_wait_nonempty_times_out_then_wakes() {
        let output = std::sync::Arc::new(OutputChannel::new());
        assert!(!output.wait_nonempty(Duration::from_millis(20)).await);

        let producer = std::sync::Arc::clone(&output);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer
                .push(OutputEvent::TurnStarted { turn: TurnId(1) })
                .await;
        });
        assert!(output.wait_nonempty(Duration::from_secs(2)).await);
    }
}
