//! Turn Executor
//!
//! A single persistent worker runs every turn of every conversation:
//!
//! 1. Wait for a conversation in the ready queue (round-robin by arrival)
//! 2. Under the conversation's input lock: dequeue the pending envelope and
//!    clear the cancellation signal
//! 3. Start the agent turn and forward its fragments to the output channel
//! 4. Stop as soon as the signal (or runner shutdown) is observed and report
//!    `turn-cancelled`
//! 5. Report `turn-completed` or `turn-failed`, then go back to step 1
//!
//! Concurrency comes from the worker suspending while the agent awaits
//! upstream work, never from running two turns in parallel. A failing or
//! panicking agent only fails its own turn: the panic is caught at turn
//! granularity and the worker keeps serving other conversations.

use crate::cancel::CancelSignal;
use crate::channel::InputEnvelope;
use crate::message_bus::{BusEvent, MessageBus};
use crate::registry::Conversation;
use futures::{FutureExt, StreamExt};
use sdk::capability::{TurnAgent, TurnRequest};
use sdk::types::{ConversationId, OutputEvent};
use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

/// Conversations that have pending input
///
/// Each conversation appears at most once; marking an already-ready
/// conversation is a no-op.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    inner: Mutex<ReadyInner>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct ReadyInner {
    order: VecDeque<Arc<Conversation>>,
    members: HashSet<ConversationId>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a conversation as having pending input and wake the worker
    pub async fn mark(&self, conversation: Arc<Conversation>) {
        let mut inner = self.inner.lock().await;
        if inner.members.insert(conversation.id().clone()) {
            inner.order.push_back(conversation);
        }
        drop(inner);
        self.notify.notify_one();
    }

    /// Take the next ready conversation, if any
    pub async fn pop(&self) -> Option<Arc<Conversation>> {
        let mut inner = self.inner.lock().await;
        let conversation = inner.order.pop_front()?;
        inner.members.remove(conversation.id());
        Some(conversation)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.order.len()
    }

    /// Wait for the next `mark`
    ///
    /// A mark that happened while nobody was waiting leaves a permit, so the
    /// next call returns immediately.
    async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// How one turn ended, before the cancellation signal is consulted
#[derive(Debug, Clone, PartialEq, Eq)]
enum TurnOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

/// The single worker that executes turns
pub struct TurnExecutor {
    agent: Arc<dyn TurnAgent>,
    ready: Arc<ReadyQueue>,
    bus: Arc<MessageBus>,
    shutdown: CancelSignal,
    idle_poll: Option<Duration>,
}

impl TurnExecutor {
    /// Create a new executor
    ///
    /// `idle_poll` bounds how long the worker sleeps without a notification.
    /// It only affects latency; readiness is always delivered by notification.
    pub fn new(
        agent: Arc<dyn TurnAgent>,
        ready: Arc<ReadyQueue>,
        bus: Arc<MessageBus>,
        shutdown: CancelSignal,
        idle_poll: Option<Duration>,
    ) -> Self {
        Self {
            agent,
            ready,
            bus,
            shutdown,
            idle_poll,
        }
    }

    /// Run until shutdown is signalled
    pub async fn run(self) {
        info!(agent = self.agent.name(), "turn executor started");
        self.bus.publish(BusEvent::RunnerStarted).await;

        while let Some(conversation) = self.next_ready().await {
            self.run_turn(conversation).await;
        }

        info!("turn executor stopped");
    }

    async fn next_ready(&self) -> Option<Arc<Conversation>> {
        loop {
            if self.shutdown.is_set() {
                return None;
            }
            if let Some(conversation) = self.ready.pop().await {
                return Some(conversation);
            }

            let idle_poll = self.idle_poll;
            let poll = async move {
                match idle_poll {
                    Some(interval) => tokio::time::sleep(interval).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                _ = self.ready.notified() => {}
                _ = poll => {}
            }
        }
    }

    /// Dequeue the pending envelope and clear the signal, atomically with
    /// respect to `submit_input`
    async fn begin_turn(conversation: &Conversation) -> Option<InputEnvelope> {
        let mut input = conversation.input.lock().await;
        let envelope = input.channel.pop()?;
        conversation.signal.clear();
        input.running = Some(envelope.turn);
        Some(envelope)
    }

    async fn run_turn(&self, conversation: Arc<Conversation>) {
        let Some(envelope) = Self::begin_turn(&conversation).await else {
            debug!(conversation_id = %conversation.id(), "ready conversation had no pending input");
            return;
        };

        let conversation_id = conversation.id().clone();
        let turn = envelope.turn;
        let started = Instant::now();
        let waited_ms = (chrono::Utc::now() - envelope.enqueued_at).num_milliseconds();

        debug!(conversation_id = %conversation_id, %turn, waited_ms, "turn started");
        conversation
            .output
            .push(OutputEvent::TurnStarted { turn })
            .await;
        self.bus
            .publish(BusEvent::TurnStarted {
                conversation_id: conversation_id.clone(),
                turn,
            })
            .await;

        let mut fragments = 0usize;
        let outcome = AssertUnwindSafe(self.drive_turn(&conversation, envelope, &mut fragments))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                TurnOutcome::Failed(format!("agent panicked: {}", panic_message(panic.as_ref())))
            });

        let event = match outcome {
            TurnOutcome::Completed => OutputEvent::TurnCompleted { turn },
            TurnOutcome::Cancelled => OutputEvent::TurnCancelled { turn },
            TurnOutcome::Failed(reason) => OutputEvent::TurnFailed { turn, reason },
        };
        let event = conversation
            .output
            .push_terminal(event, &conversation.signal)
            .await;

        {
            let mut input = conversation.input.lock().await;
            if input.running == Some(turn) {
                input.running = None;
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let bus_event = match event {
            OutputEvent::TurnCompleted { .. } => {
                info!(conversation_id = %conversation_id, %turn, fragments, elapsed_ms, "turn completed");
                BusEvent::TurnCompleted {
                    conversation_id,
                    turn,
                    fragments,
                }
            }
            OutputEvent::TurnFailed { reason, .. } => {
                warn!(conversation_id = %conversation_id, %turn, elapsed_ms, "turn failed: {}", reason);
                BusEvent::TurnFailed {
                    conversation_id,
                    turn,
                    reason,
                }
            }
            _ => {
                info!(conversation_id = %conversation_id, %turn, fragments, elapsed_ms, "turn cancelled");
                BusEvent::TurnCancelled {
                    conversation_id,
                    turn,
                }
            }
        };
        self.bus.publish(bus_event).await;
    }

    /// Start the agent and forward fragments until the stream ends or the
    /// turn is superseded
    async fn drive_turn(
        &self,
        conversation: &Conversation,
        envelope: InputEnvelope,
        fragments: &mut usize,
    ) -> TurnOutcome {
        let signal = &conversation.signal;
        let turn = envelope.turn;
        let request = TurnRequest {
            conversation_id: envelope.conversation_id,
            turn,
            content: envelope.content,
            agent_mode: conversation.agent_mode(),
        };

        let started = tokio::select! {
            biased;
            _ = signal.cancelled() => return TurnOutcome::Cancelled,
            _ = self.shutdown.cancelled() => return TurnOutcome::Cancelled,
            started = self.agent.start_turn(request, signal.check()) => started,
        };
        let mut stream = match started {
            Ok(stream) => stream,
            Err(e) => return TurnOutcome::Failed(e.to_string()),
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = signal.cancelled() => return TurnOutcome::Cancelled,
                _ = self.shutdown.cancelled() => return TurnOutcome::Cancelled,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(text)) => {
                    if !conversation.output.push_fragment(turn, text, signal).await {
                        return TurnOutcome::Cancelled;
                    }
                    *fragments += 1;
                }
                Some(Err(e)) => return TurnOutcome::Failed(e.to_string()),
                None => return TurnOutcome::Completed,
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConversationOptions, ConversationRegistry};
    use async_trait::async_trait;
    use sdk::capability::{CancelCheck, FragmentStream, TurnError};
    use sdk::types::{Identity, Role, TurnId};

    /// Emits the words of the input, optionally failing or panicking
    struct WordsAgent;

    #[async_trait]
    impl TurnAgent for WordsAgent {
        fn name(&self) -> &str {
            "words"
        }

        async fn start_turn(
            &self,
            request: TurnRequest,
            _cancel: CancelCheck,
        ) -> Result<FragmentStream, TurnError> {
            match request.content.as_str() {
                "setup-error" => Err(TurnError::Setup("no model".to_string())),
                "panic" => panic!("agent exploded"),
                content => {
                    let items: Vec<Result<String, TurnError>> = content
                        .split_whitespace()
                        .map(|w| {
                            if w == "ERR" {
                                Err(TurnError::Agent("bad word".to_string()))
                            } else {
                                Ok(w.to_string())
                            }
                        })
                        .collect();
                    Ok(futures::stream::iter(items).boxed())
                }
            }
        }
    }

    async fn setup() -> (TurnExecutor, Arc<ReadyQueue>, Arc<Conversation>) {
        let registry = ConversationRegistry::new();
        let conversation = registry
            .create(&Identity::from("u1"), ConversationOptions::default())
            .await;
        let ready = Arc::new(ReadyQueue::new());
        let executor = TurnExecutor::new(
            Arc::new(WordsAgent),
            Arc::clone(&ready),
            Arc::new(MessageBus::new()),
            CancelSignal::new(),
            None,
        );
        (executor, ready, conversation)
    }

    async fn enqueue(conversation: &Conversation, content: &str) -> TurnId {
        let mut input = conversation.input.lock().await;
        let turn = input.allocate_turn();
        input.channel.push(InputEnvelope::new(
            conversation.id().clone(),
            turn,
            content,
        ));
        turn
    }

    #[tokio::test]
    async fn test_ready_queue_dedupes() {
        let (_executor, ready, conversation) = setup().await;
        ready.mark(Arc::clone(&conversation)).await;
        ready.mark(Arc::clone(&conversation)).await;
        assert_eq!(ready.len().await, 1);

        assert!(ready.pop().await.is_some());
        assert!(ready.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_run_turn_completes_and_clears_signal() {
        let (executor, _ready, conversation) = setup().await;
        let turn = enqueue(&conversation, "hello world").await;
        conversation.signal.set();

        executor.run_turn(Arc::clone(&conversation)).await;

        assert!(!conversation.signal.is_set());
        let events = conversation.drain().await;
        assert_eq!(
            events,
            vec![
                OutputEvent::TurnStarted { turn },
                OutputEvent::Fragment {
                    turn,
                    text: "hello".into()
                },
                OutputEvent::Fragment {
                    turn,
                    text: "world".into()
                },
                OutputEvent::TurnCompleted { turn },
            ]
        );
        let history = conversation.messages().await;
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|m| m.role == Role::System));
        assert_eq!(conversation.input.lock().await.running, None);
    }

    #[tokio::test]
    async fn test_stream_error_becomes_turn_failed() {
        let (executor, _ready, conversation) = setup().await;
        let turn = enqueue(&conversation, "ok ERR never").await;

        executor.run_turn(Arc::clone(&conversation)).await;

        let events = conversation.drain().await;
        assert_eq!(
            events.last(),
            Some(&OutputEvent::TurnFailed {
                turn,
                reason: "bad word".into()
            })
        );
        assert!(!events
            .iter()
            .any(|e| matches!(e, OutputEvent::Fragment { text, .. } if text == "never")));
    }

    #[tokio::test]
    async fn test_setup_error_becomes_turn_failed() {
        let (executor, _ready, conversation) = setup().await;
        let turn = enqueue(&conversation, "setup-error").await;

        executor.run_turn(Arc::clone(&conversation)).await;

        let events = conversation.drain().await;
        assert_eq!(
            events,
            vec![
                OutputEvent::TurnStarted { turn },
                OutputEvent::TurnFailed {
                    turn,
                    reason: "agent setup failed: no model".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_panic_is_isolated_to_the_turn() {
        let (executor, _ready, conversation) = setup().await;
        let turn = enqueue(&conversation, "panic").await;

        executor.run_turn(Arc::clone(&conversation)).await;

        let events = conversation.drain().await;
        match events.last() {
            Some(OutputEvent::TurnFailed { turn: t, reason }) => {
                assert_eq!(*t, turn);
                assert!(reason.contains("agent exploded"));
            }
            other => panic!("expected turn failure, got {:?}", other),
        }

        let next = enqueue(&conversation, "still alive").await;
        executor.run_turn(Arc::clone(&conversation)).await;
        let events = conversation.drain().await;
        assert_eq!(events.last(), Some(&OutputEvent::TurnCompleted { turn: next }));
    }

    #[tokio::test]
    async fn test_empty_ready_conversation_is_skipped() {
        let (executor, _ready, conversation) = setup().await;
        executor.run_turn(Arc::clone(&conversation)).await;
        assert!(conversation.drain().await.is_empty());
    }
}
