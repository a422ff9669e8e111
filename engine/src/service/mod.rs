//! Runner Service
//!
//! The facade collaborators use to drive conversations. It owns the registry,
//! the ready queue and the single turn executor worker, and implements the
//! cancel-and-replace policy:
//!
//! 1. Resolve and authorize the conversation
//! 2. Set its cancellation signal (superseding the running turn)
//! 3. Clear envelopes that have not been dequeued yet
//! 4. Append the submitter message to history
//! 5. Enqueue the new envelope and wake the executor
//!
//! Steps 2-5 run under the conversation's input lock, the same lock the
//! executor holds while it dequeues and clears the signal, so a submission
//! can never interleave with the start of a turn.
//!
//! # Lifecycle
//!
//! The service is an ordinary value: [`RunnerService::start`] spawns the
//! worker on the current Tokio runtime and [`RunnerService::stop`] shuts it
//! down. There is no global instance.
//!
//! # Examples
//!
//! ```no_run
//! use baton_engine::agent::EchoAgent;
//! use baton_engine::config::Config;
//! use baton_engine::service::RunnerService;
//! use sdk::types::Identity;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let service = RunnerService::start(&config, Arc::new(EchoAgent::from_config(&config.agent)));
//!
//! let owner = Identity::from("u1");
//! let id = service.create_conversation(&owner).await;
//! service.submit_input(&owner, &id, "hello").await?;
//!
//! let events = service.drain_output(&owner, &id).await?;
//! println!("{} new events", events.len());
//!
//! service.stop().await?;
//! # Ok(())
//! # }
//! ```

use crate::cancel::CancelSignal;
use crate::channel::InputEnvelope;
use crate::config::Config;
use crate::executor::{ReadyQueue, TurnExecutor};
use crate::message_bus::{BusEvent, EventKind, MessageBus};
use crate::registry::{
    build_transcript, Conversation, ConversationOptions, ConversationRegistry,
    ConversationSummary, Message, TranscriptEntry,
};
use sdk::capability::TurnAgent;
use sdk::errors::EngineError;
use sdk::types::{ConversationId, Identity, OutputEvent, Role, TurnId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result type for service operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Multi-tenant turn runner
pub struct RunnerService {
    registry: ConversationRegistry,
    ready: Arc<ReadyQueue>,
    bus: Arc<MessageBus>,

    /// Set once `stop` begins; new submissions are refused
    stopping: AtomicBool,

    /// Wakes the worker and cancels its running turn on stop
    shutdown: CancelSignal,

    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown_timeout: Duration,
    max_content_bytes: usize,
    default_agent_mode: bool,
}

impl RunnerService {
    /// Start a runner and its executor worker
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: &Config, agent: Arc<dyn TurnAgent>) -> Self {
        let ready = Arc::new(ReadyQueue::new());
        let bus = Arc::new(MessageBus::with_capacity(config.bus.channel_capacity));
        let shutdown = CancelSignal::new();

        let executor = TurnExecutor::new(
            agent,
            Arc::clone(&ready),
            Arc::clone(&bus),
            shutdown.clone(),
            config.runner.idle_poll_interval(),
        );
        let worker = tokio::spawn(executor.run());

        info!(
            shutdown_timeout_secs = config.runner.shutdown_timeout_secs,
            max_content_bytes = config.runner.max_content_bytes,
            "runner service started"
        );

        Self {
            registry: ConversationRegistry::new(),
            ready,
            bus,
            stopping: AtomicBool::new(false),
            shutdown,
            worker: Mutex::new(Some(worker)),
            shutdown_timeout: Duration::from_secs(config.runner.shutdown_timeout_secs),
            max_content_bytes: config.runner.max_content_bytes,
            default_agent_mode: config.agent.agent_mode,
        }
    }

    /// Create a conversation with the configured default options
    pub async fn create_conversation(&self, owner: &Identity) -> ConversationId {
        let options = ConversationOptions {
            agent_mode: self.default_agent_mode,
        };
        self.create_conversation_with(owner, options).await
    }

    /// Create a conversation with explicit options
    pub async fn create_conversation_with(
        &self,
        owner: &Identity,
        options: ConversationOptions,
    ) -> ConversationId {
        let conversation = self.registry.create(owner, options).await;
        let id = conversation.id().clone();
        self.bus
            .publish(BusEvent::ConversationCreated {
                conversation_id: id.clone(),
                owner: owner.clone(),
            })
            .await;
        id
    }

    /// The owner's conversations, in creation order
    pub async fn list_conversations(&self, owner: &Identity) -> Vec<ConversationSummary> {
        self.registry.list(owner).await
    }

    /// Submit new input, superseding whatever the conversation is doing
    ///
    /// Returns as soon as the envelope is enqueued, with the turn id it will
    /// run under.
    ///
    /// # Errors
    ///
    /// - `NotFound` / `NotAuthorized` from conversation resolution
    /// - `InputTooLarge` when `max_content_bytes` is exceeded
    /// - `ShuttingDown` once `stop` has begun
    pub async fn submit_input(
        &self,
        owner: &Identity,
        id: &ConversationId,
        content: impl Into<String>,
    ) -> Result<TurnId> {
        let conversation = self.registry.get(owner, id).await?;
        if self.is_stopping() {
            return Err(EngineError::ShuttingDown);
        }

        let content = content.into();
        if self.max_content_bytes > 0 && content.len() > self.max_content_bytes {
            return Err(EngineError::InputTooLarge {
                size: content.len(),
                limit: self.max_content_bytes,
            });
        }

        let turn = Self::replace_input(&conversation, content).await;
        self.ready.mark(conversation).await;
        Ok(turn)
    }

    async fn replace_input(conversation: &Conversation, content: String) -> TurnId {
        let mut input = conversation.input.lock().await;

        let dropped_fragments = conversation
            .output
            .supersede(&conversation.signal, input.running)
            .await;
        let discarded = input.channel.clear();

        let turn = input.allocate_turn();
        conversation
            .append_message(Role::Submitter, turn, content.clone())
            .await;
        input.channel.push(InputEnvelope::new(
            conversation.id().clone(),
            turn,
            content,
        ));
        let running = input.running;
        drop(input);

        debug!(
            conversation_id = %conversation.id(),
            %turn,
            superseded = ?running,
            discarded_envelopes = discarded.len(),
            dropped_fragments,
            "input enqueued"
        );
        turn
    }

    /// Remove and return every event produced since the last drain
    ///
    /// Fragments are committed to the conversation history as they are
    /// drained. An empty vector means nothing new happened.
    pub async fn drain_output(
        &self,
        owner: &Identity,
        id: &ConversationId,
    ) -> Result<Vec<OutputEvent>> {
        let conversation = self.registry.get(owner, id).await?;
        Ok(conversation.drain().await)
    }

    /// Wait up to `timeout` for output, then drain like `drain_output`
    pub async fn wait_output(
        &self,
        owner: &Identity,
        id: &ConversationId,
        timeout: Duration,
    ) -> Result<Vec<OutputEvent>> {
        let conversation = self.registry.get(owner, id).await?;
        conversation.output.wait_nonempty(timeout).await;
        Ok(conversation.drain().await)
    }

    /// Committed history of a conversation
    pub async fn history(&self, owner: &Identity, id: &ConversationId) -> Result<Vec<Message>> {
        let conversation = self.registry.get(owner, id).await?;
        Ok(conversation.messages().await)
    }

    /// History with each turn's fragments merged into one entry
    pub async fn transcript(
        &self,
        owner: &Identity,
        id: &ConversationId,
    ) -> Result<Vec<TranscriptEntry>> {
        let messages = self.history(owner, id).await?;
        Ok(build_transcript(&messages))
    }

    /// Subscribe to turn lifecycle notifications across all conversations
    pub async fn subscribe(&self, kind: EventKind) -> mpsc::Receiver<BusEvent> {
        self.bus.subscribe(kind).await
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Whether the executor worker is still alive
    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Stop the runner
    ///
    /// Refuses new submissions, cancels the running turn and waits up to the
    /// configured shutdown timeout for the worker before aborting it.
    /// Calling `stop` again is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let Some(mut worker) = self.worker.lock().await.take() else {
            return Ok(());
        };

        info!("stopping runner service");
        self.stopping.store(true, Ordering::SeqCst);
        self.bus.publish(BusEvent::RunnerStopping).await;
        self.shutdown.set();

        match tokio::time::timeout(self.shutdown_timeout, &mut worker).await {
            Ok(Ok(())) => info!("runner service stopped"),
            Ok(Err(e)) => warn!("turn executor ended abnormally: {}", e),
            Err(_) => {
                warn!(
                    "turn executor did not stop within {}s, aborting",
                    self.shutdown_timeout.as_secs()
                );
                worker.abort();
            }
        }
        Ok(())
    }
}

impl Drop for RunnerService {
    fn drop(&mut self) {
        // Let a worker that was never stopped exit on its own.
        self.stopping.store(true, Ordering::SeqCst);
        self.shutdown.set();
    }
}
