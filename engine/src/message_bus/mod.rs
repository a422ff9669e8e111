//! Message Bus for turn lifecycle notifications
//!
//! The MessageBus provides a pub/sub pattern so observers (dashboards, loggers,
//! tests) can follow turn lifecycles across every conversation without
//! touching conversation state. It uses bounded channels to prevent unbounded
//! memory growth and supports both specific event subscriptions and global
//! "All" subscriptions.
//!
//! Publishing never waits: the single turn executor is a publisher, and a slow
//! subscriber must not stall every conversation. Events for a full or closed
//! subscriber channel are dropped.

use sdk::types::{ConversationId, Identity, TurnId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tracing::trace;

/// Default channel buffer size for bounded channels
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Event kinds that can be subscribed to
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum EventKind {
    ConversationCreated,
    TurnStarted,
    TurnCompleted,
    TurnCancelled,
    TurnFailed,
    RunnerStarted,
    RunnerStopping,
    /// Subscribe to all event kinds
    All,
}

/// Events that can be published on the message bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// A conversation was registered
    ConversationCreated {
        conversation_id: ConversationId,
        owner: Identity,
    },
    /// The executor dequeued an envelope and started its turn
    TurnStarted {
        conversation_id: ConversationId,
        turn: TurnId,
    },
    /// A turn ran to its natural end
    TurnCompleted {
        conversation_id: ConversationId,
        turn: TurnId,
        fragments: usize,
    },
    /// A turn was superseded
    TurnCancelled {
        conversation_id: ConversationId,
        turn: TurnId,
    },
    /// A turn failed inside the agent
    TurnFailed {
        conversation_id: ConversationId,
        turn: TurnId,
        reason: String,
    },
    /// The executor worker is running
    RunnerStarted,
    /// The runner is shutting down
    RunnerStopping,
}

impl BusEvent {
    /// Get the kind of this event
    pub fn kind(&self) -> EventKind {
        match self {
            BusEvent::ConversationCreated { .. } => EventKind::ConversationCreated,
            BusEvent::TurnStarted { .. } => EventKind::TurnStarted,
            BusEvent::TurnCompleted { .. } => EventKind::TurnCompleted,
            BusEvent::TurnCancelled { .. } => EventKind::TurnCancelled,
            BusEvent::TurnFailed { .. } => EventKind::TurnFailed,
            BusEvent::RunnerStarted => EventKind::RunnerStarted,
            BusEvent::RunnerStopping => EventKind::RunnerStopping,
        }
    }
}

/// Message bus for pub/sub communication between components
pub struct MessageBus {
    /// Map of event kinds to lists of subscribers
    channels: Arc<Mutex<HashMap<EventKind, Vec<mpsc::Sender<BusEvent>>>>>,

    /// Capacity of each subscriber channel
    capacity: usize,
}

impl MessageBus {
    /// Create a new MessageBus with the default channel capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new MessageBus whose subscriber channels hold `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to a specific event kind
    ///
    /// Returns a receiver that will receive events of the specified kind, or
    /// every event for `EventKind::All`.
    pub async fn subscribe(&self, kind: EventKind) -> mpsc::Receiver<BusEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut channels = self.channels.lock().await;
        channels.entry(kind).or_default().push(tx);
        rx
    }

    /// Publish an event to all subscribers
    ///
    /// The event is sent to subscribers of its kind and to `All` subscribers.
    /// Closed subscribers are pruned; full ones miss this event.
    pub async fn publish(&self, event: BusEvent) {
        let mut channels = self.channels.lock().await;
        let kind = event.kind();

        for key in [kind, EventKind::All] {
            if let Some(subscribers) = channels.get_mut(&key) {
                subscribers.retain(|tx| match tx.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        trace!(?kind, "bus subscriber full, event dropped");
                        true
                    }
                    Err(TrySendError::Closed(_)) => false,
                });
            }
        }
    }

    /// Number of live subscriber channels
    pub async fn subscriber_count(&self) -> usize {
        self.channels.lock().await.values().map(Vec::len).sum()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
