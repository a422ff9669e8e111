//! Conversation Registry
//!
//! Owns every conversation for the lifetime of the process. Conversations are
//! scoped to the identity that created them: lookups by another identity fail
//! with `NotAuthorized`, and listings only ever show the caller's own
//! conversations.
//!
//! The registry is a two-level structure behind a single `RwLock`: conversations
//! by id, plus a per-owner index that preserves creation order. Creation takes
//! the write lock for both levels at once, so a lookup can never observe a
//! half-registered conversation.

use crate::cancel::CancelSignal;
use crate::channel::{InputChannel, OutputChannel};
use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sdk::types::{ConversationId, Identity, OutputEvent, Role, TurnId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Message in a conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Author of the message
    pub role: Role,

    /// Message text
    pub content: String,

    /// Position in the history, starting at 0. History is ordered by turn.
    pub sequence: u64,

    /// Turn the message belongs to
    pub turn: TurnId,

    /// When the message was appended
    pub appended_at: DateTime<Utc>,
}

/// History entry with the fragments of a turn merged into one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub turn: TurnId,
    pub content: String,
}

/// Where a conversation is in its turn lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// Nothing pending, nothing running
    Idle,

    /// An envelope is waiting for the executor
    Queued,

    /// A turn is executing and nothing newer is pending
    Running,
}

/// Options for a new conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationOptions {
    /// Whether turns run in agent (tool-using) mode
    pub agent_mode: bool,
}

impl Default for ConversationOptions {
    fn default() -> Self {
        Self { agent_mode: true }
    }
}

/// Public view of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub owner: Identity,
    pub created_at: DateTime<Utc>,
    pub agent_mode: bool,
    pub message_count: usize,
    pub state: TurnState,
}

/// Input side of a conversation, guarded by one lock
///
/// Submission (set signal, clear, enqueue) and dequeue (pop, clear signal)
/// both happen under this lock, which is what makes cancel-and-replace atomic.
#[derive(Debug, Default)]
pub(crate) struct InputSide {
    pub(crate) channel: InputChannel,
    pub(crate) running: Option<TurnId>,
    next_turn: u64,
}

impl InputSide {
    pub(crate) fn allocate_turn(&mut self) -> TurnId {
        self.next_turn += 1;
        TurnId(self.next_turn)
    }

    pub(crate) fn state(&self) -> TurnState {
        if !self.channel.is_empty() {
            TurnState::Queued
        } else if self.running.is_some() {
            TurnState::Running
        } else {
            TurnState::Idle
        }
    }
}

/// A single conversation
///
/// Lock order is input → output → history; no path takes them in reverse.
#[derive(Debug)]
pub struct Conversation {
    id: ConversationId,
    owner: Identity,
    created_at: DateTime<Utc>,
    agent_mode: bool,
    pub(crate) signal: CancelSignal,
    pub(crate) input: Mutex<InputSide>,
    pub(crate) output: OutputChannel,
    history: Mutex<Vec<Message>>,
}

impl Conversation {
    fn new(owner: Identity, options: ConversationOptions) -> Self {
        Self {
            id: ConversationId::new(Uuid::new_v4().to_string()),
            owner,
            created_at: Utc::now(),
            agent_mode: options.agent_mode,
            signal: CancelSignal::new(),
            input: Mutex::new(InputSide::default()),
            output: OutputChannel::new(),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    pub fn owner(&self) -> &Identity {
        &self.owner
    }

    pub fn agent_mode(&self) -> bool {
        self.agent_mode
    }

    /// Current lifecycle state
    pub async fn state(&self) -> TurnState {
        self.input.lock().await.state()
    }

    /// Snapshot of the committed history
    pub async fn messages(&self) -> Vec<Message> {
        self.history.lock().await.clone()
    }

    /// Append a message and return its sequence number
    pub(crate) async fn append_message(&self, role: Role, turn: TurnId, content: String) -> u64 {
        let mut history = self.history.lock().await;
        insert_in_turn_order(&mut history, role, turn, content)
    }

    /// Remove every buffered output event, committing fragments to history
    ///
    /// The output buffer stays locked until the fragments are appended, so
    /// concurrent drains cannot commit out of order or twice.
    pub(crate) async fn drain(&self) -> Vec<OutputEvent> {
        let mut buffer = self.output.lock().await;
        let events: Vec<OutputEvent> = buffer.drain(..).collect();

        let mut history = self.history.lock().await;
        for event in &events {
            if let OutputEvent::Fragment { turn, text } = event {
                insert_in_turn_order(&mut history, Role::System, *turn, text.clone());
            }
        }
        events
    }

    pub async fn summary(&self) -> ConversationSummary {
        let state = self.state().await;
        let message_count = self.history.lock().await.len();
        ConversationSummary {
            id: self.id.clone(),
            owner: self.owner.clone(),
            created_at: self.created_at,
            agent_mode: self.agent_mode,
            message_count,
            state,
        }
    }
}

/// Insert a message after every message of its own or an earlier turn
///
/// History stays grouped by turn even when a finished turn's fragments are
/// drained after the next submission was recorded. Sequence numbers of the
/// messages behind the insertion point shift by one. Returns the sequence
/// number of the inserted message.
fn insert_in_turn_order(history: &mut Vec<Message>, role: Role, turn: TurnId, content: String) -> u64 {
    let at = history
        .iter()
        .rposition(|m| m.turn <= turn)
        .map_or(0, |i| i + 1);

    history.insert(
        at,
        Message {
            role,
            content,
            sequence: at as u64,
            turn,
            appended_at: Utc::now(),
        },
    );
    for (sequence, message) in history.iter_mut().enumerate().skip(at + 1) {
        message.sequence = sequence as u64;
    }
    at as u64
}

/// Merge the system fragments of each turn into a single entry
///
/// Consecutive system messages of the same turn are concatenated and trimmed;
/// entries left empty are dropped. Submitter messages pass through unchanged.
/// Fragments of interrupted turns are kept, so a cancelled answer still shows
/// whatever was delivered before it was superseded.
pub fn build_transcript(messages: &[Message]) -> Vec<TranscriptEntry> {
    let mut entries: Vec<TranscriptEntry> = Vec::new();
    let mut open: Option<TranscriptEntry> = None;

    for message in messages {
        match message.role {
            Role::Submitter => {
                if let Some(entry) = open.take() {
                    push_trimmed(&mut entries, entry);
                }
                entries.push(TranscriptEntry {
                    role: Role::Submitter,
                    turn: message.turn,
                    content: message.content.clone(),
                });
            }
            Role::System => match open.as_mut() {
                Some(entry) if entry.turn == message.turn => {
                    entry.content.push_str(&message.content);
                }
                _ => {
                    if let Some(entry) = open.take() {
                        push_trimmed(&mut entries, entry);
                    }
                    open = Some(TranscriptEntry {
                        role: Role::System,
                        turn: message.turn,
                        content: message.content.clone(),
                    });
                }
            },
        }
    }

    if let Some(entry) = open {
        push_trimmed(&mut entries, entry);
    }
    entries
}

fn push_trimmed(entries: &mut Vec<TranscriptEntry>, mut entry: TranscriptEntry) {
    let trimmed = entry.content.trim();
    if trimmed.is_empty() {
        return;
    }
    entry.content = trimmed.to_string();
    entries.push(entry);
}

#[derive(Debug, Default)]
struct RegistryInner {
    by_id: HashMap<ConversationId, Arc<Conversation>>,
    by_owner: HashMap<Identity, Vec<ConversationId>>,
}

/// Registry of all conversations, scoped by owner
#[derive(Debug, Default)]
pub struct ConversationRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new conversation for `owner`. Always succeeds.
    pub async fn create(&self, owner: &Identity, options: ConversationOptions) -> Arc<Conversation> {
        let conversation = Arc::new(Conversation::new(owner.clone(), options));
        let id = conversation.id().clone();

        let mut inner = self.inner.write().await;
        inner.by_id.insert(id.clone(), Arc::clone(&conversation));
        inner.by_owner.entry(owner.clone()).or_default().push(id.clone());
        drop(inner);

        debug!(conversation_id = %id, owner = %owner, "conversation created");
        conversation
    }

    /// Resolve a conversation on behalf of `owner`
    ///
    /// # Errors
    ///
    /// - `NotFound` if the id is unknown
    /// - `NotAuthorized` if the conversation belongs to someone else
    pub async fn get(&self, owner: &Identity, id: &ConversationId) -> Result<Arc<Conversation>> {
        let inner = self.inner.read().await;
        let conversation = inner
            .by_id
            .get(id)
            .ok_or_else(|| EngineError::NotFound(id.clone()))?;

        if conversation.owner() != owner {
            return Err(EngineError::NotAuthorized(id.clone()));
        }
        Ok(Arc::clone(conversation))
    }

    /// Summaries of the owner's conversations, in creation order
    pub async fn list(&self, owner: &Identity) -> Vec<ConversationSummary> {
        let conversations: Vec<Arc<Conversation>> = {
            let inner = self.inner.read().await;
            inner
                .by_owner
                .get(owner)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| inner.by_id.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut summaries = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            summaries.push(conversation.summary().await);
        }
        summaries
    }

    /// Total number of conversations across all owners
    pub async fn len(&self) -> usize {
        self.inner.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(role: Role, turn: u64, content: &str, sequence: u64) -> Message {
        Message {
            role,
            content: content.to_string(),
            sequence,
            turn: TurnId(turn),
            appended_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = ConversationRegistry::new();
        let owner = Identity::from("u1");
        let conversation = registry.create(&owner, ConversationOptions::default()).await;

        let fetched = registry.get(&owner, conversation.id()).await.unwrap();
        assert_eq!(fetched.id(), conversation.id());
        assert!(fetched.agent_mode());
        assert_eq!(fetched.state().await, TurnState::Idle);
        assert!(!fetched.signal.is_set());
        assert!(fetched.messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let registry = ConversationRegistry::new();
        let err = registry
            .get(&Identity::from("u1"), &ConversationId::from("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_get_other_owner_is_not_authorized() {
        let registry = ConversationRegistry::new();
        let conversation = registry
            .create(&Identity::from("u1"), ConversationOptions::default())
            .await;

        let err = registry
            .get(&Identity::from("u2"), conversation.id())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotAuthorized(_)));
    }

    #[tokio::test]
    async fn test_list_is_scoped_and_ordered() {
        let registry = ConversationRegistry::new();
        let alice = Identity::from("alice");
        let bob = Identity::from("bob");

        let a1 = registry.create(&alice, ConversationOptions::default()).await;
        let b1 = registry.create(&bob, ConversationOptions::default()).await;
        let a2 = registry
            .create(&alice, ConversationOptions { agent_mode: false })
            .await;

        let listed = registry.list(&alice).await;
        let ids: Vec<_> = listed.iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, vec![a1.id().clone(), a2.id().clone()]);
        assert!(!listed[1].agent_mode);
        assert!(listed.iter().all(|s| s.owner == alice));
        assert!(!ids.contains(b1.id()));

        assert!(registry.list(&Identity::from("carol")).await.is_empty());
        assert_eq!(registry.len().await, 3);
    }

    #[test]
    fn test_transcript_merges_fragments_per_turn() {
        let messages = vec![
            message(Role::Submitter, 1, "hello", 0),
            message(Role::System, 1, "hi ", 1),
            message(Role::System, 1, "there", 2),
            message(Role::Submitter, 2, "again", 3),
            message(Role::System, 2, "  ", 4),
            message(Role::Submitter, 3, "third", 5),
            message(Role::System, 3, "partial", 6),
        ];

        let transcript = build_transcript(&messages);
        let flat: Vec<(Role, &str)> = transcript
            .iter()
            .map(|e| (e.role, e.content.as_str()))
            .collect();
        assert_eq!(
            flat,
            vec![
                (Role::Submitter, "hello"),
                (Role::System, "hi there"),
                (Role::Submitter, "again"),
                (Role::Submitter, "third"),
                (Role::System, "partial"),
            ]
        );
    }

    #[test]
    fn test_input_side_state() {
        let mut side = InputSide::default();
        assert_eq!(side.state(), TurnState::Idle);

        let turn = side.allocate_turn();
        assert_eq!(turn, TurnId(1));
        side.running = Some(turn);
        assert_eq!(side.state(), TurnState::Running);

        let next_turn = side.allocate_turn();
        side.channel.push(crate::channel::InputEnvelope::new(
            ConversationId::from("c"),
            next_turn,
            "next",
        ));
        assert_eq!(side.state(), TurnState::Queued);
    }

    #[tokio::test]
    async fn test_late_fragments_stay_with_their_turn() {
        let registry = ConversationRegistry::new();
        let conversation = registry
            .create(&Identity::from("u1"), ConversationOptions::default())
            .await;
        let signal = CancelSignal::new();

        conversation
            .append_message(Role::Submitter, TurnId(1), "a b c".to_string())
            .await;
        conversation
            .output
            .push_fragment(TurnId(1), "a ".to_string(), &signal)
            .await;
        conversation.drain().await;

        // Turn 1 finishes, undrained, before turn 2 is submitted.
        conversation
            .output
            .push_fragment(TurnId(1), "b c".to_string(), &signal)
            .await;
        let sequence = conversation
            .append_message(Role::Submitter, TurnId(2), "z".to_string())
            .await;
        assert_eq!(sequence, 2);
        conversation
            .output
            .push_fragment(TurnId(2), "z".to_string(), &signal)
            .await;
        conversation.drain().await;

        let history = conversation.messages().await;
        let order: Vec<(Role, u64, &str, u64)> = history
            .iter()
            .map(|m| (m.role, m.turn.0, m.content.as_str(), m.sequence))
            .collect();
        assert_eq!(
            order,
            vec![
                (Role::Submitter, 1, "a b c", 0),
                (Role::System, 1, "a ", 1),
                (Role::System, 1, "b c", 2),
                (Role::Submitter, 2, "z", 3),
                (Role::System, 2, "z", 4),
            ]
        );

        let transcript: Vec<(Role, String)> = build_transcript(&history)
            .into_iter()
            .map(|e| (e.role, e.content))
            .collect();
        assert_eq!(
            transcript,
            vec![
                (Role::Submitter, "a b c".to_string()),
                (Role::System, "a b c".to_string()),
                (Role::Submitter, "z".to_string()),
                (Role::System, "z".to_string()),
            ]
        );
    }
}
