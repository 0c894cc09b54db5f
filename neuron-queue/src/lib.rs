#![deny(missing_docs)]
//! Staged message ingress for neuron agents.
//!
//! Decouples whoever is sending messages to an agent from the step
//! loop's read of conversation history. [`send`](MessageQueue::send)
//! stages an entry; [`flush`](MessageQueue::flush) is the only place
//! staged entries become both part of in-memory history and part of
//! the persisted record — so a flush either succeeds for the whole
//! batch or leaves everything exactly as it was, never half-applied.

use async_trait::async_trait;
use layer0::content::{Content, ContentBlock, Message, Role};
use layer0::id::AgentId;
use neuron_persist::{PersistError, PersistenceStore};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors from staging or flushing messages.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum QueueError {
    /// A reminder was sent with non-text content.
    #[error("reminders must be text content")]
    ReminderMustBeText,

    /// The persistence layer rejected the flush.
    #[error("persist failed: {0}")]
    Persist(#[from] PersistError),
}

/// What kind of entry was staged. Governs whether staging it wakes the
/// step loop.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// A message from the conversation's driver. Staging one invokes
    /// [`EnsureProcessing::ensure_processing`].
    User,
    /// A system-injected reminder (todo status, file-change watcher,
    /// ...). Enters history without waking the step loop.
    Reminder,
}

/// Options accompanying a reminder send.
#[non_exhaustive]
#[derive(Debug, Clone, Default)]
pub struct ReminderOptions {
    /// A short tag identifying what produced the reminder (e.g.
    /// `"todo_watcher"`), passed through to the template.
    pub source: Option<String>,
}

/// Turns raw reminder text into the text actually stored in history.
/// Implementations are template-provided — the queue has no opinion on
/// wording.
pub trait ReminderTemplate: Send + Sync {
    /// Wrap `content` for insertion into history.
    fn wrap(&self, content: &str, opts: &ReminderOptions) -> String;
}

/// The default reminder template: a bracketed tag plus the text.
pub struct DefaultReminderTemplate;

impl ReminderTemplate for DefaultReminderTemplate {
    fn wrap(&self, content: &str, opts: &ReminderOptions) -> String {
        match &opts.source {
            Some(source) => format!("[reminder:{source}] {content}"),
            None => format!("[reminder] {content}"),
        }
    }
}

/// Wakes the step loop when a user message is staged. Staging a
/// reminder never calls this — reminders ride along on the next step
/// the loop was already going to take.
#[async_trait]
pub trait EnsureProcessing: Send + Sync {
    /// Signal that there is new user input to process.
    async fn ensure_processing(&self);
}

/// An [`EnsureProcessing`] that does nothing — for queues driven
/// externally (tests, or a caller that polls instead of pushing).
pub struct NoopEnsureProcessing;

#[async_trait]
impl EnsureProcessing for NoopEnsureProcessing {
    async fn ensure_processing(&self) {}
}

/// One staged entry, not yet known to be durable.
#[derive(Debug, Clone)]
pub struct QueuedEntry {
    /// `msg-{timestamp}-{rand}`, assigned at send time.
    pub id: String,
    /// Why this entry exists.
    pub kind: MessageKind,
    /// The message as it will appear in history.
    pub message: Message,
    /// Caller-supplied metadata, not interpreted by the queue.
    pub metadata: serde_json::Value,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn generate_message_id() -> String {
    format!("msg-{}-{}", now_ms(), ulid::Ulid::new())
}

/// Staged ingress in front of an agent's conversation history.
pub struct MessageQueue {
    agent_id: AgentId,
    store: Arc<dyn PersistenceStore>,
    trigger: Arc<dyn EnsureProcessing>,
    reminder_template: Arc<dyn ReminderTemplate>,
    history: RwLock<Vec<Message>>,
    appended_ids: RwLock<HashSet<String>>,
    pending: RwLock<Vec<QueuedEntry>>,
}

impl MessageQueue {
    /// Create a queue for `agent_id`, backed by `store`, waking
    /// `trigger` on every user send. Starts with empty history — call
    /// [`Self::load`] to hydrate from a prior session.
    pub fn new(agent_id: AgentId, store: Arc<dyn PersistenceStore>, trigger: Arc<dyn EnsureProcessing>) -> Self {
        Self {
            agent_id,
            store,
            trigger,
            reminder_template: Arc::new(DefaultReminderTemplate),
            history: RwLock::new(Vec::new()),
            appended_ids: RwLock::new(HashSet::new()),
            pending: RwLock::new(Vec::new()),
        }
    }

    /// Override the reminder-wrapping template.
    pub fn with_reminder_template(mut self, template: Arc<dyn ReminderTemplate>) -> Self {
        self.reminder_template = template;
        self
    }

    /// Hydrate in-memory history from the persistence layer. Call once
    /// at startup, before serving any sends.
    pub async fn load(&self) -> Result<(), QueueError> {
        let messages = self.store.load_messages(&self.agent_id).await?;
        *self.history.write().await = messages;
        Ok(())
    }

    /// A snapshot of the current in-memory history (includes everything
    /// already flushed, not pending entries).
    pub async fn history(&self) -> Vec<Message> {
        self.history.read().await.clone()
    }

    /// How many entries are staged but not yet flushed.
    pub async fn pending_len(&self) -> usize {
        self.pending.read().await.len()
    }

    /// Stage `content` for the next flush. Returns the assigned id.
    ///
    /// Reminders must carry text content. Staging a `User` entry wakes
    /// the step loop via [`EnsureProcessing`]; staging a `Reminder`
    /// does not.
    pub async fn send(
        &self,
        content: Content,
        kind: MessageKind,
        metadata: Option<serde_json::Value>,
        reminder_opts: Option<ReminderOptions>,
    ) -> Result<String, QueueError> {
        let message = match kind {
            MessageKind::User => Message::new(Role::User, content_to_blocks(content)),
            MessageKind::Reminder => {
                let text = content.as_text().ok_or(QueueError::ReminderMustBeText)?;
                let wrapped = self.reminder_template.wrap(text, &reminder_opts.unwrap_or_default());
                Message::new(Role::User, vec![ContentBlock::Text { text: wrapped }])
            }
        };

        let id = generate_message_id();
        let entry = QueuedEntry {
            id: id.clone(),
            kind,
            message,
            metadata: metadata.unwrap_or(serde_json::Value::Null),
        };
        self.pending.write().await.push(entry);

        if kind == MessageKind::User {
            self.trigger.ensure_processing().await;
        }

        Ok(id)
    }

    /// Apply every staged entry: append each to in-memory history (a
    /// no-op for ids already present, so a retried flush after a
    /// failed persist never duplicates), persist the full history, and
    /// only then drop the flushed entries from `pending`.
    ///
    /// On persist failure, `pending` is untouched and the error
    /// propagates — the caller is expected to retry.
    pub async fn flush(&self) -> Result<usize, QueueError> {
        let batch = self.pending.read().await.clone();
        if batch.is_empty() {
            return Ok(0);
        }

        {
            let mut history = self.history.write().await;
            let mut appended = self.appended_ids.write().await;
            for entry in &batch {
                if appended.insert(entry.id.clone()) {
                    history.push(entry.message.clone());
                }
            }
        }

        let snapshot = self.history.read().await.clone();
        self.store.save_messages(&self.agent_id, &snapshot).await?;

        let batch_ids: HashSet<&str> = batch.iter().map(|e| e.id.as_str()).collect();
        self.pending.write().await.retain(|e| !batch_ids.contains(e.id.as_str()));

        Ok(batch.len())
    }

    /// Append step-loop-generated messages (an assistant turn, a
    /// synthetic tool-result message) directly to history and persist,
    /// bypassing the pending/`ensure_processing` path `send` uses for
    /// externally-originated messages. The step loop already knows
    /// these belong in history the moment it produces them.
    pub async fn append_and_persist(&self, messages: Vec<Message>) -> Result<(), QueueError> {
        {
            let mut history = self.history.write().await;
            history.extend(messages);
        }
        let snapshot = self.history.read().await.clone();
        self.store.save_messages(&self.agent_id, &snapshot).await?;
        Ok(())
    }
}

fn content_to_blocks(content: Content) -> Vec<ContentBlock> {
    match content {
        Content::Text(text) => vec![ContentBlock::Text { text }],
        Content::Blocks(blocks) => blocks,
    }
}
