//! The persistence contract: the backend-agnostic surface the core
//! depends on to save/load conversation state.

use crate::error::PersistError;
use crate::types::{AgentInfo, AggregateStats, ConsistencyReport, EventEnvelope, Snapshot, ToolCallRecord};
use async_trait::async_trait;
use layer0::content::Message;
use layer0::duration::DurationMs;
use layer0::id::AgentId;

/// A held lock lease on an agent. Single-shot: `release` consumes the
/// guard, and calling it twice is a logic error the type system
/// prevents (there is no second `Box<Self>` to call it on).
#[async_trait]
pub trait AgentLockGuard: Send + Sync {
    /// Release the lease early, before its TTL expires.
    async fn release(self: Box<Self>) -> Result<(), PersistError>;
}

/// Optional filters for `query_messages`. `None` means "no filter on
/// this dimension".
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    /// Only messages at or after this index.
    pub from_index: Option<usize>,
    /// Only messages before this index.
    pub to_index: Option<usize>,
}

/// The persistence surface the core depends on, backend-agnostic.
///
/// `saveMessages` replaces the full sequence atomically (or per-row in
/// an ordered table keyed by seq — the observable outcome is the new
/// sequence or the old one, never a mix). `appendEvent` is total-order
/// within an agent; a cursor gap is a consistency violation the
/// backend must refuse rather than silently accept.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Replace this agent's full message sequence.
    async fn save_messages(&self, agent: &AgentId, messages: &[Message]) -> Result<(), PersistError>;

    /// Load this agent's message sequence, empty if none saved yet.
    async fn load_messages(&self, agent: &AgentId) -> Result<Vec<Message>, PersistError>;

    /// Replace this agent's full tool-call-record set.
    async fn save_tool_call_records(
        &self,
        agent: &AgentId,
        records: &[ToolCallRecord],
    ) -> Result<(), PersistError>;

    /// Load this agent's tool-call records, empty if none saved yet.
    async fn load_tool_call_records(&self, agent: &AgentId) -> Result<Vec<ToolCallRecord>, PersistError>;

    /// Append one event. The backend assigns `cursor` and MUST reject
    /// the append (a [`PersistError::CursorViolation`]) if doing so
    /// would leave a gap.
    async fn append_event(&self, agent: &AgentId, envelope: EventEnvelope) -> Result<(), PersistError>;

    /// Read events from `from_cursor` (inclusive) onward, or from the
    /// start if `None`.
    async fn read_events(
        &self,
        agent: &AgentId,
        from_cursor: Option<u64>,
    ) -> Result<Vec<EventEnvelope>, PersistError>;

    /// Save a point-in-time snapshot.
    async fn save_snapshot(&self, agent: &AgentId, snapshot: &Snapshot) -> Result<(), PersistError>;

    /// Load a snapshot by id.
    async fn load_snapshot(&self, agent: &AgentId, id: &str) -> Result<Option<Snapshot>, PersistError>;

    /// List all snapshots for this agent, most recent first.
    async fn list_snapshots(&self, agent: &AgentId) -> Result<Vec<Snapshot>, PersistError>;

    /// Save agent-level metadata.
    async fn save_info(&self, agent: &AgentId, info: &AgentInfo) -> Result<(), PersistError>;

    /// Load agent-level metadata, if any has been saved.
    async fn load_info(&self, agent: &AgentId) -> Result<Option<AgentInfo>, PersistError>;

    /// Whether any record exists for this agent.
    async fn exists(&self, agent: &AgentId) -> Result<bool, PersistError>;

    /// List known agent ids, optionally filtered by id prefix.
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<AgentId>, PersistError>;

    /// Delete everything for this agent: messages, tool-call records,
    /// events, snapshots, and info.
    async fn delete(&self, agent: &AgentId) -> Result<(), PersistError>;

    /// Query messages with filters. Backends that don't support
    /// querying beyond `load_messages` may leave the default, which
    /// loads everything and filters in memory.
    async fn query_messages(&self, agent: &AgentId, query: MessageQuery) -> Result<Vec<Message>, PersistError> {
        let messages = self.load_messages(agent).await?;
        let from = query.from_index.unwrap_or(0);
        let to = query.to_index.unwrap_or(messages.len());
        Ok(messages.get(from..to.min(messages.len())).unwrap_or(&[]).to_vec())
    }

    /// Aggregate usage stats. Unsupported unless a backend overrides it.
    async fn aggregate_stats(&self, _agent: &AgentId) -> Result<AggregateStats, PersistError> {
        Err(PersistError::Unsupported("aggregate_stats"))
    }

    /// Acquire an exclusive lease on this agent for `ttl`. Prevents two
    /// live step loops driving the same agent concurrently. If the
    /// previous holder's lease expired or it crashed, the caller MUST
    /// run resume semantics (sealing non-terminal tool calls) before
    /// continuing.
    async fn acquire_agent_lock(
        &self,
        _agent: &AgentId,
        _ttl: DurationMs,
    ) -> Result<Box<dyn AgentLockGuard>, PersistError> {
        Err(PersistError::Unsupported("acquire_agent_lock"))
    }

    /// Cheap liveness probe for the backend itself (not agent-specific).
    async fn health_check(&self) -> Result<(), PersistError> {
        Ok(())
    }

    /// Check this agent's persisted state for structural problems
    /// (event cursor gaps, tool calls stuck non-terminal, ...).
    async fn check_consistency(&self, _agent: &AgentId) -> Result<ConsistencyReport, PersistError> {
        Err(PersistError::Unsupported("check_consistency"))
    }
}
