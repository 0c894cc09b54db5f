//! Test helpers for exercising crash-consistency paths against a real
//! [`PersistenceStore`].

use crate::error::PersistError;
use crate::memory::MemoryStore;
use crate::store::{AgentLockGuard, PersistenceStore};
use crate::types::{AgentInfo, AggregateStats, ConsistencyReport, EventEnvelope, Snapshot, ToolCallRecord};
use async_trait::async_trait;
use layer0::content::Message;
use layer0::duration::DurationMs;
use layer0::id::AgentId;
use std::sync::atomic::{AtomicU32, Ordering};

/// Wraps a [`MemoryStore`] and fails the first `N` calls to
/// `save_messages`, then delegates normally. Used to exercise the
/// message queue's "flush failed, pending stays put" path.
pub struct FailNSavesStore {
    inner: MemoryStore,
    remaining_failures: AtomicU32,
}

impl FailNSavesStore {
    /// Create a store that fails the next `n` `save_messages` calls.
    pub fn new(n: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl PersistenceStore for FailNSavesStore {
    async fn save_messages(&self, agent: &AgentId, messages: &[Message]) -> Result<(), PersistError> {
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(PersistError::WriteFailed("injected failure".into()));
        }
        self.inner.save_messages(agent, messages).await
    }

    async fn load_messages(&self, agent: &AgentId) -> Result<Vec<Message>, PersistError> {
        self.inner.load_messages(agent).await
    }

    async fn save_tool_call_records(
        &self,
        agent: &AgentId,
        records: &[ToolCallRecord],
    ) -> Result<(), PersistError> {
        self.inner.save_tool_call_records(agent, records).await
    }

    async fn load_tool_call_records(&self, agent: &AgentId) -> Result<Vec<ToolCallRecord>, PersistError> {
        self.inner.load_tool_call_records(agent).await
    }

    async fn append_event(&self, agent: &AgentId, envelope: EventEnvelope) -> Result<(), PersistError> {
        self.inner.append_event(agent, envelope).await
    }

    async fn read_events(
        &self,
        agent: &AgentId,
        from_cursor: Option<u64>,
    ) -> Result<Vec<EventEnvelope>, PersistError> {
        self.inner.read_events(agent, from_cursor).await
    }

    async fn save_snapshot(&self, agent: &AgentId, snapshot: &Snapshot) -> Result<(), PersistError> {
        self.inner.save_snapshot(agent, snapshot).await
    }

    async fn load_snapshot(&self, agent: &AgentId, id: &str) -> Result<Option<Snapshot>, PersistError> {
        self.inner.load_snapshot(agent, id).await
    }

    async fn list_snapshots(&self, agent: &AgentId) -> Result<Vec<Snapshot>, PersistError> {
        self.inner.list_snapshots(agent).await
    }

    async fn save_info(&self, agent: &AgentId, info: &AgentInfo) -> Result<(), PersistError> {
        self.inner.save_info(agent, info).await
    }

    async fn load_info(&self, agent: &AgentId) -> Result<Option<AgentInfo>, PersistError> {
        self.inner.load_info(agent).await
    }

    async fn exists(&self, agent: &AgentId) -> Result<bool, PersistError> {
        self.inner.exists(agent).await
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<AgentId>, PersistError> {
        self.inner.list(prefix).await
    }

    async fn delete(&self, agent: &AgentId) -> Result<(), PersistError> {
        self.inner.delete(agent).await
    }

    async fn aggregate_stats(&self, agent: &AgentId) -> Result<AggregateStats, PersistError> {
        self.inner.aggregate_stats(agent).await
    }

    async fn acquire_agent_lock(
        &self,
        agent: &AgentId,
        ttl: DurationMs,
    ) -> Result<Box<dyn AgentLockGuard>, PersistError> {
        self.inner.acquire_agent_lock(agent, ttl).await
    }

    async fn check_consistency(&self, agent: &AgentId) -> Result<ConsistencyReport, PersistError> {
        self.inner.check_consistency(agent).await
    }
}
