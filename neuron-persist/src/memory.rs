//! In-memory [`PersistenceStore`] implementation.
//!
//! Mirrors `neuron-state-memory`'s `MemoryStore`: a `HashMap` behind a
//! `RwLock`, suitable for tests and single-process prototyping. Nothing
//! survives a process restart.

use crate::error::PersistError;
use crate::store::{AgentLockGuard, PersistenceStore};
use crate::types::{AgentInfo, AggregateStats, ConsistencyReport, EventEnvelope, LockLease, Snapshot, ToolCallRecord};
use async_trait::async_trait;
use layer0::content::Message;
use layer0::duration::DurationMs;
use layer0::id::AgentId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Clone, Copy)]
struct LockState {
    token: u64,
    expires_at_ms: u64,
}

#[derive(Default)]
struct AgentRecord {
    messages: Vec<Message>,
    tool_calls: Vec<ToolCallRecord>,
    events: Vec<EventEnvelope>,
    snapshots: Vec<Snapshot>,
    info: Option<AgentInfo>,
    lock: Option<LockState>,
}

struct Inner {
    data: RwLock<HashMap<String, AgentRecord>>,
    lock_tokens: AtomicU64,
}

/// In-memory persistence store.
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                data: RwLock::new(HashMap::new()),
                lock_tokens: AtomicU64::new(0),
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryLockGuard {
    inner: Arc<Inner>,
    agent_key: String,
    token: u64,
}

#[async_trait]
impl AgentLockGuard for MemoryLockGuard {
    async fn release(self: Box<Self>) -> Result<(), PersistError> {
        let mut data = self.inner.data.write().await;
        if let Some(record) = data.get_mut(&self.agent_key) {
            if record.lock.is_some_and(|l| l.token == self.token) {
                record.lock = None;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceStore for MemoryStore {
    async fn save_messages(&self, agent: &AgentId, messages: &[Message]) -> Result<(), PersistError> {
        let mut data = self.inner.data.write().await;
        data.entry(agent.as_str().to_owned()).or_default().messages = messages.to_vec();
        Ok(())
    }

    async fn load_messages(&self, agent: &AgentId) -> Result<Vec<Message>, PersistError> {
        let data = self.inner.data.read().await;
        Ok(data.get(agent.as_str()).map(|r| r.messages.clone()).unwrap_or_default())
    }

    async fn save_tool_call_records(
        &self,
        agent: &AgentId,
        records: &[ToolCallRecord],
    ) -> Result<(), PersistError> {
        let mut data = self.inner.data.write().await;
        data.entry(agent.as_str().to_owned()).or_default().tool_calls = records.to_vec();
        Ok(())
    }

    async fn load_tool_call_records(&self, agent: &AgentId) -> Result<Vec<ToolCallRecord>, PersistError> {
        let data = self.inner.data.read().await;
        Ok(data.get(agent.as_str()).map(|r| r.tool_calls.clone()).unwrap_or_default())
    }

    async fn append_event(&self, agent: &AgentId, envelope: EventEnvelope) -> Result<(), PersistError> {
        let mut data = self.inner.data.write().await;
        let record = data.entry(agent.as_str().to_owned()).or_default();
        let expected = record.events.last().map(|e| e.cursor + 1).unwrap_or(0);
        if envelope.cursor != expected {
            return Err(PersistError::CursorViolation {
                agent: agent.to_string(),
                detail: format!("expected cursor {expected}, got {}", envelope.cursor),
            });
        }
        record.events.push(envelope);
        Ok(())
    }

    async fn read_events(
        &self,
        agent: &AgentId,
        from_cursor: Option<u64>,
    ) -> Result<Vec<EventEnvelope>, PersistError> {
        let data = self.inner.data.read().await;
        let Some(record) = data.get(agent.as_str()) else {
            return Ok(vec![]);
        };
        let from = from_cursor.unwrap_or(0);
        Ok(record
            .events
            .iter()
            .filter(|e| e.cursor >= from)
            .cloned()
            .collect())
    }

    async fn save_snapshot(&self, agent: &AgentId, snapshot: &Snapshot) -> Result<(), PersistError> {
        let mut data = self.inner.data.write().await;
        let record = data.entry(agent.as_str().to_owned()).or_default();
        record.snapshots.retain(|s| s.id != snapshot.id);
        record.snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn load_snapshot(&self, agent: &AgentId, id: &str) -> Result<Option<Snapshot>, PersistError> {
        let data = self.inner.data.read().await;
        Ok(data
            .get(agent.as_str())
            .and_then(|r| r.snapshots.iter().find(|s| s.id == id).cloned()))
    }

    async fn list_snapshots(&self, agent: &AgentId) -> Result<Vec<Snapshot>, PersistError> {
        let data = self.inner.data.read().await;
        let mut snapshots = data.get(agent.as_str()).map(|r| r.snapshots.clone()).unwrap_or_default();
        snapshots.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
        Ok(snapshots)
    }

    async fn save_info(&self, agent: &AgentId, info: &AgentInfo) -> Result<(), PersistError> {
        let mut data = self.inner.data.write().await;
        data.entry(agent.as_str().to_owned()).or_default().info = Some(info.clone());
        Ok(())
    }

    async fn load_info(&self, agent: &AgentId) -> Result<Option<AgentInfo>, PersistError> {
        let data = self.inner.data.read().await;
        Ok(data.get(agent.as_str()).and_then(|r| r.info.clone()))
    }

    async fn exists(&self, agent: &AgentId) -> Result<bool, PersistError> {
        let data = self.inner.data.read().await;
        Ok(data.contains_key(agent.as_str()))
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<AgentId>, PersistError> {
        let data = self.inner.data.read().await;
        Ok(data
            .keys()
            .filter(|k| prefix.is_none_or(|p| k.starts_with(p)))
            .map(|k| AgentId::new(k.clone()))
            .collect())
    }

    async fn delete(&self, agent: &AgentId) -> Result<(), PersistError> {
        let mut data = self.inner.data.write().await;
        data.remove(agent.as_str());
        Ok(())
    }

    async fn aggregate_stats(&self, agent: &AgentId) -> Result<AggregateStats, PersistError> {
        let data = self.inner.data.read().await;
        let Some(record) = data.get(agent.as_str()) else {
            return Ok(AggregateStats::default());
        };
        Ok(AggregateStats {
            message_count: record.messages.len() as u64,
            tool_call_count: record.tool_calls.len() as u64,
            tokens_in: 0,
            tokens_out: 0,
        })
    }

    async fn acquire_agent_lock(
        &self,
        agent: &AgentId,
        ttl: DurationMs,
    ) -> Result<Box<dyn AgentLockGuard>, PersistError> {
        let mut data = self.inner.data.write().await;
        let record = data.entry(agent.as_str().to_owned()).or_default();
        let now = now_ms();
        if let Some(existing) = record.lock {
            if existing.expires_at_ms > now {
                return Err(PersistError::LockHeld(agent.to_string()));
            }
        }
        let token = self.inner.lock_tokens.fetch_add(1, Ordering::SeqCst);
        let expires_at_ms = now + ttl.as_millis();
        record.lock = Some(LockState { token, expires_at_ms });
        let _lease = LockLease { expires_at_ms, ttl };
        Ok(Box::new(MemoryLockGuard {
            inner: Arc::clone(&self.inner),
            agent_key: agent.as_str().to_owned(),
            token,
        }))
    }

    async fn health_check(&self) -> Result<(), PersistError> {
        Ok(())
    }

    async fn check_consistency(&self, agent: &AgentId) -> Result<ConsistencyReport, PersistError> {
        let data = self.inner.data.read().await;
        let Some(record) = data.get(agent.as_str()) else {
            return Ok(ConsistencyReport {
                consistent: true,
                issues: vec![],
            });
        };
        let mut issues = Vec::new();
        for (i, window) in record.events.windows(2).enumerate() {
            if window[1].cursor != window[0].cursor + 1 {
                issues.push(format!("cursor gap after index {i}"));
            }
        }
        Ok(ConsistencyReport {
            consistent: issues.is_empty(),
            issues,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bookmark, Event, MonitorEvent};

    fn agent() -> AgentId {
        AgentId::new("agt-test")
    }

    fn envelope(cursor: u64) -> EventEnvelope {
        EventEnvelope {
            cursor,
            bookmark: Bookmark { seq: cursor },
            event: Event::Monitor(MonitorEvent::AgentResumed),
        }
    }

    #[tokio::test]
    async fn save_and_load_messages_round_trip() {
        let store = MemoryStore::new();
        let agent = agent();
        let messages = vec![Message::user_text("hi")];
        store.save_messages(&agent, &messages).await.unwrap();
        assert_eq!(store.load_messages(&agent).await.unwrap(), messages);
    }

    #[tokio::test]
    async fn append_event_rejects_cursor_gap() {
        let store = MemoryStore::new();
        let agent = agent();
        store.append_event(&agent, envelope(0)).await.unwrap();
        let err = store.append_event(&agent, envelope(2)).await.unwrap_err();
        assert!(matches!(err, PersistError::CursorViolation { .. }));
    }

    #[tokio::test]
    async fn read_events_filters_by_cursor() {
        let store = MemoryStore::new();
        let agent = agent();
        store.append_event(&agent, envelope(0)).await.unwrap();
        store.append_event(&agent, envelope(1)).await.unwrap();
        store.append_event(&agent, envelope(2)).await.unwrap();
        let events = store.read_events(&agent, Some(1)).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].cursor, 1);
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_released() {
        let store = MemoryStore::new();
        let agent = agent();
        let guard = store
            .acquire_agent_lock(&agent, DurationMs::from_secs(60))
            .await
            .unwrap();
        let err = store
            .acquire_agent_lock(&agent, DurationMs::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistError::LockHeld(_)));

        guard.release().await.unwrap();
        assert!(store
            .acquire_agent_lock(&agent, DurationMs::from_secs(60))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn expired_lock_can_be_taken_over() {
        let store = MemoryStore::new();
        let agent = agent();
        let _guard = store
            .acquire_agent_lock(&agent, DurationMs::from_millis(0))
            .await
            .unwrap();
        assert!(store
            .acquire_agent_lock(&agent, DurationMs::from_secs(60))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn delete_cascades_to_all_sub_records() {
        let store = MemoryStore::new();
        let agent = agent();
        store.save_messages(&agent, &[Message::user_text("hi")]).await.unwrap();
        store.append_event(&agent, envelope(0)).await.unwrap();
        store.delete(&agent).await.unwrap();
        assert!(!store.exists(&agent).await.unwrap());
        assert!(store.load_messages(&agent).await.unwrap().is_empty());
        assert!(store.read_events(&agent, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn check_consistency_reports_cursor_gaps() {
        let store = MemoryStore::new();
        let agent = agent();
        store.append_event(&agent, envelope(0)).await.unwrap();
        let report = store.check_consistency(&agent).await.unwrap();
        assert!(report.consistent);
    }
}
