#![deny(missing_docs)]
//! Persistence contract for neuron agents.
//!
//! Defines the backend-agnostic surface the core depends on to persist
//! and resume an agent: messages, tool-call lifecycle records, the
//! append-only event log, snapshots, and agent-level info. Ships an
//! in-memory implementation; durable backends (filesystem, SQL) live
//! in their own crates and implement [`PersistenceStore`].

pub mod error;
pub mod memory;
pub mod store;
pub mod types;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use error::PersistError;
pub use memory::MemoryStore;
pub use store::{AgentLockGuard, MessageQuery, PersistenceStore};
pub use types::{
    AgentInfo, AggregateStats, ApprovalRecord, Bookmark, BreakpointState, Channel,
    ConsistencyReport, ControlEvent, DoneReason, Event, EventEnvelope, LockLease, MonitorEvent,
    PermissionDecision, ProgressEvent, Snapshot, ToolCallAuditEntry, ToolCallRecord, ToolCallState,
};
