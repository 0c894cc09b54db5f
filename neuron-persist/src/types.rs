//! Types that cross the persistence boundary: events, tool-call
//! lifecycle records, snapshots, and agent info.

use layer0::content::Message;
use layer0::duration::DurationMs;
use layer0::id::AgentId;
use serde::{Deserialize, Serialize};

/// Which subscription channel an event belongs to. Subscribers pick a
/// channel, not an individual event kind — a progress-channel
/// subscriber gets every progress event in cursor order.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Streaming model/tool output, consumed by a UI as it happens.
    Progress,
    /// Approval gates that can block the step loop.
    Control,
    /// Out-of-band observability: state transitions, usage, errors.
    Monitor,
}

/// Why a `done` event fired.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoneReason {
    /// The step loop reached a natural stopping point.
    Completed,
    /// `interrupt` was called mid-step.
    Interrupted,
}

/// A decision made on a `permission_required` control event.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionDecision {
    /// The tool call may proceed.
    Allow,
    /// The tool call is denied.
    Deny,
}

/// Progress-channel events: streaming model/tool output.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A reasoning ("thinking") block has started streaming.
    ThinkChunkStart {
        /// Index of the content block within the assistant message.
        block_index: u32,
    },
    /// A delta of reasoning text.
    ThinkChunkDelta {
        /// Index of the content block.
        block_index: u32,
        /// The incremental text.
        text: String,
    },
    /// A reasoning block finished streaming.
    ThinkChunkEnd {
        /// Index of the content block.
        block_index: u32,
    },
    /// A text block has started streaming.
    TextChunkStart {
        /// Index of the content block.
        block_index: u32,
    },
    /// A delta of assistant text.
    TextChunkDelta {
        /// Index of the content block.
        block_index: u32,
        /// The incremental text.
        text: String,
    },
    /// A text block finished streaming.
    TextChunkEnd {
        /// Index of the content block.
        block_index: u32,
    },
    /// A tool call began executing.
    ToolStart {
        /// The `tool_use` id.
        call_id: String,
        /// Tool name.
        name: String,
    },
    /// A tool call finished successfully.
    ToolEnd {
        /// The `tool_use` id.
        call_id: String,
    },
    /// A tool call failed.
    ToolError {
        /// The `tool_use` id.
        call_id: String,
        /// Error message.
        message: String,
    },
    /// The step loop finished a run.
    Done {
        /// Why it stopped.
        reason: DoneReason,
    },
}

/// Control-channel events: approval gates.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum ControlEvent {
    /// A tool call is waiting on an approval decision. The step loop
    /// blocks at this point; `respond` is single-shot (see
    /// [`crate::PersistenceStore::append_event`] callers, which must
    /// not call it twice for the same `call_id`).
    PermissionRequired {
        /// The `tool_use` id awaiting approval.
        call_id: String,
        /// Tool name being requested.
        tool_name: String,
    },
    /// An approval decision was recorded.
    PermissionDecided {
        /// The `tool_use` id that was decided.
        call_id: String,
        /// What was decided.
        decision: PermissionDecision,
    },
}

/// Fine-grained step-loop position, distinct from the coarse
/// READY/WORKING/PAUSED runtime state. Whenever a tool_use id is
/// outstanding (no matching tool_result yet appended), the agent's
/// `breakpoint` is one of the non-`Ready` variants here.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointState {
    /// No step in flight.
    Ready,
    /// `preModel` hooks are running.
    PreModel,
    /// The provider's stream is being consumed.
    StreamingModel,
    /// The assistant message closed with outstanding `tool_use` blocks.
    ToolPending,
    /// At least one tool call is blocked on a `respond` decision.
    AwaitingApproval,
    /// `preTool` hooks are running for the approved calls.
    PreTool,
    /// Tools are executing.
    ToolExecuting,
    /// `postTool` hooks are running for completed calls.
    PostTool,
}

/// Monitor-channel events: observability, not control flow.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// The runtime state (READY/WORKING/PAUSED) changed.
    StateChanged {
        /// The new state, as its string name.
        state: String,
    },
    /// One step of the step loop completed.
    StepComplete {
        /// Running count of steps taken this invocation.
        step_count: u32,
    },
    /// An error occurred outside the normal tool/model error paths.
    Error {
        /// Which part of the step raised it (e.g. `"lifecycle"` for a
        /// `preModel`/`postModel`/`messagesChanged` hook failure).
        phase: String,
        /// Description of the error.
        message: String,
    },
    /// Token usage was reported for a model call.
    TokenUsage {
        /// Input tokens consumed.
        tokens_in: u64,
        /// Output tokens generated.
        tokens_out: u64,
    },
    /// A tool call fully completed (mirrors `ToolEnd`/`ToolError` but
    /// carries the full record for audit consumers).
    ToolExecuted {
        /// The `tool_use` id.
        call_id: String,
        /// Whether it succeeded.
        success: bool,
    },
    /// The agent resumed after a crash or lock takeover.
    AgentResumed,
    /// The agent's todo list changed.
    TodoChanged,
    /// The fine-grained breakpoint state changed.
    BreakpointChanged {
        /// The new breakpoint state.
        state: BreakpointState,
    },
    /// Context compaction ran.
    ContextCompression {
        /// Tokens freed by compaction.
        tokens_freed: u64,
    },
}

/// The three event channels, unified for storage and replay.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum Event {
    /// A progress-channel event.
    Progress(ProgressEvent),
    /// A control-channel event.
    Control(ControlEvent),
    /// A monitor-channel event.
    Monitor(MonitorEvent),
}

impl Event {
    /// Which channel this event belongs to.
    pub fn channel(&self) -> Channel {
        match self {
            Event::Progress(_) => Channel::Progress,
            Event::Control(_) => Channel::Control,
            Event::Monitor(_) => Channel::Monitor,
        }
    }
}

/// A bookmark advances only once the event it names has been durably
/// persisted — consumers replay from a bookmark, not a raw cursor, to
/// get a crash-consistent resume point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Sequence number of the last durably-persisted event.
    pub seq: u64,
}

/// An event plus its position in the append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Monotonic, gap-free position in this agent's log.
    pub cursor: u64,
    /// The durability bookmark as of this append.
    pub bookmark: Bookmark,
    /// The event payload.
    pub event: Event,
}

/// State in the tool-call lifecycle (§ tool-call lifecycle).
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallState {
    /// Just created from an assistant `tool_use` block.
    Pending,
    /// Approval policy requires a human/operator decision.
    ApprovalRequired,
    /// Cleared to run, either by auto-approve or an explicit decision.
    Approved,
    /// Currently executing.
    Executing,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// An approval decision denied the call.
    Denied,
    /// The agent crashed with this call in a non-terminal state; a
    /// synthetic error result was appended on resume to keep history
    /// valid, and the original intent is preserved only in the audit
    /// trail.
    Sealed,
}

impl ToolCallState {
    /// Whether this state is terminal (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ToolCallState::Completed
                | ToolCallState::Failed
                | ToolCallState::Denied
                | ToolCallState::Sealed
        )
    }
}

/// One entry in a tool call's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallAuditEntry {
    /// The state transitioned to.
    pub state: ToolCallState,
    /// When the transition happened, as Unix millis.
    pub timestamp_ms: u64,
    /// Optional free-text context (e.g. "interrupted", a hook's reason).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Who decided an approval-gated tool call, and what they decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    /// What was decided.
    pub decision: PermissionDecision,
    /// Identifier of the decider (user id, "auto", hook name).
    pub decided_by: String,
    /// When the decision was made, as Unix millis.
    pub decided_at_ms: u64,
    /// Optional free-text rationale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A single tool call's full lifecycle record, as persisted.
///
/// This is richer than [`layer0::operator::ToolCallRecord`], which is
/// a post-hoc summary embedded in `OperatorMetadata`. This record is
/// the live, mutable state a resumed agent needs to pick back up.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// The `tool_use` id this record tracks.
    pub call_id: String,
    /// Tool name.
    pub name: String,
    /// Tool input, as sent by the model.
    pub input: serde_json::Value,
    /// Current lifecycle state.
    pub state: ToolCallState,
    /// Every transition this call has gone through, in order.
    pub audit: Vec<ToolCallAuditEntry>,
    /// The approval decision, if this call required one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalRecord>,
    /// The result content, once terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Whether the result represents an error.
    #[serde(default)]
    pub is_error: bool,
}

impl ToolCallRecord {
    /// Start a new record in `Pending`, stamping the first audit entry.
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, input: serde_json::Value, now_ms: u64) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            input,
            state: ToolCallState::Pending,
            audit: vec![ToolCallAuditEntry {
                state: ToolCallState::Pending,
                timestamp_ms: now_ms,
                note: None,
            }],
            approval: None,
            result: None,
            is_error: false,
        }
    }

    /// Transition to a new state, appending an audit entry.
    ///
    /// Does not validate the transition graph — callers (the step
    /// loop) are responsible for only calling this along a legal edge.
    pub fn transition(&mut self, state: ToolCallState, now_ms: u64, note: Option<String>) {
        self.state = state;
        self.audit.push(ToolCallAuditEntry {
            state,
            timestamp_ms: now_ms,
            note,
        });
    }

    /// Seal a non-terminal call found at crash-resume time: marks it
    /// `Sealed` and fills in the synthetic error result that keeps the
    /// tool_use/tool_result invariant intact.
    pub fn seal(&mut self, now_ms: u64) {
        self.transition(ToolCallState::Sealed, now_ms, Some("interrupted".into()));
        self.result = Some("interrupted".into());
        self.is_error = true;
    }
}

/// A point-in-time capture of an agent's full state, for fast resume
/// without replaying the entire event log.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unique id for this snapshot.
    pub id: String,
    /// When it was taken, as Unix millis.
    pub created_at_ms: u64,
    /// The conversation history at the time of the snapshot.
    pub messages: Vec<Message>,
    /// The event cursor this snapshot corresponds to.
    pub cursor: u64,
    /// Implementation-defined extra state (compaction bookkeeping, etc).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Agent-level metadata independent of conversation content.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    /// When the agent was first created, as Unix millis.
    pub created_at_ms: u64,
    /// When the agent was last touched, as Unix millis.
    pub updated_at_ms: u64,
    /// Implementation-defined status string ("active", "archived", ...).
    pub status: String,
    /// The template/config this agent was instantiated from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    /// Ordered ancestor agent ids, oldest first, from `fork` lineage.
    #[serde(default)]
    pub lineage: Vec<AgentId>,
    /// Version of the config this agent was created with, for
    /// compatibility checks on resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_version: Option<String>,
    /// Number of messages currently in this agent's history.
    #[serde(default)]
    pub message_count: u64,
    /// The highest safe-fork-point index as of the last save, or `None`
    /// if no index in the current history is SAFE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sfp_index: Option<u64>,
    /// The last durably-persisted event bookmark.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_bookmark: Option<Bookmark>,
    /// The fine-grained step-loop position, if a step is in flight or
    /// was in flight when the agent was last saved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakpoint: Option<BreakpointState>,
    /// Free-form metadata (labels, owning workflow, etc).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Aggregate usage stats for an agent, computed from its message and
/// tool-call history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    /// Total messages persisted.
    pub message_count: u64,
    /// Total tool calls recorded.
    pub tool_call_count: u64,
    /// Total input tokens, if tracked by the caller.
    pub tokens_in: u64,
    /// Total output tokens, if tracked by the caller.
    pub tokens_out: u64,
}

/// Result of a consistency check on an agent's persisted state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    /// Whether the agent's persisted state passed all checks.
    pub consistent: bool,
    /// Specific problems found (cursor gaps, dangling tool calls, ...).
    pub issues: Vec<String>,
}

/// A lock lease held by one process driving an agent's step loop.
/// Dropping the guard without calling `release` is fine — the lease
/// simply expires at `expires_at_ms` and another process can take over
/// after running resume semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockLease {
    /// When this lease expires, as Unix millis.
    pub expires_at_ms: u64,
    /// Lease duration, echoed back for convenience.
    pub ttl: DurationMs,
}
