#![deny(missing_docs)]
//! ReAct operator — model + tools in a reasoning loop.
//!
//! Implements `layer0::Operator` by running the Reason-Act-Observe cycle:
//! load persisted history → call model → execute tools → persist → repeat
//! until done. History flows through [`neuron_queue::MessageQueue`] so a
//! crash between "appended in memory" and "saved to the backend" cannot
//! happen; resume preparation and fork-point bookkeeping go through
//! [`neuron_sfp`]; everything durable goes through [`neuron_persist`].

use async_trait::async_trait;
use futures_util::future::join_all;
use layer0::content::Content;
use layer0::duration::DurationMs;
use layer0::effect::{Effect, Scope, SignalPayload};
use layer0::error::OperatorError;
use layer0::hook::{HookAction, HookContext, HookPoint};
use layer0::id::{AgentId, WorkflowId};
use layer0::operator::{
    ExitReason, Operator, OperatorInput, OperatorMetadata, OperatorOutput,
    ToolCallRecord as SummaryToolCallRecord,
};
use neuron_hooks::HookRegistry;
use neuron_persist::{
    AgentInfo, ApprovalRecord, Bookmark, BreakpointState, ControlEvent, Event, EventEnvelope,
    MonitorEvent, PermissionDecision, PersistError, PersistenceStore, ProgressEvent,
    ToolCallRecord as PersistToolCallRecord, ToolCallState,
};
use neuron_queue::{MessageKind, MessageQueue, NoopEnsureProcessing};
use neuron_sfp::ProviderKind;
use neuron_tool::ToolRegistry;
use neuron_turn::context::ContextStrategy;
use neuron_turn::convert::{content_to_user_message, message_to_provider_message, parts_to_content};
use neuron_turn::provider::Provider;
use neuron_turn::types::*;
use neuron_turn::upload_cache::{resolve_uploads, FileUploadCache, InMemoryUploadCache};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

/// Static configuration for a ReactOperator instance.
pub struct ReactConfig {
    /// Base system prompt.
    pub system_prompt: String,
    /// Default model identifier.
    pub default_model: String,
    /// Default max tokens per response.
    pub default_max_tokens: u32,
    /// Default max turns before stopping.
    pub default_max_turns: u32,
    /// TTL for the single-writer agent lock, when the backend supports one.
    pub lock_ttl: DurationMs,
    /// Which provider's resume-history rewrite rules to apply to
    /// reasoning blocks loaded from a prior session.
    pub provider_kind: ProviderKind,
    /// How tool calls get approval before running.
    pub approval_policy: ApprovalPolicy,
}

impl Default for ReactConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            default_model: String::new(),
            default_max_tokens: 4096,
            default_max_turns: 10,
            lock_ttl: DurationMs::from_secs(30),
            provider_kind: ProviderKind::Default,
            approval_policy: ApprovalPolicy::Auto,
        }
    }
}

/// How a tool call's approval is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApprovalPolicy {
    /// Every tool call is approved as soon as hooks clear it.
    #[default]
    Auto,
    /// Every tool call blocks on an external [`ApprovalHandle::respond`]
    /// decision before running.
    Ask,
}

/// Error returned by [`ApprovalHandle::respond`].
#[derive(Debug, Error)]
pub enum ApprovalError {
    /// No pending approval for this call id: it was never requested,
    /// the decision was already made, or the step that raised it is
    /// no longer in flight.
    #[error("approval for {0} already decided")]
    AlreadyDecided(String),
}

/// Cloneable handle for resolving `ask`-policy approval requests from
/// outside the step loop. All clones share the same pending-request
/// map, so any holder can call [`ApprovalHandle::respond`].
///
/// Single-shot by construction: the first call to `respond` for a
/// given `call_id` removes its sender, so a second call always finds
/// nothing pending and errors.
#[derive(Clone, Default)]
pub struct ApprovalHandle {
    pending: Arc<AsyncMutex<HashMap<String, oneshot::Sender<PermissionDecision>>>>,
}

impl ApprovalHandle {
    /// Resolve a pending approval raised via `control.permission_required`.
    pub async fn respond(&self, call_id: &str, decision: PermissionDecision) -> Result<(), ApprovalError> {
        let tx = self.pending.lock().await.remove(call_id);
        match tx {
            Some(tx) => {
                let _ = tx.send(decision);
                Ok(())
            }
            None => Err(ApprovalError::AlreadyDecided(call_id.to_string())),
        }
    }

    async fn register(&self, call_id: String) -> oneshot::Receiver<PermissionDecision> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(call_id, tx);
        rx
    }

    async fn forget(&self, call_id: &str) {
        self.pending.lock().await.remove(call_id);
    }
}

/// Names of tools that produce Effects instead of executing locally.
const EFFECT_TOOL_NAMES: &[&str] = &[
    "write_memory",
    "delete_memory",
    "delegate",
    "handoff",
    "signal",
];

/// Resolved configuration merging defaults with per-request overrides.
struct ResolvedConfig {
    model: Option<String>,
    system: String,
    max_turns: u32,
    max_cost: Option<Decimal>,
    max_duration: Option<DurationMs>,
    allowed_tools: Option<Vec<String>>,
    max_tokens: u32,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A full-featured Operator implementation with a ReAct loop.
///
/// Generic over `P: Provider` (not object-safe). The object-safe boundary
/// is `layer0::Operator`, which `ReactOperator<P>` implements via `#[async_trait]`.
pub struct ReactOperator<P: Provider> {
    provider: P,
    tools: ToolRegistry,
    context_strategy: Box<dyn ContextStrategy>,
    hooks: HookRegistry,
    persistence: Arc<dyn PersistenceStore>,
    config: ReactConfig,
    approvals: ApprovalHandle,
    upload_cache: Arc<dyn FileUploadCache>,
}

/// Per-invocation persistence handles, present only when the input
/// carries a session (stateless invocations skip all of this).
struct PersistCtx {
    agent_id: AgentId,
    queue: MessageQueue,
    cursor: u64,
    info: AgentInfo,
}

impl<P: Provider> ReactOperator<P> {
    /// Create a new ReactOperator with all dependencies.
    pub fn new(
        provider: P,
        tools: ToolRegistry,
        context_strategy: Box<dyn ContextStrategy>,
        hooks: HookRegistry,
        persistence: Arc<dyn PersistenceStore>,
        config: ReactConfig,
    ) -> Self {
        Self {
            provider,
            tools,
            context_strategy,
            hooks,
            persistence,
            config,
            approvals: ApprovalHandle::default(),
            upload_cache: Arc::new(InMemoryUploadCache::default()),
        }
    }

    /// A cloneable handle for resolving `ask`-policy approvals this
    /// operator's step loop raises. Hold onto it before calling
    /// `execute`/`execute_with_cancellation` so a `permission_required`
    /// control event has somewhere to be answered.
    pub fn approvals(&self) -> ApprovalHandle {
        self.approvals.clone()
    }

    /// Replace the default in-memory file upload cache, e.g. with a
    /// durable backend or a fake for tests.
    pub fn with_upload_cache(mut self, cache: Arc<dyn FileUploadCache>) -> Self {
        self.upload_cache = cache;
        self
    }

    fn resolve_config(&self, input: &OperatorInput) -> ResolvedConfig {
        let tc = input.config.as_ref();
        let system = match tc.and_then(|c| c.system_addendum.as_ref()) {
            Some(addendum) => format!("{}\n{}", self.config.system_prompt, addendum),
            None => self.config.system_prompt.clone(),
        };
        ResolvedConfig {
            model: tc.and_then(|c| c.model.clone()).or_else(|| {
                if self.config.default_model.is_empty() {
                    None
                } else {
                    Some(self.config.default_model.clone())
                }
            }),
            system,
            max_turns: tc
                .and_then(|c| c.max_turns)
                .unwrap_or(self.config.default_max_turns),
            max_cost: tc.and_then(|c| c.max_cost),
            max_duration: tc.and_then(|c| c.max_duration),
            allowed_tools: tc.and_then(|c| c.allowed_tools.clone()),
            max_tokens: self.config.default_max_tokens,
        }
    }

    fn build_tool_schemas(&self, config: &ResolvedConfig) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .iter()
            .map(|tool| ToolSchema {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect();

        // Add effect tool schemas
        schemas.extend(effect_tool_schemas());

        // Filter by allowed_tools if specified
        if let Some(allowed) = &config.allowed_tools {
            schemas.retain(|s| allowed.contains(&s.name));
        }

        schemas
    }

    /// Start a persistence context for this invocation: acquires the
    /// agent lock (if the backend supports one), loads history, seals
    /// any tool call a prior crashed run left non-terminal, and stages
    /// + flushes the new user message.
    async fn begin_persistence(
        &self,
        input: &OperatorInput,
    ) -> Result<(Option<PersistCtx>, Vec<ProviderMessage>), OperatorError> {
        let Some(session) = &input.session else {
            return Ok((None, vec![content_to_user_message(&input.message)]));
        };
        let agent_id = AgentId::new(session.as_str());

        match self.persistence.acquire_agent_lock(&agent_id, self.config.lock_ttl).await {
            Ok(guard) => {
                // Held only for the duration of setup; a live step loop
                // spanning multiple calls would hold it across the whole
                // invocation instead of releasing immediately.
                let _ = guard.release().await;
            }
            Err(PersistError::Unsupported(_)) => {}
            Err(PersistError::LockHeld(_)) => {
                return Err(OperatorError::Retryable(
                    "another process is already driving this agent".into(),
                ));
            }
            Err(e) => return Err(OperatorError::Retryable(format!("agent lock: {e}"))),
        }

        let queue = MessageQueue::new(
            agent_id.clone(),
            self.persistence.clone(),
            Arc::new(NoopEnsureProcessing),
        );
        if let Err(e) = queue.load().await {
            tracing::warn!(error = %e, "failed to load persisted history, starting empty");
        }

        let mut tool_calls = self
            .persistence
            .load_tool_call_records(&agent_id)
            .await
            .unwrap_or_default();
        let mut sealed_any = false;
        for record in tool_calls.iter_mut() {
            if !record.state.is_terminal() {
                record.seal(now_ms());
                sealed_any = true;
            }
        }
        if sealed_any {
            if let Err(e) = self.persistence.save_tool_call_records(&agent_id, &tool_calls).await {
                tracing::warn!(error = %e, "failed to persist sealed tool calls");
            }
        }

        let cursor = self
            .persistence
            .read_events(&agent_id, None)
            .await
            .map(|events| events.len() as u64)
            .unwrap_or(0);

        queue
            .send(input.message.clone(), MessageKind::User, None, None)
            .await
            .map_err(|e| OperatorError::Retryable(format!("stage message: {e}")))?;
        queue
            .flush()
            .await
            .map_err(|e| OperatorError::Retryable(format!("persist message: {e}")))?;

        let history = queue.history().await;
        let provider_messages: Vec<ProviderMessage> =
            history.iter().map(message_to_provider_message).collect();
        let messages = neuron_sfp::prepare_for_resume(&provider_messages, self.config.provider_kind);

        let now = now_ms();
        let mut info = self
            .persistence
            .load_info(&agent_id)
            .await
            .ok()
            .flatten()
            .unwrap_or(AgentInfo {
                created_at_ms: now,
                updated_at_ms: now,
                status: "active".into(),
                template_id: None,
                lineage: Vec::new(),
                config_version: None,
                message_count: 0,
                last_sfp_index: None,
                last_bookmark: None,
                breakpoint: None,
                metadata: serde_json::Value::Null,
            });
        info.status = "active".into();
        info.breakpoint = Some(BreakpointState::Ready);
        info.message_count = provider_messages.len() as u64;
        info.last_sfp_index = neuron_sfp::last_safe_fork_point(&provider_messages).map(|i| i as u64);

        Ok((
            Some(PersistCtx {
                agent_id,
                queue,
                cursor,
                info,
            }),
            messages,
        ))
    }

    /// Move the fine-grained breakpoint forward, persisting `AgentInfo`
    /// so a crash mid-step leaves an accurate position behind and
    /// emitting `breakpoint_changed` for observers.
    async fn set_breakpoint(&self, ctx: &mut Option<PersistCtx>, state: BreakpointState) {
        let Some(c) = ctx.as_mut() else { return };
        c.info.breakpoint = Some(state);
        c.info.updated_at_ms = now_ms();
        c.info.message_count = c.queue.history().await.len() as u64;
        c.info.last_bookmark = Some(Bookmark { seq: c.cursor });
        if let Err(e) = self.persistence.save_info(&c.agent_id, &c.info).await {
            tracing::warn!(error = %e, "failed to persist agent info");
        }
        self.emit(ctx, Event::Monitor(MonitorEvent::BreakpointChanged { state })).await;
    }

    async fn emit(&self, ctx: &mut Option<PersistCtx>, event: Event) {
        let Some(ctx) = ctx.as_mut() else { return };
        let envelope = EventEnvelope {
            cursor: ctx.cursor,
            bookmark: Bookmark { seq: ctx.cursor },
            event,
        };
        match self.persistence.append_event(&ctx.agent_id, envelope).await {
            Ok(()) => ctx.cursor += 1,
            Err(e) => tracing::warn!(error = %e, "failed to append event"),
        }
    }

    async fn persist_turn(&self, ctx: &Option<PersistCtx>, messages: Vec<layer0::content::Message>) {
        let Some(ctx) = ctx else { return };
        if let Err(e) = ctx.queue.append_and_persist(messages).await {
            tracing::warn!(error = %e, "failed to persist turn");
        }
    }

    async fn persist_tool_calls(&self, ctx: &Option<PersistCtx>, records: &[PersistToolCallRecord]) {
        let Some(ctx) = ctx else { return };
        if let Err(e) = self.persistence.save_tool_call_records(&ctx.agent_id, records).await {
            tracing::warn!(error = %e, "failed to persist tool call records");
        }
    }

    fn try_as_effect(&self, name: &str, input: &serde_json::Value) -> Option<Effect> {
        match name {
            "write_memory" => {
                let scope_str = input.get("scope")?.as_str()?;
                let key = input.get("key")?.as_str()?.to_string();
                let value = input.get("value")?.clone();
                let scope = parse_scope(scope_str);
                Some(Effect::WriteMemory { scope, key, value })
            }
            "delete_memory" => {
                let scope_str = input.get("scope")?.as_str()?;
                let key = input.get("key")?.as_str()?.to_string();
                let scope = parse_scope(scope_str);
                Some(Effect::DeleteMemory { scope, key })
            }
            "delegate" => {
                let agent = input.get("agent")?.as_str()?;
                let message = input.get("message").and_then(|m| m.as_str()).unwrap_or("");
                let delegate_input =
                    OperatorInput::new(Content::text(message), layer0::operator::TriggerType::Task);
                Some(Effect::Delegate {
                    agent: AgentId::new(agent),
                    input: Box::new(delegate_input),
                })
            }
            "handoff" => {
                let agent = input.get("agent")?.as_str()?;
                let state = input
                    .get("state")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                Some(Effect::Handoff {
                    agent: AgentId::new(agent),
                    state,
                })
            }
            "signal" => {
                let target = input.get("target")?.as_str()?;
                let signal_type = input
                    .get("signal_type")
                    .and_then(|s| s.as_str())
                    .unwrap_or("default");
                let data = input
                    .get("data")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                Some(Effect::Signal {
                    target: WorkflowId::new(target),
                    payload: SignalPayload::new(signal_type, data),
                })
            }
            _ => None,
        }
    }

    fn build_metadata(
        &self,
        tokens_in: u64,
        tokens_out: u64,
        cost: Decimal,
        turns_used: u32,
        tools_called: Vec<SummaryToolCallRecord>,
        duration: DurationMs,
    ) -> OperatorMetadata {
        let mut meta = OperatorMetadata::default();
        meta.tokens_in = tokens_in;
        meta.tokens_out = tokens_out;
        meta.cost = cost;
        meta.turns_used = turns_used;
        meta.tools_called = tools_called;
        meta.duration = duration;
        meta
    }

    fn make_output(
        message: Content,
        exit_reason: ExitReason,
        metadata: OperatorMetadata,
        effects: Vec<Effect>,
    ) -> OperatorOutput {
        let mut output = OperatorOutput::new(message, exit_reason);
        output.metadata = metadata;
        output.effects = effects;
        output
    }

    fn build_hook_context(
        &self,
        point: HookPoint,
        tokens_in: u64,
        tokens_out: u64,
        cost: Decimal,
        turns_completed: u32,
        elapsed: DurationMs,
    ) -> HookContext {
        let mut ctx = HookContext::new(point);
        ctx.tokens_used = tokens_in + tokens_out;
        ctx.cost = cost;
        ctx.turns_completed = turns_completed;
        ctx.elapsed = elapsed;
        ctx
    }

    /// Run one invocation, cooperatively cancelling at the next
    /// suspension point (before a provider call, before a tool
    /// execution) once `cancel` is triggered. `execute` (the
    /// `layer0::Operator` trait method) calls this with a token that is
    /// never cancelled.
    pub async fn execute_with_cancellation(
        &self,
        input: OperatorInput,
        cancel: CancellationToken,
    ) -> Result<OperatorOutput, OperatorError> {
        let start = Instant::now();
        let config = self.resolve_config(&input);
        let (mut persist_ctx, mut messages) = self.begin_persistence(&input).await?;
        let tools = self.build_tool_schemas(&config);
        let upload_scope = match &persist_ctx {
            Some(ctx) => format!("{}:{:?}", ctx.agent_id.as_str(), self.config.provider_kind),
            None => format!("stateless:{:?}", self.config.provider_kind),
        };

        self.emit(
            &mut persist_ctx,
            Event::Monitor(MonitorEvent::StateChanged {
                state: "working".into(),
            }),
        )
        .await;

        let mut total_tokens_in: u64 = 0;
        let mut total_tokens_out: u64 = 0;
        let mut total_cost = Decimal::ZERO;
        let mut turns_used: u32 = 0;
        let mut tool_summaries: Vec<SummaryToolCallRecord> = vec![];
        let mut tool_lifecycle: Vec<PersistToolCallRecord> = vec![];
        let mut effects: Vec<Effect> = vec![];
        let mut last_content: Vec<ContentPart> = vec![];

        macro_rules! finish {
            ($exit:expr) => {{
                self.emit(
                    &mut persist_ctx,
                    Event::Monitor(MonitorEvent::StateChanged {
                        state: "ready".into(),
                    }),
                )
                .await;
                return Ok(Self::make_output(
                    parts_to_content(&last_content),
                    $exit,
                    self.build_metadata(
                        total_tokens_in,
                        total_tokens_out,
                        total_cost,
                        turns_used,
                        tool_summaries,
                        DurationMs::from(start.elapsed()),
                    ),
                    effects,
                ));
            }};
        }

        loop {
            turns_used += 1;

            if cancel.is_cancelled() {
                let interrupted = self
                    .interrupt_in_flight(&mut tool_lifecycle, &mut persist_ctx)
                    .await;
                self.persist_tool_calls(&persist_ctx, &tool_lifecycle).await;
                if !interrupted.is_empty() {
                    self.persist_turn(&persist_ctx, interrupted).await;
                }
                self.emit(
                    &mut persist_ctx,
                    Event::Progress(ProgressEvent::Done {
                        reason: neuron_persist::DoneReason::Interrupted,
                    }),
                )
                .await;
                finish!(ExitReason::Custom("interrupted".into()));
            }

            // 1. Hook: PreInference
            self.set_breakpoint(&mut persist_ctx, BreakpointState::PreModel).await;
            let hook_ctx = self.build_hook_context(
                HookPoint::PreInference,
                total_tokens_in,
                total_tokens_out,
                total_cost,
                turns_used - 1,
                DurationMs::from(start.elapsed()),
            );
            match self.hooks.dispatch(&hook_ctx).await {
                Ok(HookAction::Halt { reason }) => finish!(ExitReason::ObserverHalt { reason }),
                Ok(_) => {}
                Err(e) => {
                    self.emit(
                        &mut persist_ctx,
                        Event::Monitor(MonitorEvent::Error {
                            phase: "lifecycle".into(),
                            message: e.to_string(),
                        }),
                    )
                    .await;
                    return Err(OperatorError::NonRetryable(e.to_string()));
                }
            }

            // 2. Build ProviderRequest
            self.set_breakpoint(&mut persist_ctx, BreakpointState::StreamingModel).await;
            resolve_uploads(&self.provider, self.upload_cache.as_ref(), &upload_scope, &mut messages)
                .await
                .map_err(|e| OperatorError::Model(e.to_string()))?;
            let request = ProviderRequest {
                model: config.model.clone(),
                messages: messages.clone(),
                tools: tools.clone(),
                max_tokens: Some(config.max_tokens),
                temperature: None,
                system: Some(config.system.clone()),
                extra: input.metadata.clone(),
            };

            // 3. Call provider
            let response = self.provider.complete(request).await.map_err(|e| {
                if e.is_retryable() {
                    OperatorError::Retryable(e.to_string())
                } else {
                    OperatorError::Model(e.to_string())
                }
            })?;

            // 4. Hook: PostInference
            let mut hook_ctx = self.build_hook_context(
                HookPoint::PostInference,
                total_tokens_in + response.usage.input_tokens,
                total_tokens_out + response.usage.output_tokens,
                total_cost + response.cost.unwrap_or(Decimal::ZERO),
                turns_used,
                DurationMs::from(start.elapsed()),
            );
            hook_ctx.model_output = Some(parts_to_content(&response.content));
            match self.hooks.dispatch(&hook_ctx).await {
                Ok(HookAction::Halt { reason }) => {
                    last_content = response.content.clone();
                    total_tokens_in += response.usage.input_tokens;
                    total_tokens_out += response.usage.output_tokens;
                    if let Some(cost) = response.cost {
                        total_cost += cost;
                    }
                    finish!(ExitReason::ObserverHalt { reason });
                }
                Ok(_) => {}
                Err(e) => {
                    self.emit(
                        &mut persist_ctx,
                        Event::Monitor(MonitorEvent::Error {
                            phase: "lifecycle".into(),
                            message: e.to_string(),
                        }),
                    )
                    .await;
                    return Err(OperatorError::NonRetryable(e.to_string()));
                }
            }

            // 5. Aggregate tokens + cost
            total_tokens_in += response.usage.input_tokens;
            total_tokens_out += response.usage.output_tokens;
            if let Some(cost) = response.cost {
                total_cost += cost;
            }

            last_content.clone_from(&response.content);

            // 6. Check StopReason
            match response.stop_reason {
                StopReason::MaxTokens => {
                    return Err(OperatorError::Model("output truncated (max_tokens)".into()));
                }
                StopReason::ContentFilter => {
                    return Err(OperatorError::Model("content filtered".into()));
                }
                StopReason::EndTurn => {
                    let assistant_message = ProviderMessage {
                        role: Role::Assistant,
                        content: response.content.clone(),
                    };
                    self.persist_turn(
                        &persist_ctx,
                        vec![neuron_turn::convert::provider_message_to_message(&assistant_message)],
                    )
                    .await;
                    self.emit(
                        &mut persist_ctx,
                        Event::Progress(ProgressEvent::Done {
                            reason: neuron_persist::DoneReason::Completed,
                        }),
                    )
                    .await;
                    finish!(ExitReason::Complete);
                }
                StopReason::ToolUse => {
                    // Continue to tool execution below
                }
            }
            self.set_breakpoint(&mut persist_ctx, BreakpointState::ToolPending).await;

            // 7. Tool execution
            let assistant_message = ProviderMessage {
                role: Role::Assistant,
                content: response.content.clone(),
            };
            messages.push(assistant_message.clone());

            let tool_uses: Vec<(String, String, serde_json::Value)> = response
                .content
                .iter()
                .filter_map(|part| match part {
                    ContentPart::ToolUse { id, name, input } => {
                        Some((id.clone(), name.clone(), input.clone()))
                    }
                    _ => None,
                })
                .collect();

            // a/b. Resolve effects + hook verdicts sequentially, in
            // original order, so Halt/Skip/ModifyInput stay deterministic.
            enum Resolved {
                Effect(ContentPart, PersistToolCallRecord),
                Skipped(ContentPart, PersistToolCallRecord),
                Halt(String),
                Run {
                    id: String,
                    name: String,
                    input: serde_json::Value,
                    record: PersistToolCallRecord,
                },
            }

            self.set_breakpoint(&mut persist_ctx, BreakpointState::PreTool).await;
            let mut resolved = Vec::with_capacity(tool_uses.len());
            let mut halted = None;
            for (id, name, tool_input) in tool_uses {
                let mut record = PersistToolCallRecord::new(id.clone(), name.clone(), tool_input.clone(), now_ms());

                if EFFECT_TOOL_NAMES.contains(&name.as_str()) {
                    if let Some(effect) = self.try_as_effect(&name, &tool_input) {
                        effects.push(effect);
                    }
                    record.transition(ToolCallState::Completed, now_ms(), Some("effect recorded".into()));
                    resolved.push(Resolved::Effect(
                        ContentPart::ToolResult {
                            tool_use_id: id,
                            content: format!("{name} effect recorded."),
                            is_error: false,
                        },
                        record,
                    ));
                    continue;
                }

                let mut actual_input = tool_input.clone();
                let mut hook_ctx = HookContext::new(HookPoint::PreToolUse);
                hook_ctx.tool_name = Some(name.clone());
                hook_ctx.tool_input = Some(tool_input.clone());
                hook_ctx.tokens_used = total_tokens_in + total_tokens_out;
                hook_ctx.cost = total_cost;
                hook_ctx.turns_completed = turns_used;
                hook_ctx.elapsed = DurationMs::from(start.elapsed());

                match self.hooks.dispatch(&hook_ctx).await {
                    Ok(HookAction::Halt { reason }) => {
                        halted = Some(reason);
                        break;
                    }
                    Ok(HookAction::SkipTool { reason }) => {
                        record.approval = Some(ApprovalRecord {
                            decision: PermissionDecision::Deny,
                            decided_by: "hook".into(),
                            decided_at_ms: now_ms(),
                            note: Some(reason.clone()),
                        });
                        record.transition(ToolCallState::Denied, now_ms(), Some(reason.clone()));
                        resolved.push(Resolved::Skipped(
                            ContentPart::ToolResult {
                                tool_use_id: id,
                                content: format!("Skipped: {reason}"),
                                is_error: false,
                            },
                            record,
                        ));
                        continue;
                    }
                    Ok(HookAction::ModifyToolInput { new_input }) => {
                        actual_input = new_input;
                    }
                    Ok(HookAction::Continue) => {}
                    Ok(_) => {}
                    // A preTool hook error is treated like the tool itself
                    // failing: skip execution and surface the error as
                    // this call's result instead of failing the step.
                    Err(e) => {
                        let message = e.to_string();
                        record.transition(ToolCallState::Failed, now_ms(), Some(message.clone()));
                        record.result = Some(message.clone());
                        record.is_error = true;
                        resolved.push(Resolved::Skipped(
                            ContentPart::ToolResult {
                                tool_use_id: id,
                                content: message,
                                is_error: true,
                            },
                            record,
                        ));
                        continue;
                    }
                }

                match self.config.approval_policy {
                    ApprovalPolicy::Auto => {
                        record.approval = Some(ApprovalRecord {
                            decision: PermissionDecision::Allow,
                            decided_by: "auto".into(),
                            decided_at_ms: now_ms(),
                            note: None,
                        });
                        record.transition(ToolCallState::Approved, now_ms(), None);
                        resolved.push(Resolved::Run {
                            id,
                            name,
                            input: actual_input,
                            record,
                        });
                    }
                    ApprovalPolicy::Ask => {
                        record.transition(ToolCallState::ApprovalRequired, now_ms(), None);
                        self.emit(
                            &mut persist_ctx,
                            Event::Control(ControlEvent::PermissionRequired {
                                call_id: id.clone(),
                                tool_name: name.clone(),
                            }),
                        )
                        .await;
                        self.set_breakpoint(&mut persist_ctx, BreakpointState::AwaitingApproval).await;

                        let rx = self.approvals.register(id.clone()).await;
                        let decision = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => None,
                            d = rx => d.ok(),
                        };
                        self.approvals.forget(&id).await;

                        match decision {
                            Some(PermissionDecision::Allow) => {
                                record.approval = Some(ApprovalRecord {
                                    decision: PermissionDecision::Allow,
                                    decided_by: "respond".into(),
                                    decided_at_ms: now_ms(),
                                    note: None,
                                });
                                record.transition(ToolCallState::Approved, now_ms(), None);
                                self.emit(
                                    &mut persist_ctx,
                                    Event::Control(ControlEvent::PermissionDecided {
                                        call_id: id.clone(),
                                        decision: PermissionDecision::Allow,
                                    }),
                                )
                                .await;
                                resolved.push(Resolved::Run {
                                    id,
                                    name,
                                    input: actual_input,
                                    record,
                                });
                            }
                            Some(PermissionDecision::Deny) => {
                                record.approval = Some(ApprovalRecord {
                                    decision: PermissionDecision::Deny,
                                    decided_by: "respond".into(),
                                    decided_at_ms: now_ms(),
                                    note: None,
                                });
                                record.transition(ToolCallState::Denied, now_ms(), None);
                                self.emit(
                                    &mut persist_ctx,
                                    Event::Control(ControlEvent::PermissionDecided {
                                        call_id: id.clone(),
                                        decision: PermissionDecision::Deny,
                                    }),
                                )
                                .await;
                                resolved.push(Resolved::Skipped(
                                    ContentPart::ToolResult {
                                        tool_use_id: id,
                                        content: "Denied: approval decision".into(),
                                        is_error: false,
                                    },
                                    record,
                                ));
                            }
                            None => {
                                record.transition(ToolCallState::Failed, now_ms(), Some("interrupted".into()));
                                record.result = Some("interrupted".into());
                                record.is_error = true;
                                resolved.push(Resolved::Skipped(
                                    ContentPart::ToolResult {
                                        tool_use_id: id,
                                        content: "interrupted".into(),
                                        is_error: true,
                                    },
                                    record,
                                ));
                            }
                        }
                    }
                }
            }

            if let Some(reason) = halted {
                finish!(ExitReason::ObserverHalt { reason });
            }

            self.set_breakpoint(&mut persist_ctx, BreakpointState::ToolExecuting).await;

            // c. Execute the runnable tools concurrently; join_all
            // preserves input order regardless of completion order.
            let run_futures = resolved.iter().filter_map(|r| match r {
                Resolved::Run { id, name, input, .. } => {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    let tool = self.tools.get(name).cloned();
                    let id = id.clone();
                    let name = name.clone();
                    let input = input.clone();
                    Some(async move {
                        let tool_start = Instant::now();
                        let result = match tool {
                            Some(tool) => tool.call(input).await,
                            None => Err(neuron_tool::ToolError::NotFound(name.clone())),
                        };
                        (id, name, result, DurationMs::from(tool_start.elapsed()))
                    })
                }
                _ => None,
            });
            let mut run_results = join_all(run_futures).await.into_iter();

            self.set_breakpoint(&mut persist_ctx, BreakpointState::PostTool).await;
            let mut tool_results = Vec::with_capacity(resolved.len());
            for item in resolved {
                match item {
                    Resolved::Effect(part, record) | Resolved::Skipped(part, record) => {
                        tool_summaries.push(SummaryToolCallRecord::new(
                            record.name.clone(),
                            DurationMs::ZERO,
                            record.state == ToolCallState::Completed,
                        ));
                        tool_lifecycle.push(record);
                        tool_results.push(part);
                    }
                    Resolved::Run { id, name, mut record, .. } => {
                        let Some((id, _name, result, duration)) = run_results.next() else {
                            // Cancelled between building `run_futures` and awaiting them:
                            // this entry was filtered out of the join, not executed. Treat
                            // it the same as any other in-flight tool caught by cancellation.
                            record.transition(ToolCallState::Failed, now_ms(), Some("interrupted".into()));
                            record.result = Some("interrupted".into());
                            record.is_error = true;
                            tool_summaries.push(SummaryToolCallRecord::new(name, DurationMs::ZERO, false));
                            tool_lifecycle.push(record);
                            tool_results.push(ContentPart::ToolResult {
                                tool_use_id: id,
                                content: "interrupted".into(),
                                is_error: true,
                            });
                            continue;
                        };
                        record.transition(ToolCallState::Executing, now_ms(), None);
                        self.emit(
                            &mut persist_ctx,
                            Event::Progress(ProgressEvent::ToolStart {
                                call_id: id.clone(),
                                name: name.clone(),
                            }),
                        )
                        .await;

                        let (mut result_content, mut is_error, mut success) = match result {
                            Ok(value) => (serde_json::to_string(&value).unwrap_or_default(), false, true),
                            Err(e) => (e.to_string(), true, false),
                        };

                        let mut hook_ctx = HookContext::new(HookPoint::PostToolUse);
                        hook_ctx.tool_name = Some(name.clone());
                        hook_ctx.tool_result = Some(result_content.clone());
                        hook_ctx.tokens_used = total_tokens_in + total_tokens_out;
                        hook_ctx.cost = total_cost;
                        hook_ctx.turns_completed = turns_used;
                        hook_ctx.elapsed = DurationMs::from(start.elapsed());

                        match self.hooks.dispatch(&hook_ctx).await {
                            Ok(HookAction::Halt { reason }) => {
                                record.transition(ToolCallState::Failed, now_ms(), Some("halted".into()));
                                tool_lifecycle.push(record);
                                self.persist_tool_calls(&persist_ctx, &tool_lifecycle).await;
                                finish!(ExitReason::ObserverHalt { reason });
                            }
                            Ok(HookAction::ModifyToolOutput { new_output }) => {
                                result_content = new_output
                                    .as_str()
                                    .map(str::to_string)
                                    .unwrap_or_else(|| new_output.to_string());
                            }
                            Ok(_) => {}
                            // A postTool hook error is treated like the
                            // tool itself failing: override the outcome
                            // with the hook's error rather than failing
                            // the step.
                            Err(e) => {
                                result_content = e.to_string();
                                is_error = true;
                                success = false;
                            }
                        }

                        if is_error {
                            self.emit(
                                &mut persist_ctx,
                                Event::Progress(ProgressEvent::ToolError {
                                    call_id: id.clone(),
                                    message: result_content.clone(),
                                }),
                            )
                            .await;
                            record.transition(ToolCallState::Failed, now_ms(), None);
                        } else {
                            self.emit(
                                &mut persist_ctx,
                                Event::Progress(ProgressEvent::ToolEnd { call_id: id.clone() }),
                            )
                            .await;
                            record.transition(ToolCallState::Completed, now_ms(), None);
                        }
                        record.result = Some(result_content.clone());
                        record.is_error = is_error;
                        self.emit(
                            &mut persist_ctx,
                            Event::Monitor(MonitorEvent::ToolExecuted {
                                call_id: id.clone(),
                                success,
                            }),
                        )
                        .await;

                        tool_summaries.push(SummaryToolCallRecord::new(name, duration, success));
                        tool_lifecycle.push(record);
                        tool_results.push(ContentPart::ToolResult {
                            tool_use_id: id,
                            content: result_content,
                            is_error,
                        });
                    }
                }
            }

            // Add tool results as user message
            let tool_result_message = ProviderMessage {
                role: Role::User,
                content: tool_results,
            };
            messages.push(tool_result_message.clone());

            self.persist_turn(
                &persist_ctx,
                vec![
                    neuron_turn::convert::provider_message_to_message(&assistant_message),
                    neuron_turn::convert::provider_message_to_message(&tool_result_message),
                ],
            )
            .await;
            self.persist_tool_calls(&persist_ctx, &tool_lifecycle).await;
            self.emit(
                &mut persist_ctx,
                Event::Monitor(MonitorEvent::StepComplete { step_count: turns_used }),
            )
            .await;
            self.set_breakpoint(&mut persist_ctx, BreakpointState::Ready).await;

            // 8. Check limits
            if turns_used >= config.max_turns {
                finish!(ExitReason::MaxTurns);
            }

            if let Some(max_cost) = &config.max_cost {
                if total_cost >= *max_cost {
                    finish!(ExitReason::BudgetExhausted);
                }
            }

            if let Some(max_duration) = &config.max_duration {
                if start.elapsed() >= max_duration.to_std() {
                    finish!(ExitReason::Timeout);
                }
            }

            // 9. Hook: ExitCheck
            let hook_ctx = self.build_hook_context(
                HookPoint::ExitCheck,
                total_tokens_in,
                total_tokens_out,
                total_cost,
                turns_used,
                DurationMs::from(start.elapsed()),
            );
            match self.hooks.dispatch(&hook_ctx).await {
                Ok(HookAction::Halt { reason }) => finish!(ExitReason::ObserverHalt { reason }),
                Ok(_) => {}
                Err(e) => {
                    self.emit(
                        &mut persist_ctx,
                        Event::Monitor(MonitorEvent::Error {
                            phase: "lifecycle".into(),
                            message: e.to_string(),
                        }),
                    )
                    .await;
                    return Err(OperatorError::NonRetryable(e.to_string()));
                }
            }

            // 10. Context compaction
            let limit = config.max_tokens as usize * 4;
            if self.context_strategy.should_compact(&messages, limit) {
                messages = self.context_strategy.compact(messages);
            }

            // 11. Loop repeats
        }
    }

    /// Seal every non-terminal tool-call record and build the synthetic
    /// `tool_result` message that keeps history resume-valid, per the
    /// cancellation contract.
    async fn interrupt_in_flight(
        &self,
        tool_lifecycle: &mut [PersistToolCallRecord],
        persist_ctx: &mut Option<PersistCtx>,
    ) -> Vec<layer0::content::Message> {
        let mut parts = Vec::new();
        for record in tool_lifecycle.iter_mut() {
            if !record.state.is_terminal() {
                record.seal(now_ms());
                parts.push(ContentPart::ToolResult {
                    tool_use_id: record.call_id.clone(),
                    content: "interrupted".into(),
                    is_error: true,
                });
            }
        }
        if parts.is_empty() {
            return vec![];
        }
        self.emit(
            persist_ctx,
            Event::Monitor(MonitorEvent::StateChanged {
                state: "interrupted".into(),
            }),
        )
        .await;
        vec![neuron_turn::convert::provider_message_to_message(&ProviderMessage {
            role: Role::User,
            content: parts,
        })]
    }
}

#[async_trait]
impl<P: Provider + 'static> Operator for ReactOperator<P> {
    async fn execute(&self, input: OperatorInput) -> Result<OperatorOutput, OperatorError> {
        self.execute_with_cancellation(input, CancellationToken::new()).await
    }
}

/// Schemas for effect tools that the model can call.
fn effect_tool_schemas() -> Vec<ToolSchema> {
    vec![
        ToolSchema {
            name: "write_memory".into(),
            description: "Write a value to persistent memory.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "scope": {"type": "string", "description": "Memory scope (e.g. 'global', 'session:id')"},
                    "key": {"type": "string", "description": "Memory key"},
                    "value": {"description": "Value to store"}
                },
                "required": ["scope", "key", "value"]
            }),
        },
        ToolSchema {
            name: "delete_memory".into(),
            description: "Delete a value from persistent memory.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "scope": {"type": "string", "description": "Memory scope"},
                    "key": {"type": "string", "description": "Memory key"}
                },
                "required": ["scope", "key"]
            }),
        },
        ToolSchema {
            name: "delegate".into(),
            description: "Delegate a task to another agent.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "agent": {"type": "string", "description": "Agent ID to delegate to"},
                    "message": {"type": "string", "description": "Task description for the agent"}
                },
                "required": ["agent"]
            }),
        },
        ToolSchema {
            name: "handoff".into(),
            description: "Hand off the conversation to another agent.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "agent": {"type": "string", "description": "Agent ID to hand off to"},
                    "state": {"description": "State to pass to the next agent"}
                },
                "required": ["agent"]
            }),
        },
        ToolSchema {
            name: "signal".into(),
            description: "Send a signal to another workflow.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "target": {"type": "string", "description": "Target workflow ID"},
                    "signal_type": {"type": "string", "description": "Signal type identifier"},
                    "data": {"description": "Signal payload data"}
                },
                "required": ["target"]
            }),
        },
    ]
}

/// Parse a scope string into a layer0 Scope.
fn parse_scope(s: &str) -> Scope {
    if s == "global" {
        return Scope::Global;
    }
    if let Some(id) = s.strip_prefix("session:") {
        return Scope::Session(layer0::SessionId::new(id));
    }
    if let Some(id) = s.strip_prefix("workflow:") {
        return Scope::Workflow(layer0::WorkflowId::new(id));
    }
    Scope::Custom(s.to_string())
}
