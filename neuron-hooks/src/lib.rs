#![deny(missing_docs)]
//! Hook registry and composition for neuron.
//!
//! The [`HookRegistry`] collects multiple [`Hook`] implementations into
//! an ordered pipeline. At each hook point, hooks are dispatched in
//! registration order. The pipeline short-circuits on `Halt`, `SkipTool`,
//! or `ModifyToolInput` — subsequent hooks are not called.
//!
//! A hook error isolates to the hook that raised it: the pipeline keeps
//! consulting the remaining hooks for this point rather than aborting
//! outright, but if nothing later overrides it with a real action,
//! [`HookRegistry::dispatch`] surfaces the first error it saw instead of
//! silently returning `Continue`. What that error means depends on
//! which point raised it — `preTool`/`postTool` errors should be
//! treated like a tool error by the caller, while `preModel`/
//! `postModel`/`messagesChanged` errors should fail the step — so the
//! classification lives with the caller, not here.

use layer0::hook::{Hook, HookAction, HookContext, HookPoint};
use std::sync::Arc;
use thiserror::Error;

/// A hook raised an error while handling `point`.
#[derive(Debug, Error)]
#[error("hook error at {point:?}: {source}")]
pub struct HookDispatchError {
    /// The hook point being dispatched when the error occurred.
    pub point: HookPoint,
    /// The hook's own error.
    #[source]
    pub source: layer0::error::HookError,
}

impl HookDispatchError {
    /// Whether this point's errors should be handled the way a failed
    /// tool call is (`preTool`/`postTool`), as opposed to failing the
    /// whole step (`preModel`/`postModel`/`messagesChanged`, and any
    /// other lifecycle point).
    pub fn is_tool_phase(&self) -> bool {
        matches!(self.point, HookPoint::PreToolUse | HookPoint::PostToolUse)
    }
}

/// A registry that dispatches hook events to an ordered pipeline of hooks.
///
/// Hooks are called in the order they were registered. The pipeline
/// short-circuits on any action other than `Continue`.
pub struct HookRegistry {
    hooks: Vec<Arc<dyn Hook>>,
}

impl HookRegistry {
    /// Create a new empty hook registry.
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Add a hook to the end of the pipeline.
    pub fn add(&mut self, hook: Arc<dyn Hook>) {
        self.hooks.push(hook);
    }

    /// Dispatch a hook event through the pipeline.
    ///
    /// Returns the final action if any hook returns something other
    /// than `Continue`. Otherwise, if every hook that fired either
    /// returned `Continue` or errored, returns the first error seen —
    /// the caller decides what that means for this hook point.
    pub async fn dispatch(&self, ctx: &HookContext) -> Result<HookAction, HookDispatchError> {
        let mut first_error = None;
        for hook in &self.hooks {
            // Only dispatch to hooks registered for this point
            if !hook.points().contains(&ctx.point) {
                continue;
            }

            match hook.on_event(ctx).await {
                Ok(HookAction::Continue) => continue,
                Ok(action) => return Ok(action),
                Err(source) => {
                    if first_error.is_none() {
                        first_error = Some(HookDispatchError { point: ctx.point, source });
                    }
                    continue;
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(HookAction::Continue),
        }
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}
