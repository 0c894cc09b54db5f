use layer0::error::HookError;
use layer0::hook::{Hook, HookAction, HookContext, HookPoint};
use layer0::test_utils::LoggingHook;
use neuron_hooks::HookRegistry;
use std::sync::Arc;

// --- Empty registry ---

#[tokio::test]
async fn empty_registry_returns_continue() {
    let registry = HookRegistry::new();
    let ctx = HookContext::new(HookPoint::PreInference);
    let action = registry.dispatch(&ctx).await.unwrap();
    assert!(matches!(action, HookAction::Continue));
}

// --- Single hook ---

#[tokio::test]
async fn single_hook_dispatches() {
    let mut registry = HookRegistry::new();
    let hook = Arc::new(LoggingHook::new());
    registry.add(hook.clone());

    let ctx = HookContext::new(HookPoint::PreInference);
    let action = registry.dispatch(&ctx).await.unwrap();
    assert!(matches!(action, HookAction::Continue));

    // LoggingHook records events
    let events = hook.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].point, HookPoint::PreInference);
}

// --- Hook ordering ---

/// A hook that records its name for ordering verification.
struct NamedHook {
    name: String,
    log: Arc<std::sync::Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl Hook for NamedHook {
    fn points(&self) -> &[HookPoint] {
        &[HookPoint::PreInference, HookPoint::PostInference]
    }

    async fn on_event(&self, _ctx: &HookContext) -> Result<HookAction, HookError> {
        self.log.lock().unwrap().push(self.name.clone());
        Ok(HookAction::Continue)
    }
}

#[tokio::test]
async fn hooks_execute_in_registration_order() {
    let log = Arc::new(std::sync::Mutex::new(Vec::new()));

    let mut registry = HookRegistry::new();
    registry.add(Arc::new(NamedHook {
        name: "first".into(),
        log: Arc::clone(&log),
    }));
    registry.add(Arc::new(NamedHook {
        name: "second".into(),
        log: Arc::clone(&log),
    }));
    registry.add(Arc::new(NamedHook {
        name: "third".into(),
        log: Arc::clone(&log),
    }));

    let ctx = HookContext::new(HookPoint::PreInference);
    registry.dispatch(&ctx).await.unwrap();

    let log = log.lock().unwrap();
    assert_eq!(*log, vec!["first", "second", "third"]);
}

// --- Halt propagation ---

/// A hook that halts.
struct HaltingHook;

#[async_trait::async_trait]
impl Hook for HaltingHook {
    fn points(&self) -> &[HookPoint] {
        &[HookPoint::PreInference]
    }

    async fn on_event(&self, _ctx: &HookContext) -> Result<HookAction, HookError> {
        Ok(HookAction::Halt {
            reason: "policy violation".into(),
        })
    }
}

#[tokio::test]
async fn halt_stops_pipeline() {
    let log = Arc::new(std::sync::Mutex::new(Vec::new()));

    let mut registry = HookRegistry::new();
    registry.add(Arc::new(NamedHook {
        name: "before-halt".into(),
        log: Arc::clone(&log),
    }));
    registry.add(Arc::new(HaltingHook));
    registry.add(Arc::new(NamedHook {
        name: "after-halt".into(),
        log: Arc::clone(&log),
    }));

    let ctx = HookContext::new(HookPoint::PreInference);
    let action = registry.dispatch(&ctx).await.unwrap();

    // Should halt
    assert!(matches!(action, HookAction::Halt { .. }));

    // "after-halt" should NOT have been called
    let log = log.lock().unwrap();
    assert_eq!(*log, vec!["before-halt"]);
}

// --- Point filtering ---

#[tokio::test]
async fn hooks_only_fire_at_registered_points() {
    let mut registry = HookRegistry::new();
    let hook = Arc::new(LoggingHook::new());
    registry.add(hook.clone());

    // LoggingHook registers for all 5 points. Let's check it fires.
    let ctx = HookContext::new(HookPoint::ExitCheck);
    registry.dispatch(&ctx).await.unwrap();
    assert_eq!(hook.events().len(), 1);

    // A hook that only registers for PreToolUse should not fire on PreInference
    struct PreToolOnly;
    #[async_trait::async_trait]
    impl Hook for PreToolOnly {
        fn points(&self) -> &[HookPoint] {
            &[HookPoint::PreToolUse]
        }
        async fn on_event(&self, _ctx: &HookContext) -> Result<HookAction, HookError> {
            panic!("should not fire at PreInference!");
        }
    }

    let mut registry2 = HookRegistry::new();
    registry2.add(Arc::new(PreToolOnly));

    let ctx = HookContext::new(HookPoint::PreInference);
    let action = registry2.dispatch(&ctx).await.unwrap();
    assert!(matches!(action, HookAction::Continue));
}

// --- Error handling ---

/// A hook that errors.
struct ErroringHook;

#[async_trait::async_trait]
impl Hook for ErroringHook {
    fn points(&self) -> &[HookPoint] {
        &[HookPoint::PreInference]
    }

    async fn on_event(&self, _ctx: &HookContext) -> Result<HookAction, HookError> {
        Err(HookError::Failed("something broke".into()))
    }
}

#[tokio::test]
async fn hook_error_isolates_but_still_lets_later_hooks_run() {
    let log = Arc::new(std::sync::Mutex::new(Vec::new()));

    let mut registry = HookRegistry::new();
    registry.add(Arc::new(ErroringHook));
    registry.add(Arc::new(NamedHook {
        name: "after-error".into(),
        log: Arc::clone(&log),
    }));

    let ctx = HookContext::new(HookPoint::PreInference);
    let result = registry.dispatch(&ctx).await;

    // The erroring hook doesn't prevent later hooks in the pipeline
    // from running...
    let log = log.lock().unwrap();
    assert_eq!(*log, vec!["after-error"]);

    // ...but since nothing overrode it with a real action, the error
    // is surfaced rather than silently treated as Continue. The
    // caller decides what this point's error means.
    let err = result.unwrap_err();
    assert_eq!(err.point, HookPoint::PreInference);
    assert!(!err.is_tool_phase());
}

#[tokio::test]
async fn tool_phase_errors_are_classified_as_tool_phase() {
    let mut registry = HookRegistry::new();
    registry.add(Arc::new(PreToolErroringHook));

    let ctx = HookContext::new(HookPoint::PreToolUse);
    let err = registry.dispatch(&ctx).await.unwrap_err();
    assert!(err.is_tool_phase());
}

struct PreToolErroringHook;

#[async_trait::async_trait]
impl Hook for PreToolErroringHook {
    fn points(&self) -> &[HookPoint] {
        &[HookPoint::PreToolUse]
    }

    async fn on_event(&self, _ctx: &HookContext) -> Result<HookAction, HookError> {
        Err(HookError::Failed("policy lookup failed".into()))
    }
}

// --- SkipTool and ModifyToolInput propagation ---

struct SkipToolHook;

#[async_trait::async_trait]
impl Hook for SkipToolHook {
    fn points(&self) -> &[HookPoint] {
        &[HookPoint::PreToolUse]
    }

    async fn on_event(&self, _ctx: &HookContext) -> Result<HookAction, HookError> {
        Ok(HookAction::SkipTool {
            reason: "not allowed".into(),
        })
    }
}

#[tokio::test]
async fn skip_tool_stops_pipeline() {
    let mut registry = HookRegistry::new();
    registry.add(Arc::new(SkipToolHook));

    let ctx = HookContext::new(HookPoint::PreToolUse);
    let action = registry.dispatch(&ctx).await.unwrap();
    assert!(matches!(action, HookAction::SkipTool { .. }));
}

struct ModifyInputHook;

#[async_trait::async_trait]
impl Hook for ModifyInputHook {
    fn points(&self) -> &[HookPoint] {
        &[HookPoint::PreToolUse]
    }

    async fn on_event(&self, _ctx: &HookContext) -> Result<HookAction, HookError> {
        Ok(HookAction::ModifyToolInput {
            new_input: serde_json::json!({"sanitized": true}),
        })
    }
}

#[tokio::test]
async fn modify_tool_input_stops_pipeline() {
    let mut registry = HookRegistry::new();
    registry.add(Arc::new(ModifyInputHook));

    let ctx = HookContext::new(HookPoint::PreToolUse);
    let action = registry.dispatch(&ctx).await.unwrap();
    assert!(matches!(action, HookAction::ModifyToolInput { .. }));
}
