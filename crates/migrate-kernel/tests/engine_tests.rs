use migrate_kernel::prelude::*;
use migrate_test_utils::{
    linear_graph, scripted_chain, FailingStage, ScriptedStage, ToolCallingStage,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::Ordering;
use std::sync::Arc;

struct EchoTools;

#[async_trait::async_trait]
impl ToolDispatcher for EchoTools {
    async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        if call.tool == "db_metadata" {
            ToolResult::ok(Payload::text("employees"))
        } else {
            ToolResult::error("unknown tool")
        }
    }

    fn describe(&self) -> Vec<ToolDescription> {
        Vec::new()
    }
}

fn engine() -> PipelineEngine {
    PipelineEngine::new(TerminationPolicy::default())
}

#[tokio::test]
async fn test_max_messages_halts_after_exactly_three() {
    let graph = scripted_chain(6, "working on it").unwrap();

    let outcome = engine().run(&graph, "migrate employees", 3).await;

    assert_eq!(outcome.reason(), TerminationReason::MaxMessages);
    assert_eq!(outcome.state.appended_count(), 3);
    assert_eq!(outcome.state.len(), 4);
    assert_eq!(outcome.completed, vec!["stage_0", "stage_1", "stage_2"]);
    assert_eq!(outcome.skipped, vec!["stage_3", "stage_4", "stage_5"]);
    assert_eq!(outcome.halted_at.as_deref(), Some("stage_2"));
    assert!(outcome.is_success());
}

#[tokio::test]
async fn test_sentinel_halts_immediately() {
    let later = ScriptedStage::says("optimization", "never runs");
    let later_calls = later.calls();
    let graph = linear_graph(vec![
        Arc::new(ScriptedStage::says("setup", "environment ready")),
        Arc::new(ScriptedStage::says("schema", "report generated. TERMINATE")),
        Arc::new(later),
    ])
    .unwrap();

    let outcome = engine().run(&graph, "migrate employees", 15).await;

    assert_eq!(outcome.reason(), TerminationReason::Sentinel);
    assert_eq!(outcome.state.appended_count(), 2);
    assert_eq!(outcome.halted_at.as_deref(), Some("schema"));
    assert_eq!(later_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_five_stage_run_with_stage_scoped_sentinel() {
    let names = ["setup", "schema", "migrate", "validate", "anomaly"];
    let graph = linear_graph(
        names
            .iter()
            .map(|n| {
                Arc::new(ScriptedStage::says(*n, format!("{n} finished. TERMINATE")))
                    as Arc<dyn Stage>
            })
            .collect(),
    )
    .unwrap();

    let engine = PipelineEngine::new(TerminationPolicy::default().scoped(SentinelScope::Stage));
    let outcome = engine.run(&graph, "migrate employees", 15).await;

    assert_eq!(outcome.completed, names.to_vec());
    assert_eq!(outcome.state.len(), 6);
    assert_eq!(outcome.state.appended_count(), 5);
    assert_eq!(outcome.reason(), TerminationReason::Sentinel);
    assert!(outcome.halted_at.is_none());
}

#[tokio::test]
async fn test_stage_scoped_sentinel_still_honors_ceiling() {
    let graph = scripted_chain(6, "done TERMINATE").unwrap();
    let engine = PipelineEngine::new(TerminationPolicy::default().scoped(SentinelScope::Stage));

    let outcome = engine.run(&graph, "go", 2).await;

    assert_eq!(outcome.reason(), TerminationReason::MaxMessages);
    assert_eq!(outcome.state.appended_count(), 2);
}

#[tokio::test]
async fn test_failure_appends_error_and_halts() {
    let after = ScriptedStage::says("schema", "should not run");
    let after_calls = after.calls();
    let graph = linear_graph(vec![
        Arc::new(FailingStage::new(
            "setup",
            StageFailure::check_failed("target instance not running"),
        )),
        Arc::new(after),
    ])
    .unwrap();

    let outcome = engine().run(&graph, "migrate employees", 15).await;

    assert_eq!(outcome.reason(), TerminationReason::StageFailure);
    assert_eq!(outcome.halted_at.as_deref(), Some("setup"));
    assert!(!outcome.is_success());
    let last = outcome.state.latest();
    assert_eq!(last.kind, MessageKind::Error);
    assert_eq!(last.author, "setup");
    assert!(last.content.contains("target instance not running"));
    assert_eq!(after_calls.load(Ordering::SeqCst), 0);
    assert_eq!(outcome.skipped, vec!["schema"]);
}

#[tokio::test]
async fn test_error_message_never_counts_as_sentinel() {
    let graph = linear_graph(vec![Arc::new(FailingStage::new(
        "setup",
        StageFailure::fatal("TERMINATE"),
    ))])
    .unwrap();

    let outcome = engine().run(&graph, "go", 15).await;
    assert_eq!(outcome.reason(), TerminationReason::StageFailure);
}

#[tokio::test]
async fn test_undeclared_tool_access_fails_stage() {
    let graph = linear_graph(vec![Arc::new(ToolCallingStage::undeclared(
        "anomaly",
        ToolCall::new("db_metadata"),
    ))])
    .unwrap();

    let outcome = engine()
        .with_tools(Arc::new(EchoTools))
        .run(&graph, "go", 15)
        .await;

    assert_eq!(outcome.reason(), TerminationReason::StageFailure);
    let failure = outcome.failure.unwrap();
    assert!(failure.error.contains("capability not granted: tool access"));
}

#[tokio::test]
async fn test_declared_tool_access_records_call() {
    let graph = linear_graph(vec![Arc::new(ToolCallingStage::new(
        "schema",
        ToolCall::new("db_metadata"),
    ))])
    .unwrap();

    let outcome = engine()
        .with_tools(Arc::new(EchoTools))
        .run(&graph, "go", 15)
        .await;

    assert_eq!(outcome.reason(), TerminationReason::Completed);
    let msg = outcome.state.latest();
    assert_eq!(msg.content, "db_metadata ok");
    assert_eq!(msg.tool_records.len(), 1);
    assert!(msg.tool_records[0].result.is_ok());
}

#[tokio::test]
async fn test_tool_error_is_data_not_failure() {
    let graph = linear_graph(vec![Arc::new(ToolCallingStage::new(
        "schema",
        ToolCall::new("drop_everything"),
    ))])
    .unwrap();

    let outcome = engine()
        .with_tools(Arc::new(EchoTools))
        .run(&graph, "go", 15)
        .await;

    assert_eq!(outcome.reason(), TerminationReason::Completed);
    assert_eq!(outcome.state.latest().content, "drop_everything error: unknown tool");
}

#[tokio::test]
async fn test_missing_collaborator_fails_stage() {
    let graph = linear_graph(vec![Arc::new(ToolCallingStage::new(
        "schema",
        ToolCall::new("db_metadata"),
    ))])
    .unwrap();

    let outcome = engine().run(&graph, "go", 15).await;

    assert_eq!(outcome.reason(), TerminationReason::StageFailure);
    assert!(outcome
        .failure
        .unwrap()
        .error
        .contains("collaborator unavailable"));
}

#[tokio::test]
async fn test_cancel_signal_shared_across_runs() {
    let cancel = CancelSignal::new();
    let engine = engine().with_cancel_signal(cancel.clone());
    let graph = scripted_chain(3, "ok").unwrap();

    let first = engine.run(&graph, "go", 15).await;
    assert_eq!(first.reason(), TerminationReason::Completed);

    cancel.cancel();
    let second = engine.run(&graph, "go", 15).await;
    assert_eq!(second.reason(), TerminationReason::Cancelled);
    assert!(second.completed.is_empty());
}

#[tokio::test]
async fn test_zero_ceiling_runs_nothing() {
    let graph = scripted_chain(2, "ok").unwrap();
    let outcome = engine().run(&graph, "go", 0).await;
    assert_eq!(outcome.reason(), TerminationReason::MaxMessages);
    assert_eq!(outcome.state.len(), 1);
}

#[tokio::test]
async fn test_multi_reply_batch_is_appended_in_order() {
    let graph = linear_graph(vec![
        Arc::new(ScriptedStage::new(
            "schema",
            vec!["table 1".into(), "table 2".into()],
        )),
        Arc::new(ScriptedStage::says("migrate", "moved")),
    ])
    .unwrap();

    let outcome = engine().run(&graph, "go", 15).await;
    let contents: Vec<&str> = outcome
        .state
        .messages()
        .iter()
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(contents, vec!["go", "table 1", "table 2", "moved"]);
    assert_eq!(outcome.state.by_author("schema").count(), 2);
}
