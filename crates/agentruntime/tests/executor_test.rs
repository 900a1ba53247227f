// crates/agentruntime/tests/executor_test.rs
mod common;

use agentcore::routing::ERROR_HANDLE;
use agentcore::{BlockEvent, BlockState, BlockType, ErrorHandling, ExecutionEvent};
use agentruntime::{ExecutionRequest, RuntimeConfig, ToolResponse, FUNCTION_EXECUTE_TOOL, HTTP_REQUEST_TOOL};
use common::*;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

fn succeed(ctx: &mut agentcore::ExecutionContext, id: &str) {
    ctx.record(id, BlockState::succeeded(json!({}), 1));
}

/// start → router1 → {function1, router2}; router2 → {function2, workflow2}
fn routing_scenario() -> agentcore::SerializedWorkflow {
    let mut wf = workflow();
    wf.add_block(router("router1", "Pick the first branch").with_name("Router 1"));
    wf.add_block(function("function1", "return 1"));
    wf.add_block(router("router2", "Pick the second branch").with_name("Router 2"));
    wf.add_block(function("function2", "return 2"));
    wf.add_block(workflow_block("workflow2", "child-wf"));
    wf.connect("start", "router1");
    wf.connect("router1", "function1");
    wf.connect("router1", "router2");
    wf.connect("router2", "function2");
    wf.connect("router2", "workflow2");
    wf
}

#[tokio::test]
async fn test_layer_waits_for_every_active_dependency() {
    let mut wf = workflow();
    wf.add_block(function("a", "a"));
    wf.add_block(function("b", "b"));
    wf.add_block(function("c", "c"));
    wf.connect("start", "a");
    wf.connect("start", "b");
    wf.connect("a", "c");
    wf.connect("b", "c");

    let harness = Harness::new();
    let executor = harness.executor(wf.clone());
    let tracker = agentruntime::PathTracker::new(&wf);
    let mut ctx = executor.create_execution_context(ExecutionRequest::new("exec-1"));

    assert_eq!(executor.get_next_execution_layer(&ctx), vec!["a", "b"]);

    succeed(&mut ctx, "a");
    tracker.update_execution_paths(&["a".to_string()], &mut ctx);
    assert_eq!(
        executor.get_next_execution_layer(&ctx),
        vec!["b"],
        "c must wait for b, which is active and not yet executed"
    );

    succeed(&mut ctx, "b");
    tracker.update_execution_paths(&["b".to_string()], &mut ctx);
    assert_eq!(executor.get_next_execution_layer(&ctx), vec!["c"]);
}

#[tokio::test]
async fn test_unselected_branch_does_not_block_join() {
    let mut wf = workflow();
    wf.add_block(router("router1", "pick"));
    wf.add_block(function("x", "x"));
    wf.add_block(function("y", "y"));
    wf.add_block(function("z", "z"));
    wf.connect("start", "router1");
    wf.connect("router1", "x");
    wf.connect("router1", "y");
    wf.connect("x", "z");
    wf.connect("y", "z");

    let harness = Harness::new();
    let executor = harness.executor(wf.clone());
    let tracker = agentruntime::PathTracker::new(&wf);
    let mut ctx = executor.create_execution_context(ExecutionRequest::new("exec-1"));

    succeed(&mut ctx, "router1");
    ctx.decisions.router.insert("router1".into(), "x".into());
    tracker.update_execution_paths(&["router1".to_string()], &mut ctx);
    assert_eq!(executor.get_next_execution_layer(&ctx), vec!["x"]);

    succeed(&mut ctx, "x");
    tracker.update_execution_paths(&["x".to_string()], &mut ctx);
    assert_eq!(executor.get_next_execution_layer(&ctx), vec!["z"]);
}

#[tokio::test]
async fn test_flow_control_block_excluded_by_other_decision() {
    let mut wf = workflow();
    wf.add_block(router("router1", "pick"));
    wf.add_block(function("worker", "w"));
    wf.add_block(router("router2", "pick again"));
    wf.connect("start", "router1");
    wf.connect("router1", "worker");
    wf.connect("router1", "router2");
    wf.connect("worker", "router2");

    let harness = Harness::new();
    let executor = harness.executor(wf.clone());
    let tracker = agentruntime::PathTracker::new(&wf);
    let mut ctx = executor.create_execution_context(ExecutionRequest::new("exec-1"));

    succeed(&mut ctx, "router1");
    ctx.decisions.router.insert("router1".into(), "worker".into());
    tracker.update_execution_paths(&["router1".to_string()], &mut ctx);
    succeed(&mut ctx, "worker");
    tracker.update_execution_paths(&["worker".to_string()], &mut ctx);

    assert!(ctx.active_execution_path.contains("router2"));
    assert!(
        executor.get_next_execution_layer(&ctx).is_empty(),
        "router2 was not chosen by router1 and must not run"
    );
}

#[tokio::test]
async fn test_chained_routers_schedule_step_by_step() {
    let wf = routing_scenario();
    let harness = Harness::new();
    let executor = harness.executor(wf.clone());
    let tracker = agentruntime::PathTracker::new(&wf);
    let mut ctx = executor.create_execution_context(ExecutionRequest::new("exec-1"));

    assert_eq!(executor.get_next_execution_layer(&ctx), vec!["router1"]);

    succeed(&mut ctx, "router1");
    ctx.decisions.router.insert("router1".into(), "router2".into());
    tracker.update_execution_paths(&["router1".to_string()], &mut ctx);
    assert_eq!(executor.get_next_execution_layer(&ctx), vec!["router2"]);

    succeed(&mut ctx, "router2");
    ctx.decisions.router.insert("router2".into(), "function2".into());
    tracker.update_execution_paths(&["router2".to_string()], &mut ctx);
    assert_eq!(executor.get_next_execution_layer(&ctx), vec!["function2"]);
}

#[tokio::test]
async fn test_chained_routers_end_to_end() {
    let harness = Harness::new().with_provider(
        MockProvider::new()
            .on("Pick the first branch", "router2")
            .on("Pick the second branch", " Function2 \n"),
    );

    let result = harness.run(routing_scenario(), json!({})).await;

    assert!(result.success, "run failed: {:?}", result.error);
    assert_eq!(executed_ids(&result), vec!["router1", "router2", "function2"]);
    assert_eq!(harness.provider.requests().len(), 2);
    assert!(harness.loader.loads().is_empty(), "workflow2 must never run");
    assert_eq!(harness.tools.function_codes(), vec!["return 2"]);

    let routed = log_output(&result, "router1").unwrap();
    assert_eq!(routed["selectedPath"]["blockId"], json!("router2"));
    assert_eq!(routed["content"], json!("Pick the first branch"));
}

#[tokio::test]
async fn test_invalid_routing_decision_fails_run() {
    let harness = Harness::new().with_provider(MockProvider::new().replying("nowhere"));
    let result = harness.run(routing_scenario(), json!({})).await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("router1"), "error should name the block: {}", error);
    assert!(error.contains("Invalid routing decision: nowhere"), "got: {}", error);
}

#[tokio::test]
async fn test_starter_input_is_referenced_by_downstream_blocks() {
    let mut wf = workflow();
    wf.add_block(agent("writer", "Write about a topic").with_param("context", "<start.topic>"));
    wf.connect("start", "writer");

    let harness = Harness::new();
    let result = harness.run(wf, json!({"topic": "rust"})).await;

    assert!(result.success, "run failed: {:?}", result.error);
    let requests = harness.provider.requests();
    assert_eq!(requests[0].context.as_deref(), Some("rust"));
    assert_eq!(requests[0].provider_id, "openai");
    assert_eq!(result.output["content"], json!("ok"));
}

#[tokio::test]
async fn test_response_block_is_final_output() {
    let mut wf = workflow();
    wf.add_block(function("fn1", "return 42"));
    wf.add_block(
        block("respond", BlockType::Response)
            .with_param("data", "<fn1.result>")
            .with_param("status", 201),
    );
    wf.connect("start", "fn1");
    wf.connect("fn1", "respond");

    let result = Harness::new().run(wf, json!({})).await;

    assert!(result.success, "run failed: {:?}", result.error);
    assert_eq!(result.output["data"], json!("return 42"));
    assert_eq!(result.output["status"], json!(201));
    assert_eq!(result.output["headers"], json!({}));
}

#[tokio::test]
async fn test_structured_agent_output_merges_fields() {
    let mut wf = workflow();
    wf.add_block(
        agent("grader", "Grade the essay")
            .with_param("responseFormat", json!({"name": "grade", "schema": {"type": "object"}})),
    );
    wf.connect("start", "grader");

    let harness = Harness::new()
        .with_provider(MockProvider::new().replying("```json\n{\"score\": 5, \"reason\": \"clear\"}\n```"));
    let result = harness.run(wf, json!({})).await;

    assert!(result.success, "run failed: {:?}", result.error);
    assert_eq!(result.output["score"], json!(5));
    assert_eq!(result.output["reason"], json!("clear"));
    assert_eq!(result.output["model"], json!("gpt-4o"));
}

#[tokio::test]
async fn test_streaming_agent_forwards_chunks() {
    let mut wf = workflow();
    wf.add_block(agent("talker", "Say hello").with_param("stream", true));
    wf.connect("start", "talker");

    let harness =
        Harness::new().with_provider(MockProvider::new().replying("hello streaming world"));
    let mut events = harness.events.subscribe();
    let result = harness.run(wf, json!({})).await;

    assert!(result.success, "run failed: {:?}", result.error);
    assert_eq!(result.output["content"], json!("hello streaming world"));
    assert_eq!(result.output["model"], json!("gpt-4o"));

    let mut chunks = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ExecutionEvent::BlockEvent {
            block_id,
            event: BlockEvent::Chunk { content },
            ..
        } = event
        {
            assert_eq!(block_id, "talker");
            chunks.push(content);
        }
    }
    assert_eq!(chunks, vec!["hello ", "streaming ", "world"]);
}

#[tokio::test]
async fn test_unhandled_failure_stops_workflow() {
    let mut wf = workflow();
    wf.add_block(api("fetch", "https://example.com"));
    wf.add_block(function("after", "after"));
    wf.connect("start", "fetch");
    wf.connect("fetch", "after");

    let harness = Harness::new()
        .with_tools(MockTools::new().respond(HTTP_REQUEST_TOOL, ToolResponse::failed("connection refused")));
    let result = harness.run(wf, json!({})).await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("Block fetch failed"), "got: {}", error);
    assert!(error.contains("connection refused"), "got: {}", error);
    assert!(harness.tools.function_codes().is_empty());

    let log = result.logs.iter().find(|l| l.block_id == "fetch").unwrap();
    assert!(!log.success);
}

#[tokio::test]
async fn test_error_path_handles_failure() {
    let mut wf = workflow();
    wf.add_block(api("fetch", "https://example.com"));
    wf.add_block(function("after", "after"));
    wf.add_block(function("fallback", "fallback"));
    wf.connect("start", "fetch");
    wf.connect("fetch", "after");
    wf.connect_handle("fetch", ERROR_HANDLE, "fallback");

    let harness = Harness::new()
        .with_tools(MockTools::new().respond(HTTP_REQUEST_TOOL, ToolResponse::failed("timeout")));
    let result = harness.run(wf, json!({})).await;

    assert!(result.success, "error path should absorb the failure: {:?}", result.error);
    assert_eq!(harness.tools.function_codes(), vec!["fallback"]);
    assert_eq!(result.output["result"], json!("fallback"));
}

#[tokio::test]
async fn test_continue_on_error_runs_independent_branches() {
    let mut wf = workflow();
    wf.add_block(api("fetch", "https://example.com"));
    wf.add_block(function("fn1", "independent"));
    wf.add_block(function("fn2", "downstream"));
    wf.connect("start", "fetch");
    wf.connect("start", "fn1");
    wf.connect("fn1", "fn2");

    let config = RuntimeConfig {
        on_error: ErrorHandling::ContinueOnError,
        ..RuntimeConfig::default()
    };
    let harness = Harness::new()
        .with_config(config)
        .with_tools(MockTools::new().respond(HTTP_REQUEST_TOOL, ToolResponse::failed("bad gateway")));
    let result = harness.run(wf, json!({})).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("fetch"));
    assert_eq!(harness.tools.function_codes(), vec!["independent", "downstream"]);
}

#[tokio::test]
async fn test_block_timeout_fails_block() {
    let mut wf = workflow();
    wf.add_block(function("slow", "sleep"));
    wf.connect("start", "slow");

    let config = RuntimeConfig {
        block_timeout_ms: Some(20),
        ..RuntimeConfig::default()
    };
    let harness = Harness::new()
        .with_config(config)
        .with_tools(MockTools::new().with_delay(Duration::from_millis(500)));
    let result = harness.run(wf, json!({})).await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("Timeout after 20ms"), "got: {}", error);
}

#[tokio::test]
async fn test_cancellation_stops_running_blocks() {
    let mut wf = workflow();
    wf.add_block(function("slow", "sleep"));
    wf.add_block(function("after", "after"));
    wf.connect("start", "slow");
    wf.connect("slow", "after");

    let harness = Harness::new().with_tools(MockTools::new().with_delay(Duration::from_millis(500)));
    let executor = harness.executor(wf);
    let token = executor.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let result = executor.execute(ExecutionRequest::new("exec-1")).await;

    assert!(!result.success);
    assert!(result
        .error
        .unwrap()
        .contains("Workflow execution was cancelled"));
    assert_eq!(harness.tools.function_codes(), vec!["sleep"]);
}

#[tokio::test]
async fn test_cancelled_before_start_runs_nothing() {
    let mut wf = workflow();
    wf.add_block(function("fn1", "x"));
    wf.connect("start", "fn1");

    let harness = Harness::new();
    let executor = harness.executor(wf);
    executor.cancel();
    let result = executor.execute(ExecutionRequest::new("exec-1")).await;

    assert!(!result.success);
    assert!(result.logs.is_empty());
    assert!(harness.tools.calls().is_empty());
}

#[tokio::test]
async fn test_validation_requires_single_starter() {
    let mut wf = agentcore::SerializedWorkflow::new();
    wf.add_block(function("fn1", "x"));

    let result = Harness::new().run(wf, json!({})).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("starter"));
    assert!(result.logs.is_empty());
}

#[tokio::test]
async fn test_validation_rejects_incoming_edge_on_starter() {
    let mut wf = workflow();
    wf.add_block(function("fn1", "x"));
    wf.connect("start", "fn1");
    wf.connect("fn1", "start");

    let result = Harness::new().run(wf, json!({})).await;

    assert!(!result.success);
    assert!(result
        .error
        .unwrap()
        .contains("Starter block cannot have incoming connections"));
}

#[tokio::test]
async fn test_max_layers_aborts_run() {
    let mut wf = workflow();
    wf.add_block(function("a", "a"));
    wf.add_block(function("b", "b"));
    wf.connect("start", "a");
    wf.connect("a", "b");

    let config = RuntimeConfig {
        max_layers: 1,
        ..RuntimeConfig::default()
    };
    let result = Harness::new().with_config(config).run(wf, json!({})).await;

    assert!(!result.success);
    assert!(result
        .error
        .unwrap()
        .contains("Maximum execution layers (1) exceeded"));
}

#[tokio::test]
async fn test_disabled_block_is_skipped() {
    let mut wf = workflow();
    wf.add_block(function("off", "off").disabled());
    wf.add_block(function("on", "on"));
    wf.connect("start", "off");
    wf.connect("start", "on");

    let harness = Harness::new();
    let result = harness.run(wf, json!({})).await;

    assert!(result.success);
    assert_eq!(harness.tools.function_codes(), vec!["on"]);
}

#[tokio::test]
async fn test_carried_over_states_and_variables_resolve() {
    let mut wf = workflow();
    wf.add_block(agent("writer", "Summarize <variable.audience>").with_param("context", "<previous.value>"));
    wf.connect("start", "writer");

    let harness = Harness::new();
    let request = ExecutionRequest::new("exec-1")
        .with_block_states(HashMap::from([("previous".to_string(), json!({"value": 3}))]))
        .with_variables(HashMap::from([("audience".to_string(), json!("engineers"))]));
    let result = harness.executor(wf).execute(request).await;

    assert!(result.success, "run failed: {:?}", result.error);
    let request = &harness.provider.requests()[0];
    assert_eq!(request.context.as_deref(), Some("3"));
    assert_eq!(request.system_prompt.as_deref(), Some("Summarize engineers"));
}

#[tokio::test]
async fn test_unknown_block_reference_fails_block() {
    let mut wf = workflow();
    wf.add_block(agent("writer", "Use <ghost.content>"));
    wf.connect("start", "writer");

    let result = Harness::new().run(wf, json!({})).await;

    assert!(!result.success);
    assert!(result
        .error
        .unwrap()
        .contains("Block reference \"ghost\" was not found"));
}

#[tokio::test]
async fn test_function_receives_environment() {
    let mut wf = workflow();
    wf.add_block(function("fn1", "return '{{API_HOST}}'"));
    wf.connect("start", "fn1");

    let harness = Harness::new();
    let request = ExecutionRequest::new("exec-1")
        .with_environment(HashMap::from([("API_HOST".to_string(), "example.com".to_string())]));
    let result = harness.executor(wf).execute(request).await;

    assert!(result.success, "run failed: {:?}", result.error);
    let (tool, params) = &harness.tools.calls()[0];
    assert_eq!(tool, FUNCTION_EXECUTE_TOOL);
    assert_eq!(params["envVars"]["API_HOST"], json!("example.com"));
    assert!(params["code"].as_str().unwrap().contains("example.com"));
}
