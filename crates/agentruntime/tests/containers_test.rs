// crates/agentruntime/tests/containers_test.rs
mod common;

use agentcore::routing::{LOOP_END_HANDLE, LOOP_START_HANDLE, PARALLEL_END_HANDLE, PARALLEL_START_HANDLE};
use agentcore::{BlockType, LoopDef, LoopType, ParallelDef, ParallelType, SerializedWorkflow};
use agentruntime::{ToolResponse, FUNCTION_EXECUTE_TOOL};
use common::*;
use serde_json::json;

/// start → loop1 [body...] → after
fn loop_workflow(def: LoopDef, body: Vec<agentcore::SerializedBlock>) -> SerializedWorkflow {
    let mut wf = workflow();
    wf.add_block(block("loop1", BlockType::Loop));
    let first = body[0].id.clone();
    for pair in body.windows(2) {
        wf.connect(pair[0].id.clone(), pair[1].id.clone());
    }
    for b in body {
        wf.add_block(b);
    }
    wf.add_block(function("after", "after"));
    wf.connect("start", "loop1");
    wf.connect_handle("loop1", LOOP_START_HANDLE, first);
    wf.connect_handle("loop1", LOOP_END_HANDLE, "after");
    wf.loops.insert("loop1".into(), def);
    wf
}

fn parallel_workflow(def: ParallelDef, body: agentcore::SerializedBlock) -> SerializedWorkflow {
    let mut wf = workflow();
    wf.add_block(block("p1", BlockType::Parallel));
    let body_id = body.id.clone();
    wf.add_block(body);
    wf.add_block(function("after", "<fn1_parallel_p1_iteration_1.result>"));
    wf.connect("start", "p1");
    wf.connect_handle("p1", PARALLEL_START_HANDLE, body_id);
    wf.connect_handle("p1", PARALLEL_END_HANDLE, "after");
    wf.parallels.insert("p1".into(), def);
    wf
}

#[tokio::test]
async fn test_for_loop_runs_body_each_iteration() {
    let wf = loop_workflow(
        LoopDef::new("loop1", vec!["fn1".into()], 3),
        vec![function("fn1", "iteration <loop.index>")],
    );

    let harness = Harness::new();
    let result = harness.run(wf, json!({})).await;

    assert!(result.success, "run failed: {:?}", result.error);
    assert_eq!(
        harness.tools.function_codes(),
        vec!["iteration 0", "iteration 1", "iteration 2", "after"]
    );

    let looped = log_output(&result, "loop1").unwrap();
    assert_eq!(looped["iterations"], json!(3));
    assert_eq!(looped["loopId"], json!("loop1"));
    let results = looped["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[2]["fn1"]["result"], json!("iteration 2"));
}

#[tokio::test]
async fn test_loop_body_chain_reruns_in_order() {
    let wf = loop_workflow(
        LoopDef::new("loop1", vec!["fn1".into(), "fn2".into()], 2),
        vec![function("fn1", "first"), function("fn2", "second <fn1.result>")],
    );

    let harness = Harness::new();
    let result = harness.run(wf, json!({})).await;

    assert!(result.success, "run failed: {:?}", result.error);
    assert_eq!(
        harness.tools.function_codes(),
        vec!["first", "second \"first\"", "first", "second \"first\"", "after"]
    );
}

#[tokio::test]
async fn test_for_each_loop_exposes_current_item() {
    let mut def = LoopDef::new("loop1", vec!["fn1".into()], 0);
    def.loop_type = LoopType::ForEach;
    def.for_each_items = Some(json!("<start.letters>"));
    let wf = loop_workflow(def, vec![function("fn1", "emit(<loop.currentItem>)")]);

    let harness = Harness::new();
    let result = harness.run(wf, json!({"letters": ["a", "b"]})).await;

    assert!(result.success, "run failed: {:?}", result.error);
    assert_eq!(
        harness.tools.function_codes(),
        vec!["emit(\"a\")", "emit(\"b\")", "after"]
    );
    assert_eq!(log_output(&result, "loop1").unwrap()["iterations"], json!(2));
}

#[tokio::test]
async fn test_for_each_over_object_iterates_entries() {
    let mut def = LoopDef::new("loop1", vec!["fn1".into()], 0);
    def.loop_type = LoopType::ForEach;
    def.for_each_items = Some(json!({"x": 1, "y": 2}));
    let wf = loop_workflow(def, vec![function("fn1", "<loop.currentItem>")]);

    let harness = Harness::new();
    let result = harness.run(wf, json!({})).await;

    assert!(result.success, "run failed: {:?}", result.error);
    assert_eq!(
        harness.tools.function_codes(),
        vec!["[\"x\",1]", "[\"y\",2]", "after"]
    );
}

#[tokio::test]
async fn test_while_loop_stops_when_condition_fails() {
    let mut def = LoopDef::new("loop1", vec!["fn1".into()], 0);
    def.loop_type = LoopType::While;
    def.while_condition = Some("<loop.index> < 2".into());
    let wf = loop_workflow(def, vec![function("fn1", "tick")]);

    let harness = Harness::new();
    let result = harness.run(wf, json!({})).await;

    assert!(result.success, "run failed: {:?}", result.error);
    assert_eq!(harness.tools.function_codes(), vec!["tick", "tick", "after"]);
    assert_eq!(log_output(&result, "loop1").unwrap()["iterations"], json!(2));
}

#[tokio::test]
async fn test_while_loop_with_false_condition_never_runs_body() {
    let mut def = LoopDef::new("loop1", vec!["fn1".into()], 0);
    def.loop_type = LoopType::While;
    def.while_condition = Some("false".into());
    let wf = loop_workflow(def, vec![function("fn1", "tick")]);

    let harness = Harness::new();
    let result = harness.run(wf, json!({})).await;

    assert!(result.success, "run failed: {:?}", result.error);
    assert_eq!(harness.tools.function_codes(), vec!["after"]);
}

#[tokio::test]
async fn test_do_while_runs_body_at_least_once() {
    let mut def = LoopDef::new("loop1", vec!["fn1".into()], 0);
    def.loop_type = LoopType::DoWhile;
    def.while_condition = Some("false".into());
    let wf = loop_workflow(def, vec![function("fn1", "tick")]);

    let harness = Harness::new();
    let result = harness.run(wf, json!({})).await;

    assert!(result.success, "run failed: {:?}", result.error);
    assert_eq!(harness.tools.function_codes(), vec!["tick", "after"]);
}

#[tokio::test]
async fn test_loop_body_failure_fails_loop() {
    let wf = loop_workflow(
        LoopDef::new("loop1", vec!["fn1".into()], 3),
        vec![function("fn1", "boom")],
    );

    let harness = Harness::new()
        .with_tools(MockTools::new().respond(FUNCTION_EXECUTE_TOOL, ToolResponse::failed("boom")));
    let result = harness.run(wf, json!({})).await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("Block loop1 failed"), "got: {}", error);
    assert!(error.contains("iteration 0"), "got: {}", error);
    assert_eq!(harness.tools.function_codes(), vec!["boom"], "loop stops at the first failure");
}

#[tokio::test]
async fn test_loop_reference_outside_loop_fails() {
    let mut wf = workflow();
    wf.add_block(agent("writer", "Index <loop.index>"));
    wf.connect("start", "writer");

    let result = Harness::new().run(wf, json!({})).await;

    assert!(!result.success);
    assert!(result
        .error
        .unwrap()
        .contains("<loop.*> references are only valid inside a loop"));
}

#[tokio::test]
async fn test_parallel_count_runs_every_branch() {
    let wf = parallel_workflow(
        ParallelDef::new("p1", vec!["fn1".into()], 3),
        function("fn1", "branch <parallel.index>"),
    );

    let harness = Harness::new();
    let result = harness.run(wf, json!({})).await;

    assert!(result.success, "run failed: {:?}", result.error);
    let mut codes = harness.tools.function_codes();
    let after = codes.pop().unwrap();
    codes.sort();
    assert_eq!(codes, vec!["branch 0", "branch 1", "branch 2"]);
    assert_eq!(after, "\"branch 1\"", "branch output is readable by virtual id");

    let fanout = log_output(&result, "p1").unwrap();
    assert_eq!(fanout["count"], json!(3));
    let results = fanout["results"].as_array().unwrap();
    assert_eq!(results[0]["fn1"]["result"], json!("branch 0"));
    assert_eq!(results[2]["fn1"]["result"], json!("branch 2"));

    let branch_logs = result.logs.iter().filter(|l| l.block_id == "fn1").count();
    assert_eq!(branch_logs, 3, "branch logs are merged into the run");
}

#[tokio::test]
async fn test_parallel_collection_distributes_items() {
    let mut def = ParallelDef::new("p1", vec!["fn1".into()], 0);
    def.parallel_type = ParallelType::Collection;
    def.distribution = Some(json!(["x", "y"]));
    let wf = parallel_workflow(def, function("fn1", "take(<parallel.currentItem>)"));

    let harness = Harness::new();
    let result = harness.run(wf, json!({})).await;

    assert!(result.success, "run failed: {:?}", result.error);
    let mut codes = harness.tools.function_codes();
    let after = codes.pop().unwrap();
    codes.sort();
    assert_eq!(codes, vec!["take(\"x\")", "take(\"y\")"]);
    assert_eq!(after, "\"take(\\\"y\\\")\"");
    assert_eq!(log_output(&result, "p1").unwrap()["count"], json!(2));
}

#[tokio::test]
async fn test_parallel_branch_failure_fails_parallel() {
    let wf = parallel_workflow(
        ParallelDef::new("p1", vec!["fn1".into()], 2),
        function("fn1", "boom"),
    );

    let harness = Harness::new()
        .with_tools(MockTools::new().respond(FUNCTION_EXECUTE_TOOL, ToolResponse::failed("boom")));
    let result = harness.run(wf, json!({})).await;

    assert!(!result.success);
    let error = result.error.clone().unwrap();
    assert!(error.contains("Block p1 failed"), "got: {}", error);
    assert!(log_output(&result, "after").is_none());
}
