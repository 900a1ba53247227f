// crates/agentruntime/tests/serializer_test.rs
mod common;

use agentcore::routing::LOOP_START_HANDLE;
use agentcore::state::{BlockData, LoopRecord};
use agentcore::{
    BlockRecord, BlockType, ConfigurationError, Edge, LoopType, ParallelType, ParamType,
    WorkflowRecord, WorkflowState,
};
use agentruntime::{AgentRuntime, BlockRegistry, ExecutionRequest, Serializer};
use common::{MockLoader, MockProvider, MockTools};
use serde_json::json;
use std::sync::Arc;

fn state(blocks: Vec<BlockRecord>, edges: Vec<Edge>) -> WorkflowState {
    WorkflowState {
        blocks: blocks.into_iter().map(|b| (b.id.clone(), b)).collect(),
        edges,
        ..WorkflowState::default()
    }
}

fn starter() -> BlockRecord {
    BlockRecord::new("start", "starter", "Start")
}

#[test]
fn test_sub_blocks_flatten_into_params() {
    let registry = BlockRegistry::standard();
    let wf = Serializer::new(&registry)
        .serialize_workflow(&state(
            vec![
                starter(),
                BlockRecord::new("writer", "agent", "Writer")
                    .with_value("model", "claude-3-7-sonnet")
                    .with_value("systemPrompt", "Be brief"),
            ],
            vec![Edge::new("start", "writer")],
        ))
        .unwrap();

    let writer = wf.find_block("writer").unwrap();
    assert_eq!(writer.block_type(), BlockType::Agent);
    assert_eq!(writer.name(), "Writer");
    assert_eq!(writer.param("systemPrompt"), Some(&json!("Be brief")));
    assert_eq!(writer.config.tool.as_deref(), Some("anthropic"));
    assert_eq!(writer.inputs.get("temperature"), Some(&ParamType::Number));
    assert_eq!(wf.connections.len(), 1);
}

#[test]
fn test_explicit_provider_wins_over_model_inference() {
    let registry = BlockRegistry::standard();
    let wf = Serializer::new(&registry)
        .serialize_workflow(&state(
            vec![
                starter(),
                BlockRecord::new("writer", "agent", "Writer")
                    .with_value("model", "gpt-4o")
                    .with_value("provider", "azure-openai"),
            ],
            vec![],
        ))
        .unwrap();
    assert_eq!(
        wf.find_block("writer").unwrap().config.tool.as_deref(),
        Some("azure-openai")
    );
}

#[test]
fn test_unknown_block_type_rejected() {
    let registry = BlockRegistry::standard();
    let err = Serializer::new(&registry)
        .serialize_workflow(&state(
            vec![starter(), BlockRecord::new("x", "teleporter", "X")],
            vec![],
        ))
        .unwrap_err();
    assert_eq!(err, ConfigurationError::UnknownBlockType("teleporter".into()));
}

#[test]
fn test_edge_to_missing_block_rejected() {
    let registry = BlockRegistry::standard();
    let err = Serializer::new(&registry)
        .serialize_workflow(&state(vec![starter()], vec![Edge::new("start", "ghost")]))
        .unwrap_err();
    assert_eq!(err, ConfigurationError::UnknownConnectionEndpoint("ghost".into()));
}

#[test]
fn test_dangling_container_node_rejected() {
    let registry = BlockRegistry::standard();
    let mut workflow_state = state(vec![starter(), BlockRecord::new("loop1", "loop", "Loop")], vec![]);
    workflow_state.loops.insert(
        "loop1".into(),
        LoopRecord {
            id: "loop1".into(),
            nodes: vec!["missing".into()],
            iterations: 2,
            loop_type: LoopType::For,
            for_each_items: None,
            while_condition: None,
        },
    );

    let err = Serializer::new(&registry)
        .serialize_workflow(&workflow_state)
        .unwrap_err();
    assert!(matches!(err, ConfigurationError::DanglingContainerNode { ref node, .. } if node == "missing"));
}

#[test]
fn test_cycle_rejected() {
    let registry = BlockRegistry::standard();
    let err = Serializer::new(&registry)
        .serialize_workflow(&state(
            vec![
                starter(),
                BlockRecord::new("a", "function", "A"),
                BlockRecord::new("b", "function", "B"),
            ],
            vec![Edge::new("start", "a"), Edge::new("a", "b"), Edge::new("b", "a")],
        ))
        .unwrap_err();
    assert!(matches!(err, ConfigurationError::CyclicGraph(_)), "got {:?}", err);
}

#[test]
fn test_containers_derived_from_parent_ids() {
    let registry = BlockRegistry::standard();
    let mut loop_block = BlockRecord::new("loop1", "loop", "Loop");
    loop_block.data = BlockData {
        count: Some(4),
        loop_type: Some(LoopType::ForEach),
        collection: Some(json!(["a", "b"])),
        ..BlockData::default()
    };
    let mut fanout = BlockRecord::new("p1", "parallel", "Fanout");
    fanout.data.collection = Some(json!("<start.items>"));

    let wf = Serializer::new(&registry)
        .serialize_workflow(&state(
            vec![
                starter(),
                loop_block,
                BlockRecord::new("body", "function", "Body").with_parent("loop1"),
                fanout,
                BlockRecord::new("branch", "function", "Branch").with_parent("p1"),
            ],
            vec![
                Edge::new("start", "loop1"),
                Edge::new("loop1", "body").with_source_handle(LOOP_START_HANDLE),
            ],
        ))
        .unwrap();

    let def = &wf.loops["loop1"];
    assert_eq!(def.nodes, vec!["body"]);
    assert_eq!(def.iterations, 4);
    assert_eq!(def.loop_type, LoopType::ForEach);
    assert_eq!(def.for_each_items, Some(json!(["a", "b"])));

    let par = &wf.parallels["p1"];
    assert_eq!(par.nodes, vec!["branch"]);
    assert_eq!(par.parallel_type, ParallelType::Collection);
    assert_eq!(wf.container_of("branch"), Some("p1"));
}

#[test]
fn test_blocks_are_ordered_by_id() {
    let registry = BlockRegistry::standard();
    let wf = Serializer::new(&registry)
        .serialize_workflow(&state(
            vec![
                BlockRecord::new("zeta", "function", "Z"),
                starter(),
                BlockRecord::new("alpha", "function", "A"),
            ],
            vec![],
        ))
        .unwrap();
    let ids: Vec<&str> = wf.blocks.iter().map(|b| b.id.as_str()).collect();
    assert_eq!(ids, vec!["alpha", "start", "zeta"]);
}

fn stored_workflow() -> WorkflowRecord {
    WorkflowRecord {
        id: "greeter".into(),
        name: "Greeter".into(),
        description: Some("Says hello".into()),
        state: state(
            vec![
                starter(),
                BlockRecord::new("greet", "agent", "Greet")
                    .with_value("model", "gpt-4o")
                    .with_value("context", "Hello <start.name>"),
            ],
            vec![Edge::new("start", "greet")],
        ),
    }
}

#[tokio::test]
async fn test_runtime_executes_stored_workflow() {
    let provider = Arc::new(MockProvider::new().on("Hello Ada", "Hi Ada!"));
    let runtime = AgentRuntime::new(
        provider.clone(),
        Arc::new(MockTools::new()),
        Arc::new(MockLoader::new().with_workflow(stored_workflow())),
    );
    let mut events = runtime.subscribe_events();

    let result = runtime
        .execute_workflow("greeter", ExecutionRequest::new("run-1").with_input(json!({"name": "Ada"})))
        .await
        .unwrap();

    assert!(result.success, "run failed: {:?}", result.error);
    assert_eq!(result.output["content"], json!("Hi Ada!"));
    assert_eq!(result.metadata.workflow_id.as_deref(), Some("greeter"));
    assert_eq!(result.metadata.execution_id, "run-1");

    let first = events.try_recv().unwrap();
    assert!(matches!(first, agentcore::ExecutionEvent::WorkflowStarted { .. }));
}

#[tokio::test]
async fn test_runtime_reports_missing_workflow() {
    let runtime = AgentRuntime::new(
        Arc::new(MockProvider::new()),
        Arc::new(MockTools::new()),
        Arc::new(MockLoader::new()),
    );
    let err = runtime
        .execute_workflow("nope", ExecutionRequest::generate())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Workflow nope not found"));
}
