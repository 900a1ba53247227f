use actix_cors::Cors;
use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult};
use actix_ws::Message;
use agentcore::{FlowError, WorkflowRecord, WorkflowState};
use agentruntime::{AgentRuntime, ExecutionRequest, RuntimeConfig, Serializer};
use agenttools::{InMemoryWorkflowStore, StandardTools, UnconfiguredProvider};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Application state shared across handlers
struct AppState {
    runtime: Arc<AgentRuntime>,
    store: Arc<InMemoryWorkflowStore>,
    /// When each stored workflow was last created or replaced.
    deployments: RwLock<HashMap<String, DateTime<Utc>>>,
    /// Latest execution per workflow id.
    executions: RwLock<HashMap<String, ExecutionStatus>>,
}

impl AppState {
    fn new(runtime: AgentRuntime, store: Arc<InMemoryWorkflowStore>) -> Self {
        Self {
            runtime: Arc::new(runtime),
            store,
            deployments: RwLock::new(HashMap::new()),
            executions: RwLock::new(HashMap::new()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateWorkflowRequest {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    description: Option<String>,
    state: WorkflowState,
}

/// Wrapped execution body, used with `?wrapped=true`. Without the flag the
/// whole body is the workflow input.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteRequest {
    #[serde(default)]
    input: serde_json::Value,
    #[serde(default)]
    environment_variables: HashMap<String, String>,
    #[serde(default)]
    workflow_variables: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ExecuteQuery {
    #[serde(default)]
    wrapped: bool,
}

/// Reads an execute body either as the raw workflow input or, when
/// `wrapped`, as an `ExecuteRequest`. A missing body is an empty input.
fn parse_execute_body(body: Option<serde_json::Value>, wrapped: bool) -> Result<ExecuteRequest, String> {
    let body = body.unwrap_or(serde_json::Value::Null);
    let mut request = if wrapped {
        match body {
            serde_json::Value::Null => ExecuteRequest::default(),
            other => serde_json::from_value(other).map_err(|e| format!("Invalid execute request: {}", e))?,
        }
    } else {
        ExecuteRequest {
            input: body,
            ..ExecuteRequest::default()
        }
    };
    if request.input.is_null() {
        request.input = serde_json::json!({});
    }
    Ok(request)
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum RunState {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionStatus {
    execution_id: String,
    status: RunState,
    started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Deployment status in the shape SDK clients expect. Stored workflows are
/// live as soon as they are saved, so there is never a pending redeploy.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowStatus {
    is_deployed: bool,
    deployed_at: Option<DateTime<Utc>>,
    is_published: bool,
    needs_redeployment: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_execution: Option<ExecutionStatus>,
}

/// Response for workflow creation
#[derive(Debug, Serialize)]
struct WorkflowResponse {
    id: String,
    message: String,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn not_found(workflow_id: &str) -> HttpResponse {
    HttpResponse::NotFound().json(ErrorResponse {
        error: format!("Workflow {} not found", workflow_id),
    })
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "agentflow"
    }))
}

/// List all workflows
#[get("/api/workflows")]
async fn list_workflows(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let workflow_list: Vec<_> = data
        .store
        .list()
        .await
        .iter()
        .map(|w| {
            serde_json::json!({
                "id": w.id,
                "name": w.name,
                "description": w.description,
                "blocks": w.state.blocks.len(),
                "edges": w.state.edges.len(),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(workflow_list))
}

/// Create or replace a workflow. The state is serialized up front so broken
/// graphs are rejected here rather than at execution time.
#[post("/api/workflows")]
async fn create_workflow(
    data: web::Data<AppState>,
    body: web::Json<CreateWorkflowRequest>,
) -> ActixResult<impl Responder> {
    let body = body.into_inner();
    if let Err(e) = Serializer::new(data.runtime.registry()).serialize_workflow(&body.state) {
        warn!("Rejected workflow {}: {}", body.name, e);
        return Ok(HttpResponse::BadRequest().json(ErrorResponse {
            error: e.to_string(),
        }));
    }

    let record = WorkflowRecord {
        id: body.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        name: body.name,
        description: body.description,
        state: body.state,
    };
    let workflow_id = record.id.clone();

    info!("Creating workflow: {} ({})", record.name, workflow_id);
    let replaced = data.store.insert(record).await.is_some();
    data.deployments.write().await.insert(workflow_id.clone(), Utc::now());

    Ok(HttpResponse::Created().json(WorkflowResponse {
        id: workflow_id,
        message: if replaced {
            "Workflow updated successfully".to_string()
        } else {
            "Workflow created successfully".to_string()
        },
    }))
}

/// Get a specific workflow
#[get("/api/workflows/{id}")]
async fn get_workflow(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();
    match data.store.get(&workflow_id).await {
        Some(workflow) => Ok(HttpResponse::Ok().json(workflow)),
        None => Ok(not_found(&workflow_id)),
    }
}

/// Delete a workflow
#[actix_web::delete("/api/workflows/{id}")]
async fn delete_workflow(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();
    match data.store.remove(&workflow_id).await {
        Some(_) => {
            data.deployments.write().await.remove(&workflow_id);
            data.executions.write().await.remove(&workflow_id);
            info!("Deleted workflow: {}", workflow_id);
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "message": "Workflow deleted successfully"
            })))
        }
        None => Ok(not_found(&workflow_id)),
    }
}

/// Execute a workflow and return its `ExecutionResult`
#[post("/api/workflows/{id}/execute")]
async fn execute_workflow(
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ExecuteQuery>,
    body: Option<web::Json<serde_json::Value>>,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();
    if data.store.get(&workflow_id).await.is_none() {
        return Ok(not_found(&workflow_id));
    }
    let body = match parse_execute_body(body.map(web::Json::into_inner), query.wrapped) {
        Ok(body) => body,
        Err(error) => return Ok(HttpResponse::BadRequest().json(ErrorResponse { error })),
    };

    let execution_id = Uuid::new_v4().to_string();
    let request = ExecutionRequest::new(execution_id.clone())
        .with_input(body.input)
        .with_environment(body.environment_variables)
        .with_variables(body.workflow_variables);

    info!("Executing workflow: {} ({})", workflow_id, execution_id);
    let started_at = Utc::now();
    data.executions.write().await.insert(
        workflow_id.clone(),
        ExecutionStatus {
            execution_id: execution_id.clone(),
            status: RunState::Running,
            started_at,
            finished_at: None,
            error: None,
        },
    );

    let outcome = data.runtime.execute_workflow(&workflow_id, request).await;

    let (status, error_message) = match &outcome {
        Ok(result) if result.success => (RunState::Completed, None),
        Ok(result) => (RunState::Failed, result.error.clone()),
        Err(e) => (RunState::Failed, Some(e.to_string())),
    };
    data.executions.write().await.insert(
        workflow_id.clone(),
        ExecutionStatus {
            execution_id,
            status,
            started_at,
            finished_at: Some(Utc::now()),
            error: error_message,
        },
    );

    match outcome {
        Ok(result) => {
            info!(
                "Workflow {} finished: success={} in {}ms",
                workflow_id, result.success, result.metadata.duration_ms
            );
            Ok(HttpResponse::Ok().json(result))
        }
        Err(e @ FlowError::Configuration(_)) => {
            warn!("Workflow {} is invalid: {}", workflow_id, e);
            Ok(HttpResponse::BadRequest().json(ErrorResponse {
                error: e.to_string(),
            }))
        }
        Err(e) => {
            error!("Workflow {} execution failed: {}", workflow_id, e);
            Ok(HttpResponse::InternalServerError().json(ErrorResponse {
                error: e.to_string(),
            }))
        }
    }
}

/// Deployment status of a workflow, plus its most recent execution
#[get("/api/workflows/{id}/status")]
async fn workflow_status(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();
    if data.store.get(&workflow_id).await.is_none() {
        return Ok(not_found(&workflow_id));
    }
    let deployed_at = data.deployments.read().await.get(&workflow_id).copied();
    Ok(HttpResponse::Ok().json(WorkflowStatus {
        is_deployed: true,
        deployed_at,
        is_published: false,
        needs_redeployment: false,
        last_execution: data.executions.read().await.get(&workflow_id).cloned(),
    }))
}

/// WebSocket endpoint for real-time events
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");

    let mut events = data.runtime.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("WebSocket client lagged, dropped {} events", skipped);
                        }
                        Err(_) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

/// List available block types
#[get("/api/blocks")]
async fn list_block_types(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = data.runtime.registry();
    let blocks: Vec<_> = registry
        .list_block_types()
        .iter()
        .filter_map(|block_type| registry.get(block_type).ok())
        .map(|spec| {
            let params = |defs: &[agentruntime::ParamDefinition]| {
                defs.iter()
                    .map(|p| {
                        serde_json::json!({
                            "name": p.name,
                            "type": p.ty,
                            "required": p.required,
                            "description": p.description,
                        })
                    })
                    .collect::<Vec<_>>()
            };
            serde_json::json!({
                "type": spec.block_type,
                "description": spec.description,
                "category": spec.category,
                "tool": spec.tool,
                "usesProvider": spec.uses_provider,
                "inputs": params(&spec.inputs),
                "outputs": params(&spec.outputs),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(blocks))
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(list_workflows)
        .service(create_workflow)
        .service(get_workflow)
        .service(delete_workflow)
        .service(execute_workflow)
        .service(workflow_status)
        .service(websocket_events)
        .service(list_block_types);
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 Starting agentflow server");

    let store = Arc::new(InMemoryWorkflowStore::new());
    let config = RuntimeConfig::from_env();
    info!(
        "Runtime config: max_parallel={} max_layers={} timeout={:?}",
        config.max_parallel_blocks, config.max_layers, config.block_timeout_ms
    );
    let runtime = AgentRuntime::with_config(
        Arc::new(UnconfiguredProvider),
        Arc::new(StandardTools::from_env()),
        store.clone(),
        config,
    );

    info!("✅ Runtime initialized with {} block types", runtime.registry().list_block_types().len());

    let app_state = web::Data::new(AppState::new(runtime, store));

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("🌐 Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .configure(routes)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test as actix_test;
    use agentcore::{BlockRecord, Edge};
    use serde_json::json;

    fn echo_state() -> WorkflowState {
        WorkflowState {
            blocks: [
                BlockRecord::new("start", "starter", "Start"),
                BlockRecord::new("respond", "response", "Respond").with_value("data", "<start.name>"),
            ]
            .into_iter()
            .map(|b| (b.id.clone(), b))
            .collect(),
            edges: vec![Edge::new("start", "respond")],
            ..WorkflowState::default()
        }
    }

    fn app_state() -> web::Data<AppState> {
        let store = Arc::new(InMemoryWorkflowStore::new());
        let runtime = AgentRuntime::new(
            Arc::new(UnconfiguredProvider),
            Arc::new(StandardTools::new()),
            store.clone(),
        );
        web::Data::new(AppState::new(runtime, store))
    }

    #[test]
    fn raw_body_is_the_input() {
        let body = parse_execute_body(Some(json!({"input": "x", "name": "Ada"})), false).unwrap();
        assert_eq!(body.input, json!({"input": "x", "name": "Ada"}));
        assert!(body.environment_variables.is_empty());
    }

    #[test]
    fn wrapped_body_is_unwrapped() {
        let body = parse_execute_body(
            Some(json!({"input": {"name": "Ada"}, "environmentVariables": {"KEY": "v"}})),
            true,
        )
        .unwrap();
        assert_eq!(body.input, json!({"name": "Ada"}));
        assert_eq!(body.environment_variables.get("KEY").map(String::as_str), Some("v"));
    }

    #[test]
    fn missing_body_is_empty_input() {
        assert_eq!(parse_execute_body(None, false).unwrap().input, json!({}));
        assert_eq!(parse_execute_body(None, true).unwrap().input, json!({}));
        assert!(parse_execute_body(Some(json!([1])), true).is_err());
    }

    #[actix_web::test]
    async fn test_execute_accepts_raw_and_wrapped_bodies() {
        let app = actix_test::init_service(App::new().app_data(app_state()).configure(routes)).await;

        let create = actix_test::TestRequest::post()
            .uri("/api/workflows")
            .set_json(json!({"id": "echo", "name": "Echo", "state": echo_state()}))
            .to_request();
        assert!(actix_test::call_service(&app, create).await.status().is_success());

        let raw = actix_test::TestRequest::post()
            .uri("/api/workflows/echo/execute")
            .set_json(json!({"name": "Ada"}))
            .to_request();
        let result: serde_json::Value = actix_test::call_and_read_body_json(&app, raw).await;
        assert_eq!(result["success"], json!(true), "got: {}", result);
        assert_eq!(result["output"]["data"], json!("Ada"));

        let wrapped = actix_test::TestRequest::post()
            .uri("/api/workflows/echo/execute?wrapped=true")
            .set_json(json!({"input": {"name": "Bo"}}))
            .to_request();
        let result: serde_json::Value = actix_test::call_and_read_body_json(&app, wrapped).await;
        assert_eq!(result["output"]["data"], json!("Bo"));
    }

    #[actix_web::test]
    async fn test_status_reports_deployment() {
        let app = actix_test::init_service(App::new().app_data(app_state()).configure(routes)).await;

        let missing = actix_test::TestRequest::get().uri("/api/workflows/echo/status").to_request();
        assert_eq!(actix_test::call_service(&app, missing).await.status(), 404);

        let create = actix_test::TestRequest::post()
            .uri("/api/workflows")
            .set_json(json!({"id": "echo", "name": "Echo", "state": echo_state()}))
            .to_request();
        actix_test::call_service(&app, create).await;

        let status = actix_test::TestRequest::get().uri("/api/workflows/echo/status").to_request();
        let status: serde_json::Value = actix_test::call_and_read_body_json(&app, status).await;
        assert_eq!(status["isDeployed"], json!(true));
        assert!(status["deployedAt"].is_string(), "got: {}", status);
        assert_eq!(status["isPublished"], json!(false));
        assert_eq!(status["needsRedeployment"], json!(false));
        assert!(status.get("lastExecution").is_none(), "never run yet");
    }
}
