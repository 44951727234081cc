//! HTTP facade: sync, async (task-id polling), and SSE streaming entry
//! points over the deliberation engine, plus the studio surface.
//!
//! Built directly on hyper 1.x with a `service_fn` router. Status
//! conventions: 400 invalid request, 404 unknown entity, 409 state
//! conflict, 429 budget exhausted, 500 internal, 504 deadline exceeded.

pub mod types;

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use deliberation::{
    AgentId, FailureReason, PromptStore, PromptType, Session, SessionSettings, SessionStatus,
    SharedEventBus, SharedSessionStore, StoreError, TaskType,
};

use crate::config::EngineConfig;
use crate::engine::{DeliberationEngine, EngineError};
use crate::providers::ProviderRegistry;
use crate::studio::{aggregate_metrics, ExperimentStatus, ExperimentStore, MetricsPeriod};

use types::*;

type ApiBody = BoxBody<Bytes, Infallible>;

/// Shared state handed to every request handler.
pub struct AppState {
    pub config: EngineConfig,
    pub store: SharedSessionStore,
    pub prompts: Arc<PromptStore>,
    pub registry: Arc<ProviderRegistry>,
    pub engine: Arc<DeliberationEngine>,
    pub bus: SharedEventBus,
    pub experiments: Arc<ExperimentStore>,
    /// Cancellation tokens for in-flight sessions.
    pub running: tokio::sync::RwLock<HashMap<String, CancellationToken>>,
}

impl AppState {
    /// Register a session run and return its cancellation token.
    async fn register(&self, session_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.running
            .write()
            .await
            .insert(session_id.to_string(), token.clone());
        token
    }

    async fn deregister(&self, session_id: &str) {
        self.running.write().await.remove(session_id);
    }
}

/// The HTTP server: accept loop with broadcast shutdown.
pub struct ApiServer {
    state: Arc<AppState>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    pub fn new(state: Arc<AppState>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);
        Self { state, shutdown_tx }
    }

    /// Trigger a graceful shutdown: stop accepting and cancel running
    /// sessions.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        for (session_id, token) in self.state.running.read().await.iter() {
            tracing::info!(session = %session_id, "cancelling session for shutdown");
            token.cancel();
        }
    }

    /// Bind and serve until shutdown.
    pub async fn serve(&self, port: u16) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "conclave server listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::error!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    tracing::debug!(%peer, "connection accepted");
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let service = service_fn(move |req| route(req, state.clone()));
                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            tracing::debug!(error = %e, "connection error");
                        }
                    });
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("shutdown signal received, stopping accept loop");
                    break;
                }
            }
        }
        Ok(())
    }
}

fn full(bytes: impl Into<Bytes>) -> ApiBody {
    Full::new(bytes.into()).boxed()
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<ApiBody> {
    let body = serde_json::to_vec(value).unwrap_or_default();
    let mut response = Response::new(full(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        "application/json".parse().expect("static header"),
    );
    response
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response<ApiBody> {
    json_response(
        status,
        &ErrorBody {
            error: message.into(),
        },
    )
}

async fn read_json<T: DeserializeOwned>(
    req: Request<hyper::body::Incoming>,
) -> Result<T, Response<ApiBody>> {
    let bytes = req
        .into_body()
        .collect()
        .await
        .map(|b| b.to_bytes())
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, format!("body read: {}", e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, format!("invalid json: {}", e)))
}

/// Minimal query-string parser (no percent-decoding beyond `+`).
fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some(query) = query {
        for pair in query.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                params.insert(key.to_string(), value.replace('+', " "));
            }
        }
    }
    params
}

/// Top-level router.
async fn route(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Result<Response<ApiBody>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    tracing::debug!(%method, %path, "request");

    let response = match (method.as_str(), path.as_str()) {
        ("GET", "/health") => health(&state).await,
        ("GET", "/agents") => agents(&state),
        ("POST", "/analyze") => analyze_sync(req, &state).await,
        ("POST", "/analyze/async") => analyze_async(req, &state).await,
        ("GET", "/analyze/stream") => analyze_stream(req, &state).await,
        ("GET", "/studio/prompts") => list_prompts(&state),
        ("POST", "/studio/prompts") => upsert_prompt(req, &state).await,
        ("PUT", "/studio/prompts") => activate_prompt(req, &state).await,
        ("GET", "/studio/experiments") => list_experiments(&state),
        ("POST", "/studio/experiments") => create_experiment(req, &state).await,
        ("GET", "/studio/metrics") => metrics(req, &state),
        (method, path) => {
            if let Some(task_id) = path.strip_prefix("/tasks/") {
                let task_id = task_id.to_string();
                match method {
                    "GET" => task_status(&task_id, &state),
                    "DELETE" => cancel_task(&task_id, &state).await,
                    _ => error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
                }
            } else if let Some(rest) = path.strip_prefix("/studio/experiments/") {
                let id = rest.to_string();
                match method {
                    "GET" => experiment_detail(&id, &state),
                    "PUT" => update_experiment(id, req, &state).await,
                    "DELETE" => delete_experiment(&id, &state),
                    _ => error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
                }
            } else {
                error_response(StatusCode::NOT_FOUND, format!("no route for {}", path))
            }
        }
    };
    Ok(response)
}

// ── Core endpoints ───────────────────────────────────────────────────

async fn health(state: &Arc<AppState>) -> Response<ApiBody> {
    let providers = state.registry.provider_health().await;
    let response = HealthResponse {
        status: "ok",
        agents: state
            .registry
            .agent_infos(&SessionSettings::default().enabled_agents),
        providers,
        source: state.store.source(),
        active_sessions: state.running.read().await.len(),
    };
    json_response(StatusCode::OK, &response)
}

fn agents(state: &Arc<AppState>) -> Response<ApiBody> {
    let infos = state
        .registry
        .agent_infos(&SessionSettings::default().enabled_agents);
    json_response(StatusCode::OK, &infos)
}

fn create_session(
    state: &Arc<AppState>,
    task: String,
    task_type: TaskType,
    context: Option<String>,
    settings: SessionSettings,
) -> Result<Session, Response<ApiBody>> {
    let mut session = Session::new(&task, task_type, settings);
    if let Some(context) = context {
        session = session.with_context(&context);
    }
    state
        .store
        .create_session(&session)
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(session)
}

/// Status code for a terminal result's error block.
fn status_for_result(result: &deliberation::FinalResult) -> StatusCode {
    match result.error.as_ref().map(|e| e.reason) {
        None => StatusCode::OK,
        Some(FailureReason::BudgetExhausted) => StatusCode::TOO_MANY_REQUESTS,
        Some(FailureReason::DeadlineExceeded) => StatusCode::GATEWAY_TIMEOUT,
        Some(FailureReason::Cancelled) => StatusCode::OK,
        Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn status_for_engine_error(err: &EngineError) -> StatusCode {
    match err {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::AlreadyRunning(_) => StatusCode::CONFLICT,
        EngineError::InvalidSettings(_) => StatusCode::BAD_REQUEST,
        EngineError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
        EngineError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
        EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn analyze_sync(
    req: Request<hyper::body::Incoming>,
    state: &Arc<AppState>,
) -> Response<ApiBody> {
    let request: AnalyzeRequest = match read_json(req).await {
        Ok(request) => request,
        Err(response) => return response,
    };
    let (task, task_type, context, settings) = match request.resolve() {
        Ok(resolved) => resolved,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    let session = match create_session(state, task, task_type, context, settings) {
        Ok(session) => session,
        Err(response) => return response,
    };

    let token = state.register(&session.id).await;
    let result = state.engine.run(&session.id, token).await;
    state.deregister(&session.id).await;

    match result {
        Ok(final_result) => json_response(status_for_result(&final_result), &final_result),
        Err(e) => error_response(status_for_engine_error(&e), e.to_string()),
    }
}

async fn analyze_async(
    req: Request<hyper::body::Incoming>,
    state: &Arc<AppState>,
) -> Response<ApiBody> {
    let request: AnalyzeRequest = match read_json(req).await {
        Ok(request) => request,
        Err(response) => return response,
    };
    let (task, task_type, context, settings) = match request.resolve() {
        Ok(resolved) => resolved,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    let session = match create_session(state, task, task_type, context, settings) {
        Ok(session) => session,
        Err(response) => return response,
    };

    spawn_session(state, &session.id).await;

    json_response(
        StatusCode::ACCEPTED,
        &TaskSubmitted {
            task_id: session.id,
            status: SessionStatus::Pending,
        },
    )
}

/// Run a session on a background task, deregistering when it finishes.
async fn spawn_session(state: &Arc<AppState>, session_id: &str) {
    let token = state.register(session_id).await;
    let state_clone = state.clone();
    let session_id = session_id.to_string();
    tokio::spawn(async move {
        if let Err(e) = state_clone.engine.run(&session_id, token).await {
            tracing::error!(session = %session_id, error = %e, "background run failed to start");
        }
        state_clone.deregister(&session_id).await;
    });
}

fn task_status(task_id: &str, state: &Arc<AppState>) -> Response<ApiBody> {
    let session = match state.store.load_session(task_id) {
        Ok(session) => session,
        Err(StoreError::NotFound(_)) => {
            return error_response(StatusCode::NOT_FOUND, format!("task {} not found", task_id))
        }
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let result = state.store.load_final(task_id).ok().flatten();
    let error = result
        .as_ref()
        .and_then(|r| r.error.as_ref())
        .map(|e| format!("{}: {}", e.reason, e.message));
    let progress = if session.status == SessionStatus::Running {
        Some(TaskProgress {
            analyses_recorded: state
                .store
                .list_analyses(task_id)
                .map(|a| a.len())
                .unwrap_or(0),
            critiques_recorded: state
                .store
                .list_critiques(task_id)
                .map(|c| c.len())
                .unwrap_or(0),
            iterations_completed: state
                .store
                .list_syntheses(task_id)
                .map(|s| s.len())
                .unwrap_or(0),
        })
    } else {
        None
    };

    json_response(
        StatusCode::OK,
        &TaskStatusResponse {
            status: session.status,
            progress,
            result,
            error,
            source: state.store.source(),
        },
    )
}

async fn cancel_task(task_id: &str, state: &Arc<AppState>) -> Response<ApiBody> {
    match state.store.load_session(task_id) {
        Ok(session) if session.status.is_terminal() => {
            return error_response(
                StatusCode::CONFLICT,
                format!("task {} already {}", task_id, session.status),
            )
        }
        Ok(_) => {}
        Err(StoreError::NotFound(_)) => {
            return error_response(StatusCode::NOT_FOUND, format!("task {} not found", task_id))
        }
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }

    match state.running.read().await.get(task_id) {
        Some(token) => {
            token.cancel();
            json_response(
                StatusCode::ACCEPTED,
                &serde_json::json!({"task_id": task_id, "status": "cancelling"}),
            )
        }
        None => error_response(
            StatusCode::CONFLICT,
            format!("task {} is not running", task_id),
        ),
    }
}

async fn analyze_stream(
    req: Request<hyper::body::Incoming>,
    state: &Arc<AppState>,
) -> Response<ApiBody> {
    let params = parse_query(req.uri().query());
    let task = match params.get("task") {
        Some(task) if !task.trim().is_empty() => task.clone(),
        _ => return error_response(StatusCode::BAD_REQUEST, "missing 'task' query parameter"),
    };
    let request = AnalyzeRequest {
        task,
        task_type: params.get("task_type").cloned(),
        context: params.get("context").cloned(),
        enabled_agents: None,
        models: None,
        temperature: None,
        max_iterations: params.get("max_iterations").and_then(|v| v.parse().ok()),
        consensus_threshold: params
            .get("consensus_threshold")
            .and_then(|v| v.parse().ok()),
        budget_usd: params.get("budget_usd").and_then(|v| v.parse().ok()),
    };
    let (task, task_type, context, settings) = match request.resolve() {
        Ok(resolved) => resolved,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    let session = match create_session(state, task, task_type, context, settings) {
        Ok(session) => session,
        Err(response) => return response,
    };

    // Subscribe before the run starts so no lifecycle event is missed.
    let receiver = state.bus.subscribe_session(&session.id);
    spawn_session(state, &session.id).await;

    let stream = futures::stream::unfold((receiver, false), |(mut receiver, done)| async move {
        if done {
            return None;
        }
        match receiver.recv().await {
            Some(event) => {
                let terminal = event.is_terminal();
                let json = serde_json::to_string(&event).unwrap_or_default();
                let frame = Frame::data(Bytes::from(format!("data: {}\n\n", json)));
                Some((Ok::<_, Infallible>(frame), (receiver, terminal)))
            }
            None => None,
        }
    });

    let mut response = Response::new(BodyExt::boxed(StreamBody::new(stream)));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        "text/event-stream".parse().expect("static header"),
    );
    response.headers_mut().insert(
        hyper::header::CACHE_CONTROL,
        "no-cache".parse().expect("static header"),
    );
    response
}

// ── Studio endpoints ─────────────────────────────────────────────────

fn list_prompts(state: &Arc<AppState>) -> Response<ApiBody> {
    json_response(
        StatusCode::OK,
        &PromptListResponse {
            templates: state.prompts.list(),
        },
    )
}

fn parse_prompt_key(agent: &str, prompt_type: &str) -> Result<(AgentId, PromptType), String> {
    let agent = AgentId::parse(agent).ok_or_else(|| format!("unknown agent '{}'", agent))?;
    let prompt_type = PromptType::parse(prompt_type)
        .ok_or_else(|| format!("unknown prompt_type '{}'", prompt_type))?;
    Ok((agent, prompt_type))
}

async fn upsert_prompt(
    req: Request<hyper::body::Incoming>,
    state: &Arc<AppState>,
) -> Response<ApiBody> {
    let request: PromptUpsertRequest = match read_json(req).await {
        Ok(request) => request,
        Err(response) => return response,
    };
    let (agent, prompt_type) = match parse_prompt_key(&request.agent, &request.prompt_type) {
        Ok(key) => key,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    match state.prompts.upsert(agent, prompt_type, &request.content) {
        Ok(template) => json_response(StatusCode::CREATED, &template),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e),
    }
}

async fn activate_prompt(
    req: Request<hyper::body::Incoming>,
    state: &Arc<AppState>,
) -> Response<ApiBody> {
    let request: PromptActivateRequest = match read_json(req).await {
        Ok(request) => request,
        Err(response) => return response,
    };
    let (agent, prompt_type) = match parse_prompt_key(&request.agent, &request.prompt_type) {
        Ok(key) => key,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    match state.prompts.activate(agent, prompt_type, request.version) {
        Ok(()) => json_response(StatusCode::OK, &serde_json::json!({"status": "activated"})),
        Err(e) => error_response(StatusCode::NOT_FOUND, e),
    }
}

fn list_experiments(state: &Arc<AppState>) -> Response<ApiBody> {
    json_response(StatusCode::OK, &state.experiments.list_experiments())
}

async fn create_experiment(
    req: Request<hyper::body::Incoming>,
    state: &Arc<AppState>,
) -> Response<ApiBody> {
    let request: CreateExperimentRequest = match read_json(req).await {
        Ok(request) => request,
        Err(response) => return response,
    };
    let (agent, prompt_type) = match parse_prompt_key(&request.agent, &request.prompt_type) {
        Ok(key) => key,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    let experiment =
        state
            .experiments
            .create_experiment(&request.name, &request.description, agent, prompt_type);
    for variant in &request.variants {
        if let Err(e) = state
            .experiments
            .add_variant(&experiment.id, &variant.label, &variant.content)
        {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e);
        }
    }
    json_response(StatusCode::CREATED, &experiment)
}

fn experiment_detail(id: &str, state: &Arc<AppState>) -> Response<ApiBody> {
    match state.experiments.get_experiment(id) {
        Some(experiment) => {
            let variants = state.experiments.variants_of(id);
            let winner = state.experiments.winner(id);
            json_response(
                StatusCode::OK,
                &serde_json::json!({
                    "experiment": experiment,
                    "variants": variants,
                    "winner": winner,
                }),
            )
        }
        None => error_response(StatusCode::NOT_FOUND, format!("experiment {} not found", id)),
    }
}

async fn update_experiment(
    id: String,
    req: Request<hyper::body::Incoming>,
    state: &Arc<AppState>,
) -> Response<ApiBody> {
    let request: UpdateExperimentRequest = match read_json(req).await {
        Ok(request) => request,
        Err(response) => return response,
    };
    let status = match request.status.as_str() {
        "draft" => ExperimentStatus::Draft,
        "running" => ExperimentStatus::Running,
        "completed" => ExperimentStatus::Completed,
        "stopped" => ExperimentStatus::Stopped,
        other => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("unknown status '{}'", other),
            )
        }
    };
    match state.experiments.set_status(&id, status) {
        Ok(experiment) => json_response(StatusCode::OK, &experiment),
        Err(e) => error_response(StatusCode::NOT_FOUND, e),
    }
}

fn delete_experiment(id: &str, state: &Arc<AppState>) -> Response<ApiBody> {
    match state.experiments.delete_experiment(id) {
        Ok(()) => json_response(StatusCode::OK, &serde_json::json!({"status": "deleted"})),
        Err(e) => error_response(StatusCode::NOT_FOUND, e),
    }
}

fn metrics(req: Request<hyper::body::Incoming>, state: &Arc<AppState>) -> Response<ApiBody> {
    let params = parse_query(req.uri().query());
    let period = match params.get("period").map(|s| s.as_str()) {
        None => MetricsPeriod::Day,
        Some(s) => match MetricsPeriod::parse(s) {
            Some(period) => period,
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("unknown period '{}' (expected 1h|24h|7d|30d)", s),
                )
            }
        },
    };
    match state.store.list_all_metrics() {
        Ok(all) => json_response(StatusCode::OK, &aggregate_metrics(&all, period)),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query() {
        let params = parse_query(Some("task=evaluate+saas&task_type=strategy"));
        assert_eq!(params["task"], "evaluate saas");
        assert_eq!(params["task_type"], "strategy");
        assert!(parse_query(None).is_empty());
    }

    #[test]
    fn test_status_for_result_mapping() {
        use deliberation::{AggregateMetrics, FinalResult, TerminationError};

        let ok = FinalResult {
            session_id: "s".into(),
            synthesis: None,
            analyses: vec![],
            critiques: vec![],
            metrics: AggregateMetrics::default(),
            error: None,
        };
        assert_eq!(status_for_result(&ok), StatusCode::OK);

        let budget = FinalResult {
            error: Some(TerminationError {
                reason: FailureReason::BudgetExhausted,
                message: "".into(),
            }),
            ..ok.clone()
        };
        assert_eq!(status_for_result(&budget), StatusCode::TOO_MANY_REQUESTS);

        let deadline = FinalResult {
            error: Some(TerminationError {
                reason: FailureReason::DeadlineExceeded,
                message: "".into(),
            }),
            ..ok.clone()
        };
        assert_eq!(status_for_result(&deadline), StatusCode::GATEWAY_TIMEOUT);

        let starved = FinalResult {
            error: Some(TerminationError {
                reason: FailureReason::TooFewAnalyses,
                message: "".into(),
            }),
            ..ok
        };
        assert_eq!(
            status_for_result(&starved),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_prompt_key_parsing() {
        assert!(parse_prompt_key("logical_analyst", "system").is_ok());
        assert!(parse_prompt_key("oracle", "system").is_err());
        assert!(parse_prompt_key("logical_analyst", "sonnet").is_err());
    }
}
