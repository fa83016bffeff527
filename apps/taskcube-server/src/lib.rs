//! HTTP façade for TaskCube.
//!
//! Routes live under `/taskcube/api/v1`; request and response bodies are the
//! record documents themselves, errors map to `{code, message}` with the
//! matching HTTP status.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use taskcube_api::{ApiError, ErrorCode, ScriptService, TaskService, TemplateService};
use taskcube_config::{LogConfig, TaskCubeConfig};
use taskcube_controller::TaskController;
use taskcube_core::store::{Page, RecordQuery, RecordStore};
use taskcube_core::types::{Script, Task, TaskTemplate};
use taskcube_host::DockerHostFactory;
use taskcube_stores::InMemoryRecordStore;

#[derive(Clone)]
pub struct AppState {
    scripts: Arc<ScriptService>,
    templates: Arc<TemplateService>,
    tasks: Arc<TaskService>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListQuery {
    name: String,
    version: String,
    status: String,
    pause: Option<bool>,
    terminate: Option<bool>,
    page: usize,
    #[serde(rename = "pageSize", alias = "page_size")]
    page_size: usize,
}

impl ListQuery {
    fn into_record_query(self) -> RecordQuery {
        RecordQuery {
            name: self.name,
            version: self.version,
            state: self.status,
            pause: self.pause,
            terminate: self.terminate,
            page: self.page,
            page_size: self.page_size,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VersionQuery {
    version: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LogsQuery {
    tail: usize,
}

#[derive(Debug, Serialize)]
struct StepLogs {
    logs: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorBody>)>;

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route(
            "/script",
            post(create_script).put(update_script).get(query_scripts),
        )
        .route("/script/{script}", delete(delete_script))
        .route(
            "/template",
            post(create_template)
                .put(update_template)
                .get(query_templates),
        )
        .route("/template/{template}", delete(delete_template))
        .route("/template/{template}/submit", post(submit_template))
        .route("/task", post(create_task).put(update_task).get(query_tasks))
        .route("/task/{task}", delete(delete_task))
        .route("/task/{task}/pause", post(pause_task))
        .route("/task/{task}/unpause", post(unpause_task))
        .route("/task/{task}/stop", post(stop_task))
        .route("/task/{task}/step/{step}/logs", get(step_logs))
        .with_state(state);

    Router::new()
        .nest("/taskcube/api/v1", api)
        .fallback(not_found)
}

/// Load configuration, start the controller loops and serve the API until
/// the first SIGINT/SIGTERM; a second signal forces exit.
pub async fn run(config_path: PathBuf) -> anyhow::Result<()> {
    let config = taskcube_config::load_config(&config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    init_tracing(&config.log);

    let (state, controller) = build_app(&config);
    let cancel = controller.cancellation_token();
    spawn_signal_handler(cancel.clone())?;
    let controller_handle = controller.spawn();

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.server.port))
        .await
        .with_context(|| format!("bind port {}", config.server.port))?;
    tracing::info!(port = config.server.port, "http server listening");
    if !config.server.external_addr.is_empty() {
        tracing::info!(addr = %config.server.external_addr, "advertised external address");
    }

    let shutdown = cancel.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("http server terminated with error")?;

    controller_handle.shutdown().await;
    tracing::info!("main exited");
    Ok(())
}

fn build_app(config: &TaskCubeConfig) -> (AppState, Arc<TaskController>) {
    // Backend validity is checked at config load; memory is the reference
    // implementation behind the RecordStore seam.
    let store = Arc::new(InMemoryRecordStore::new());
    let hosts = Arc::new(DockerHostFactory);

    let scripts = Arc::new(ScriptService::new(
        store.clone() as Arc<dyn RecordStore<Script>>
    ));
    let templates = Arc::new(TemplateService::new(
        store.clone() as Arc<dyn RecordStore<TaskTemplate>>,
        store.clone() as Arc<dyn RecordStore<Script>>,
    ));
    let tasks = Arc::new(TaskService::new(
        store.clone() as Arc<dyn RecordStore<Task>>,
        store.clone() as Arc<dyn RecordStore<Script>>,
        hosts.clone(),
        &config.controller.api_version,
    ));

    let controller = Arc::new(TaskController::new(
        config.controller.node_pool.clone(),
        &config.controller.agent_image,
        &config.controller.api_version,
        store.clone() as Arc<dyn RecordStore<Task>>,
        store as Arc<dyn RecordStore<Script>>,
        hosts,
    ));

    (
        AppState {
            scripts,
            templates,
            tasks,
        },
        controller,
    )
}

fn init_tracing(log: &LogConfig) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log.level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if log.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn spawn_signal_handler(cancel: CancellationToken) -> anyhow::Result<()> {
    let mut terminate = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
        tracing::info!("received signal, shutting down...");
        cancel.cancel();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
        tracing::warn!("received second signal, force exited");
        std::process::exit(1);
    });
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status":"ok"}))
}

async fn not_found() -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            code: "not_found".to_string(),
            message: "not found".to_string(),
        }),
    )
}

async fn create_script(
    State(state): State<AppState>,
    Json(script): Json<Script>,
) -> ApiResult<Script> {
    state.scripts.create(script).await.map(Json).map_err(map_api_error)
}

async fn update_script(
    State(state): State<AppState>,
    Json(script): Json<Script>,
) -> ApiResult<Script> {
    state.scripts.update(script).await.map(Json).map_err(map_api_error)
}

async fn query_scripts(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Page<Script>> {
    state
        .scripts
        .query(&query.into_record_query())
        .await
        .map(Json)
        .map_err(map_api_error)
}

async fn delete_script(
    State(state): State<AppState>,
    Path(script): Path<String>,
    Query(query): Query<VersionQuery>,
) -> ApiResult<serde_json::Value> {
    state
        .scripts
        .delete(&script, &query.version)
        .await
        .map(|_| Json(serde_json::json!({})))
        .map_err(map_api_error)
}

async fn create_template(
    State(state): State<AppState>,
    Json(template): Json<TaskTemplate>,
) -> ApiResult<TaskTemplate> {
    state
        .templates
        .create(template)
        .await
        .map(Json)
        .map_err(map_api_error)
}

async fn update_template(
    State(state): State<AppState>,
    Json(template): Json<TaskTemplate>,
) -> ApiResult<TaskTemplate> {
    state
        .templates
        .update(template)
        .await
        .map(Json)
        .map_err(map_api_error)
}

async fn query_templates(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Page<TaskTemplate>> {
    state
        .templates
        .query(&query.into_record_query())
        .await
        .map(Json)
        .map_err(map_api_error)
}

async fn delete_template(
    State(state): State<AppState>,
    Path(template): Path<String>,
    Query(query): Query<VersionQuery>,
) -> ApiResult<serde_json::Value> {
    state
        .templates
        .delete(&template, &query.version)
        .await
        .map(|_| Json(serde_json::json!({})))
        .map_err(map_api_error)
}

async fn submit_template(
    State(state): State<AppState>,
    Path(template): Path<String>,
    Query(query): Query<VersionQuery>,
) -> ApiResult<Task> {
    state
        .templates
        .submit(&template, &query.version, &state.tasks)
        .await
        .map(Json)
        .map_err(map_api_error)
}

async fn create_task(State(state): State<AppState>, Json(task): Json<Task>) -> ApiResult<Task> {
    state.tasks.create(task).await.map(Json).map_err(map_api_error)
}

async fn update_task(State(state): State<AppState>, Json(task): Json<Task>) -> ApiResult<Task> {
    state.tasks.update(task).await.map(Json).map_err(map_api_error)
}

async fn query_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Page<Task>> {
    state
        .tasks
        .query(&query.into_record_query())
        .await
        .map(Json)
        .map_err(map_api_error)
}

async fn delete_task(
    State(state): State<AppState>,
    Path(task): Path<String>,
    Query(query): Query<VersionQuery>,
) -> ApiResult<serde_json::Value> {
    state
        .tasks
        .delete(&task, &query.version)
        .await
        .map(|_| Json(serde_json::json!({})))
        .map_err(map_api_error)
}

async fn pause_task(State(state): State<AppState>, Path(task): Path<String>) -> ApiResult<Task> {
    state.tasks.pause(&task).await.map(Json).map_err(map_api_error)
}

async fn unpause_task(
    State(state): State<AppState>,
    Path(task): Path<String>,
) -> ApiResult<Task> {
    state.tasks.unpause(&task).await.map(Json).map_err(map_api_error)
}

async fn stop_task(State(state): State<AppState>, Path(task): Path<String>) -> ApiResult<Task> {
    state.tasks.stop(&task).await.map(Json).map_err(map_api_error)
}

async fn step_logs(
    State(state): State<AppState>,
    Path((task, step)): Path<(String, String)>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<StepLogs> {
    state
        .tasks
        .step_logs(&task, &step, query.tail)
        .await
        .map(|logs| Json(StepLogs { logs }))
        .map_err(map_api_error)
}

fn map_api_error(err: ApiError) -> (StatusCode, Json<ErrorBody>) {
    let (status, code) = match err.code() {
        ErrorCode::NotFound => (StatusCode::NOT_FOUND, "not_found"),
        ErrorCode::Conflict => (StatusCode::CONFLICT, "conflict"),
        ErrorCode::InvalidArgument => (StatusCode::BAD_REQUEST, "invalid_argument"),
        ErrorCode::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };
    (
        status,
        Json(ErrorBody {
            code: code.to_string(),
            message: err.to_string(),
        }),
    )
}
