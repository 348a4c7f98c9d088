use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::AppState;
use crate::errors::SchedulerError;
use crate::models::{JobDetail, JobId, JobSummary, RunTrigger, TaskOverview};
use crate::scheduler::{RunOptions, ScheduleTable};
use crate::tasks::DataStore;

type ApiError = (StatusCode, Json<Value>);

fn status_for(err: &SchedulerError) -> StatusCode {
    match err {
        SchedulerError::Uninitialized => StatusCode::SERVICE_UNAVAILABLE,
        SchedulerError::TaskNotFound { .. } | SchedulerError::JobNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        SchedulerError::AlreadyRunning { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(err: SchedulerError) -> ApiError {
    let status = status_for(&err);
    if status.is_server_error() {
        error!("Request failed: {}", err);
    }

    let mut body = json!({ "error": err.to_string() });
    if let SchedulerError::AlreadyRunning { job_id, .. } = &err {
        body["jobId"] = json!(job_id);
    }
    (status, Json(body))
}

fn with_schedule(mut overview: TaskOverview, schedules: &ScheduleTable) -> TaskOverview {
    overview.schedule = schedules.expression(&overview.name).map(str::to_string);
    overview.next_run = schedules.next_run(&overview.name, Utc::now());
    overview
}

pub async fn health<S: DataStore>(State(state): State<AppState<S>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "initialized": state.scheduler.is_initialized(),
    }))
}

pub async fn list_tasks<S: DataStore>(
    State(state): State<AppState<S>>,
) -> Json<Vec<TaskOverview>> {
    let overviews = state
        .scheduler
        .task_overviews()
        .into_iter()
        .map(|overview| with_schedule(overview, &state.schedules))
        .collect();
    Json(overviews)
}

pub async fn get_task<S: DataStore>(
    Path(name): Path<String>,
    State(state): State<AppState<S>>,
) -> Result<Json<TaskOverview>, ApiError> {
    match state.scheduler.task_overview(&name) {
        Ok(overview) => Ok(Json(with_schedule(overview, &state.schedules))),
        Err(e) => Err(api_error(e)),
    }
}

/// Decode the optional run request body. An empty body means defaults; a
/// body that is present must be valid JSON for [`RunOptions`].
fn run_options(headers: &HeaderMap, body: &Bytes) -> Result<RunOptions, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(RunOptions::default());
    }

    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/json"))
        .unwrap_or(false);
    if !is_json {
        return Err((
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Json(json!({ "error": "Expected request with `Content-Type: application/json`" })),
        ));
    }

    match Json::<RunOptions>::from_bytes(body) {
        Ok(Json(options)) => Ok(options),
        Err(rejection) => {
            warn!("Rejected run request body: {}", rejection.body_text());
            Err((
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": rejection.body_text() })),
            ))
        }
    }
}

/// Start a run; the body is optional
pub async fn run_task<S: DataStore>(
    Path(name): Path<String>,
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<JobSummary>), ApiError> {
    let mut options = run_options(&headers, &body)?;
    options.trigger = RunTrigger::Api;

    let handle = match state.scheduler.run_task(&name, options) {
        Ok(handle) => handle,
        Err(e) => {
            if e.is_conflict() {
                warn!("Rejected run of '{}': {}", name, e);
            }
            return Err(api_error(e));
        }
    };
    info!("Job {} for task '{}' started via API", handle.id(), handle.task());

    match state.scheduler.job(handle.id()) {
        Ok(detail) => Ok((StatusCode::ACCEPTED, Json(detail.summary))),
        Err(e) => Err(api_error(e)),
    }
}

pub async fn running_jobs<S: DataStore>(
    State(state): State<AppState<S>>,
) -> Json<Vec<JobSummary>> {
    Json(state.scheduler.get_running_jobs())
}

pub async fn get_job<S: DataStore>(
    Path(id): Path<JobId>,
    State(state): State<AppState<S>>,
) -> Result<Json<JobDetail>, ApiError> {
    state.scheduler.job(id).map(Json).map_err(api_error)
}
