//! Run execution and history handlers.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::response::sse::{Event, Sse};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use skillhost_core::repository::RunRepository;
use skillhost_observe::run_attrs::{batch_span, record_status, run_span};
use skillhost_types::event::RunEvent;
use skillhost_types::run::{Artifact, Run, RunResult, Strategy};
use tracing::Instrument;
use uuid::Uuid;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Header carrying the run id on streamed responses.
pub const RUN_ID_HEADER: &str = "x-skillhost-run-id";

const DEFAULT_LIST_LIMIT: u32 = 20;
const MAX_LIST_LIMIT: u32 = 200;

fn empty_input() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRunsRequest {
    /// Skill references: version id, `name@version`, or `name`.
    pub skills: Vec<String>,
    #[serde(default = "empty_input")]
    pub input: Value,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRunRequest {
    pub skill: String,
    #[serde(default = "empty_input")]
    pub input: Value,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub limit: Option<u32>,
}

/// A persisted run with the artifacts recorded against it.
#[derive(Debug, Serialize)]
pub struct RunDetail {
    #[serde(flatten)]
    pub run: Run,
    pub artifacts: Vec<Artifact>,
}

fn require_object(input: &Value) -> Result<(), AppError> {
    if input.is_object() {
        Ok(())
    } else {
        Err(AppError::Validation("input must be a JSON object".to_string()))
    }
}

fn to_sse_event(event: &RunEvent) -> Event {
    Event::default()
        .event(event.name())
        .data(event.payload().to_string())
}

/// POST /api/v1/runs - Execute one or more skills and wait for every result.
///
/// Failed runs are still `200`; each result carries its own status.
pub async fn execute_runs(
    State(state): State<AppState>,
    Json(body): Json<ExecuteRunsRequest>,
) -> Result<Json<ApiResponse<Vec<RunResult>>>, AppError> {
    let start = Instant::now();

    if body.skills.is_empty() {
        return Err(AppError::Validation("skills must not be empty".to_string()));
    }
    require_object(&body.input)?;

    let ids = body
        .skills
        .iter()
        .map(|reference| state.catalog.resolve_ref(reference).map(|v| v.id))
        .collect::<Result<Vec<_>, _>>()?;

    let span = batch_span(&body.strategy.to_string(), ids.len());
    let results = state
        .orchestrator
        .execute_many_with_timeout(
            &ids,
            body.input,
            body.strategy,
            body.timeout_seconds.map(Duration::from_secs),
        )
        .instrument(span)
        .await?;

    Ok(Json(
        ApiResponse::success(results, start).with_link("self", "/api/v1/runs"),
    ))
}

/// POST /api/v1/runs/stream - Start one run and stream its events over SSE.
///
/// The run keeps going if the client disconnects; only the event stream is
/// dropped.
pub async fn stream_run(
    State(state): State<AppState>,
    Json(body): Json<StreamRunRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_object(&body.input)?;
    let version = state.catalog.resolve_ref(&body.skill)?;

    let handle = state
        .orchestrator
        .spawn_one(
            version.id,
            body.input,
            body.timeout_seconds.map(Duration::from_secs),
        )
        .await?;

    let run_id = handle.run_id;
    let span = run_span(run_id, &version.label());
    let result = handle.result;
    tokio::spawn(
        async move {
            match result.await {
                Ok(result) => record_status(&tracing::Span::current(), result.status.as_str()),
                Err(e) => tracing::error!(%run_id, "streamed run task failed: {e}"),
            }
        }
        .instrument(span),
    );

    let events = handle
        .events
        .map(|event| Ok::<_, Infallible>(to_sse_event(&event)));

    // The bus emits `keepalive` events on idle, so no SSE comment frames.
    Ok(([(RUN_ID_HEADER, run_id.to_string())], Sse::new(events)))
}

/// GET /api/v1/runs - Recent runs, newest first.
pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> Result<Json<ApiResponse<Vec<Run>>>, AppError> {
    let start = Instant::now();
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let runs = state.runs.list_runs(limit).await?;
    Ok(Json(
        ApiResponse::success(runs, start).with_link("self", "/api/v1/runs"),
    ))
}

/// GET /api/v1/runs/{id} - One run with its artifacts.
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<RunDetail>>, AppError> {
    let start = Instant::now();
    let run_id = Uuid::parse_str(&id)
        .map_err(|_| AppError::Validation(format!("Invalid run ID '{id}'")))?;

    let run = state
        .runs
        .get_run(&run_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Run {run_id} not found")))?;
    let artifacts = state.runs.list_artifacts(&run_id).await?;

    Ok(Json(
        ApiResponse::success(RunDetail { run, artifacts }, start)
            .with_link("self", format!("/api/v1/runs/{run_id}")),
    ))
}
