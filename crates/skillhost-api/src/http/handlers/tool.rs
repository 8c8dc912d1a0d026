//! Agent tool listings over the registered catalog.

use std::time::Instant;

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::Value;
use skillhost_infra::skill::tools::{self, ToolFormat, ToolManifest, ToolNaming};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ToolsQuery {
    #[serde(default)]
    pub format: ToolFormat,
    #[serde(default)]
    pub naming: ToolNaming,
}

/// GET /api/v1/tools - Registered skills as agent tool definitions.
///
/// `format` is `generic`, `openai` or `anthropic`; `naming` is `versioned`
/// or `simple`.
pub async fn list_tools(
    State(state): State<AppState>,
    Query(query): Query<ToolsQuery>,
) -> Result<Json<ApiResponse<Vec<Value>>>, AppError> {
    let start = Instant::now();
    let agent_tools = tools::as_agent_tools(&state.catalog.list(), query.naming);
    let rendered = tools::render_tools(&agent_tools, query.format)?;
    Ok(Json(
        ApiResponse::success(rendered, start).with_link("self", "/api/v1/tools"),
    ))
}

/// GET /.well-known/skills.json - Versioned tool manifest, unwrapped.
pub async fn tool_manifest(
    State(state): State<AppState>,
    Query(query): Query<ToolsQuery>,
) -> Json<ToolManifest> {
    Json(tools::manifest(tools::as_agent_tools(
        &state.catalog.list(),
        query.naming,
    )))
}
