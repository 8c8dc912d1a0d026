//! Skill catalog handlers.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;
use skillhost_types::skill::{IoField, SkillVersion};
use uuid::Uuid;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillVersionView {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub entrypoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<IoField>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<IoField>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl From<&SkillVersion> for SkillVersionView {
    fn from(version: &SkillVersion) -> Self {
        Self {
            id: version.id,
            name: version.skill_name.clone(),
            version: version.version.to_string(),
            entrypoint: version.entrypoint.clone(),
            description: version.description.clone(),
            timeout_seconds: version.timeout_hint_secs,
            inputs: version.inputs.clone(),
            outputs: version.outputs.clone(),
            tags: version.tags.clone(),
        }
    }
}

/// GET /api/v1/skills - List registered skill versions.
pub async fn list_skills(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<SkillVersionView>>>, AppError> {
    let start = Instant::now();
    let views = state.catalog.list().iter().map(SkillVersionView::from).collect();
    Ok(Json(
        ApiResponse::success(views, start).with_link("self", "/api/v1/skills"),
    ))
}

/// GET /api/v1/skills/{reference} - Look up a version by id, `name@version` or `name`.
pub async fn get_skill(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<ApiResponse<SkillVersionView>>, AppError> {
    let start = Instant::now();
    let version = state.catalog.resolve_ref(&reference)?;
    let self_link = format!("/api/v1/skills/{}", version.id);
    Ok(Json(
        ApiResponse::success(SkillVersionView::from(&version), start).with_link("self", self_link),
    ))
}
