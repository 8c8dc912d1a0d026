//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use skillhost_core::execution::OrchestrationError;
use skillhost_infra::skill::bundle::BundleError;
use skillhost_types::error::RepositoryError;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Errors raised before or around a run (never a run's own failure).
    Orchestration(OrchestrationError),
    /// Skill reference or bundle problems.
    Bundle(BundleError),
    Repository(RepositoryError),
    /// Resource lookup by id failed.
    NotFound(String),
    Validation(String),
    Internal(String),
}

impl From<OrchestrationError> for AppError {
    fn from(e: OrchestrationError) -> Self {
        AppError::Orchestration(e)
    }
}

impl From<BundleError> for AppError {
    fn from(e: BundleError) -> Self {
        AppError::Bundle(e)
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        AppError::Repository(e)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(format!("failed to encode response: {e}"))
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Orchestration(OrchestrationError::SkillVersionNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "SKILL_NOT_FOUND",
                format!("Skill version {id} not found"),
            ),
            AppError::Orchestration(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "EXECUTION_ERROR", e.to_string())
            }
            AppError::Bundle(BundleError::UnknownSkill(reference)) => (
                StatusCode::NOT_FOUND,
                "SKILL_NOT_FOUND",
                format!("Unknown skill '{reference}'"),
            ),
            AppError::Bundle(e) => (StatusCode::BAD_REQUEST, "BUNDLE_ERROR", e.to_string()),
            AppError::Repository(RepositoryError::NotFound) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", "Entity not found".to_string())
            }
            AppError::Repository(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR", e.to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        if status.is_server_error() {
            tracing::error!(code, %message, "request failed");
        }

        let body = json!({
            "data": null,
            "meta": {
                "request_id": "",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
