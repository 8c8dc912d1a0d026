//! Axum router configuration with middleware.
//!
//! All API routes are under `/api/v1/`; `/health` and the
//! `/.well-known/skills.json` tool manifest sit at the root.
//! Middleware: CORS, request tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Catalog
        .route("/skills", get(handlers::skill::list_skills))
        .route("/skills/{reference}", get(handlers::skill::get_skill))
        .route("/tools", get(handlers::tool::list_tools))
        // Runs
        .route(
            "/runs",
            post(handlers::run::execute_runs).get(handlers::run::list_runs),
        )
        .route("/runs/stream", post(handlers::run::stream_run))
        .route("/runs/{id}", get(handlers::run::get_run));

    Router::new()
        .route("/health", get(health_check))
        .route("/.well-known/skills.json", get(handlers::tool::tool_manifest))
        .nest("/api/v1", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Liveness check.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;

    const GREETER: &str = r#"run() {
  input=$(cat)
  echo "greeting from bash"
  echo "hello" > greeting.txt
  echo '{"outputs": {"greeting": "hi"}, "artifacts": ["greeting.txt"]}'
}
"#;

    const FAILER: &str = r#"run() {
  echo "nope" >&2
  exit 3
}
"#;

    fn write_bundle(root: &Path, name: &str, script: &str) -> std::path::PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("SKILL.md"),
            format!("---\nname: {name}\nversion: 1.0.0\nentrypoint: main.sh\n---\n\n# {name}\n"),
        )
        .unwrap();
        let script_path = dir.join("main.sh");
        std::fs::write(&script_path, script).unwrap();
        std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755)).unwrap();
        dir
    }

    async fn test_app() -> (Router, AppState, TempDir) {
        let tmp = TempDir::new().unwrap();
        let state = AppState::init_in(tmp.path().join("data")).await.unwrap();
        let skills = tmp.path().join("skills");
        write_bundle(&skills, "greeter", GREETER);
        write_bundle(&skills, "failer", FAILER);
        state.catalog.scan(&skills).await.unwrap();
        (build_router(state.clone()), state, tmp)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (app, _state, _tmp) = test_app().await;
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn lists_registered_skills() {
        let (app, _state, _tmp) = test_app().await;
        let response = app.oneshot(get("/api/v1/skills")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let names: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["failer", "greeter"]);
    }

    #[tokio::test]
    async fn lists_tools_in_provider_shapes() {
        let (app, _state, _tmp) = test_app().await;

        let response = app
            .clone()
            .oneshot(get("/api/v1/tools?format=openai&naming=simple"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let openai = body["data"].as_array().unwrap();
        assert_eq!(openai.len(), 2);
        assert_eq!(openai[0]["type"], "function");
        assert_eq!(openai[0]["function"]["name"], "skill_failer");
        assert_eq!(openai[0]["function"]["parameters"]["type"], "object");

        let response = app
            .clone()
            .oneshot(get("/api/v1/tools?format=anthropic"))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["data"][1]["name"], "skill_greeter_1_0_0");
        assert!(body["data"][1]["input_schema"]["properties"]["skill_version_id"].is_object());

        let response = app
            .clone()
            .oneshot(get("/api/v1/tools?format=yaml"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app.oneshot(get("/.well-known/skills.json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let manifest = body_json(response).await;
        assert_eq!(manifest["provider"], "skillhost");
        assert_eq!(manifest["tools"][0]["name"], "skill:failer@1.0.0");
        assert_eq!(manifest["tools"][1]["name"], "skill:greeter@1.0.0");
    }

    #[tokio::test]
    async fn unknown_skill_reference_is_404() {
        let (app, _state, _tmp) = test_app().await;
        let response = app
            .oneshot(post_json("/api/v1/runs", json!({ "skills": ["ghost"] })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["errors"][0]["code"], "SKILL_NOT_FOUND");
    }

    #[tokio::test]
    async fn empty_skill_list_is_rejected() {
        let (app, _state, _tmp) = test_app().await;
        let response = app
            .oneshot(post_json("/api/v1/runs", json!({ "skills": [] })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn executes_runs_and_serves_their_records() {
        let (app, _state, _tmp) = test_app().await;

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/v1/runs",
                json!({ "skills": ["greeter@1.0.0", "failer"], "input": { "name": "Ada" } }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let results = body["data"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["status"], "success");
        assert_eq!(results[0]["outputs"]["greeting"], "hi");
        assert_eq!(results[0]["artifacts"][0]["filename"], "greeting.txt");
        assert_eq!(results[1]["status"], "error");
        assert_eq!(results[1]["error"], "nope");

        let run_id = results[0]["runId"].as_str().unwrap().to_string();
        let response = app
            .clone()
            .oneshot(get(&format!("/api/v1/runs/{run_id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let detail = body_json(response).await;
        assert_eq!(detail["data"]["status"], "success");
        assert_eq!(detail["data"]["artifacts"][0]["size_bytes"], 6);

        let response = app.oneshot(get("/api/v1/runs?limit=10")).await.unwrap();
        let listed = body_json(response).await;
        assert_eq!(listed["data"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_run_is_404_and_bad_id_is_400() {
        let (app, _state, _tmp) = test_app().await;
        let missing = uuid::Uuid::now_v7();
        let response = app
            .clone()
            .oneshot(get(&format!("/api/v1/runs/{missing}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.oneshot(get("/api/v1/runs/not-a-uuid")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn streams_run_events_as_sse() {
        let (app, _state, _tmp) = test_app().await;
        let response = app
            .oneshot(post_json("/api/v1/runs/stream", json!({ "skill": "greeter" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(handlers::run::RUN_ID_HEADER));
        assert_eq!(
            response.headers()["content-type"],
            "text/event-stream"
        );

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let running = text.find("event: status").unwrap();
        let complete = text.find("event: complete").unwrap();
        assert!(running < complete);
        assert!(text.contains("event: artifact"));
        assert!(text.contains("event: output"));
        assert!(text.contains("greeting from bash"));
    }

    #[tokio::test]
    async fn stream_of_failing_run_ends_with_error_event() {
        let (app, _state, _tmp) = test_app().await;
        let response = app
            .oneshot(post_json("/api/v1/runs/stream", json!({ "skill": "failer" })))
            .await
            .unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("event: error"));
        assert!(!text.contains("event: complete"));
    }
}
