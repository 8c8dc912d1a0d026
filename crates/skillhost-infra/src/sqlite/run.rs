//! SQLite-backed run and artifact repository.
//!
//! JSON columns (`input`, `output`) are stored as text; timestamps as
//! RFC 3339 strings.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use skillhost_core::repository::RunRepository;
use skillhost_types::error::RepositoryError;
use skillhost_types::run::{Artifact, Run, RunStatus};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

pub struct SqliteRunRepository {
    pool: DatabasePool,
}

impl SqliteRunRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

struct RunRow {
    id: String,
    skill_version_id: String,
    status: String,
    input: String,
    output: Option<String>,
    logs: Option<String>,
    error: Option<String>,
    duration_ms: Option<i64>,
    created_at: String,
    completed_at: Option<String>,
}

impl RunRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            skill_version_id: row.try_get("skill_version_id")?,
            status: row.try_get("status")?,
            input: row.try_get("input")?,
            output: row.try_get("output")?,
            logs: row.try_get("logs")?,
            error: row.try_get("error")?,
            duration_ms: row.try_get("duration_ms")?,
            created_at: row.try_get("created_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_run(self) -> Result<Run, RepositoryError> {
        let status: RunStatus = serde_json::from_value(Value::String(self.status.clone()))
            .map_err(|_| RepositoryError::Query(format!("invalid run status: {}", self.status)))?;
        let input: Value = serde_json::from_str(&self.input)
            .map_err(|e| RepositoryError::Query(format!("invalid run input: {e}")))?;
        let output = self
            .output
            .as_deref()
            .map(|s| {
                serde_json::from_str::<Map<String, Value>>(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid run output: {e}")))
            })
            .transpose()?;

        Ok(Run {
            id: parse_uuid(&self.id)?,
            skill_version_id: parse_uuid(&self.skill_version_id)?,
            status,
            input,
            output,
            logs: self.logs,
            error: self.error,
            duration_ms: self.duration_ms.map(|d| d as u64),
            created_at: parse_datetime(&self.created_at)?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
        })
    }
}

struct ArtifactRow {
    id: String,
    run_id: String,
    filename: String,
    size_bytes: i64,
    checksum: String,
    locator: Option<String>,
    mime_type: Option<String>,
    created_at: String,
}

impl ArtifactRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            filename: row.try_get("filename")?,
            size_bytes: row.try_get("size_bytes")?,
            checksum: row.try_get("checksum")?,
            locator: row.try_get("locator")?,
            mime_type: row.try_get("mime_type")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_artifact(self) -> Result<Artifact, RepositoryError> {
        Ok(Artifact {
            id: parse_uuid(&self.id)?,
            run_id: parse_uuid(&self.run_id)?,
            filename: self.filename,
            size_bytes: self.size_bytes as u64,
            checksum: self.checksum,
            locator: self.locator,
            mime_type: self.mime_type,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn to_json_text<T: serde::Serialize>(value: &T, what: &str) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(format!("serialize {what}: {e}")))
}

// ---------------------------------------------------------------------------
// RunRepository impl
// ---------------------------------------------------------------------------

impl RunRepository for SqliteRunRepository {
    async fn create_run(&self, run: &Run) -> Result<(), RepositoryError> {
        let input = to_json_text(&run.input, "run input")?;
        let output = run
            .output
            .as_ref()
            .map(|o| to_json_text(o, "run output"))
            .transpose()?;

        sqlx::query(
            r#"INSERT INTO runs
               (id, skill_version_id, status, input, output, logs, error,
                duration_ms, created_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(run.id.to_string())
        .bind(run.skill_version_id.to_string())
        .bind(run.status.as_str())
        .bind(&input)
        .bind(&output)
        .bind(&run.logs)
        .bind(&run.error)
        .bind(run.duration_ms.map(|d| d as i64))
        .bind(format_datetime(&run.created_at))
        .bind(run.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Conflict(format!("run {} already exists", run.id))
            }
            other => RepositoryError::Query(other.to_string()),
        })?;

        Ok(())
    }

    async fn update_run(&self, run: &Run) -> Result<(), RepositoryError> {
        let output = run
            .output
            .as_ref()
            .map(|o| to_json_text(o, "run output"))
            .transpose()?;

        let result = sqlx::query(
            r#"UPDATE runs
               SET status = ?, output = ?, logs = ?, error = ?, duration_ms = ?, completed_at = ?
               WHERE id = ?"#,
        )
        .bind(run.status.as_str())
        .bind(&output)
        .bind(&run.logs)
        .bind(&run.error)
        .bind(run.duration_ms.map(|d| d as i64))
        .bind(run.completed_at.as_ref().map(format_datetime))
        .bind(run.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn get_run(&self, id: &Uuid) -> Result<Option<Run>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = RunRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_run()?))
            }
            None => Ok(None),
        }
    }

    async fn list_runs(&self, limit: u32) -> Result<Vec<Run>, RepositoryError> {
        // UUIDv7 ids sort by creation time, which breaks created_at ties.
        let rows = sqlx::query("SELECT * FROM runs ORDER BY created_at DESC, id DESC LIMIT ?")
            .bind(i64::from(limit))
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = RunRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            runs.push(r.into_run()?);
        }
        Ok(runs)
    }

    async fn create_artifact(&self, artifact: &Artifact) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO run_artifacts
               (id, run_id, filename, size_bytes, checksum, locator, mime_type, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(artifact.id.to_string())
        .bind(artifact.run_id.to_string())
        .bind(&artifact.filename)
        .bind(artifact.size_bytes as i64)
        .bind(&artifact.checksum)
        .bind(&artifact.locator)
        .bind(&artifact.mime_type)
        .bind(format_datetime(&artifact.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn list_artifacts(&self, run_id: &Uuid) -> Result<Vec<Artifact>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM run_artifacts WHERE run_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut artifacts = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = ArtifactRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            artifacts.push(r.into_artifact()?);
        }
        Ok(artifacts)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_repo() -> (SqliteRunRepository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (SqliteRunRepository::new(pool), dir)
    }

    fn make_artifact(run_id: Uuid, filename: &str) -> Artifact {
        Artifact {
            id: Uuid::now_v7(),
            run_id,
            filename: filename.to_string(),
            size_bytes: 42,
            checksum: "ab".repeat(32),
            locator: Some(format!("file:///tmp/{filename}")),
            mime_type: Some("text/plain".to_string()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_and_get_run() {
        let (repo, _dir) = test_repo().await;
        let run = Run::queued(Uuid::now_v7(), json!({"name": "Ada", "tags": [1, 2]}));

        repo.create_run(&run).await.unwrap();
        let loaded = repo.get_run(&run.id).await.unwrap().unwrap();

        assert_eq!(loaded.id, run.id);
        assert_eq!(loaded.skill_version_id, run.skill_version_id);
        assert_eq!(loaded.status, RunStatus::Queued);
        assert_eq!(loaded.input, json!({"name": "Ada", "tags": [1, 2]}));
        assert!(loaded.output.is_none());
        assert!(loaded.completed_at.is_none());
    }

    #[tokio::test]
    async fn get_missing_run_returns_none() {
        let (repo, _dir) = test_repo().await;
        assert!(repo.get_run(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_run_is_conflict() {
        let (repo, _dir) = test_repo().await;
        let run = Run::queued(Uuid::now_v7(), json!({}));
        repo.create_run(&run).await.unwrap();
        let err = repo.create_run(&run).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn update_run_persists_terminal_fields() {
        let (repo, _dir) = test_repo().await;
        let mut run = Run::queued(Uuid::now_v7(), json!({}));
        repo.create_run(&run).await.unwrap();

        let mut outputs = Map::new();
        outputs.insert("greeting".into(), json!("Hello"));
        run.status = RunStatus::Success;
        run.output = Some(outputs);
        run.logs = Some("=== STDOUT ===\nhi\n\n=== STDERR ===\n".into());
        run.duration_ms = Some(1234);
        run.completed_at = Some(Utc::now());
        repo.update_run(&run).await.unwrap();

        let loaded = repo.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Success);
        assert_eq!(loaded.output.unwrap()["greeting"], "Hello");
        assert_eq!(loaded.duration_ms, Some(1234));
        assert!(loaded.completed_at.is_some());
        assert!(loaded.logs.unwrap().contains("hi"));
    }

    #[tokio::test]
    async fn update_missing_run_is_not_found() {
        let (repo, _dir) = test_repo().await;
        let run = Run::queued(Uuid::now_v7(), json!({}));
        let err = repo.update_run(&run).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn list_runs_newest_first_with_limit() {
        let (repo, _dir) = test_repo().await;
        let mut ids = Vec::new();
        for i in 0..3 {
            let run = Run::queued(Uuid::now_v7(), json!({ "i": i }));
            ids.push(run.id);
            repo.create_run(&run).await.unwrap();
        }

        let runs = repo.list_runs(2).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, ids[2]);
        assert_eq!(runs[1].id, ids[1]);
    }

    #[tokio::test]
    async fn artifacts_round_trip_per_run() {
        let (repo, _dir) = test_repo().await;
        let run = Run::queued(Uuid::now_v7(), json!({}));
        let other = Run::queued(Uuid::now_v7(), json!({}));
        repo.create_run(&run).await.unwrap();
        repo.create_run(&other).await.unwrap();

        repo.create_artifact(&make_artifact(run.id, "a.txt")).await.unwrap();
        repo.create_artifact(&make_artifact(run.id, "b.txt")).await.unwrap();
        repo.create_artifact(&make_artifact(other.id, "c.txt")).await.unwrap();

        let artifacts = repo.list_artifacts(&run.id).await.unwrap();
        let names: Vec<&str> = artifacts.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
        assert_eq!(artifacts[0].size_bytes, 42);
        assert_eq!(artifacts[0].locator.as_deref(), Some("file:///tmp/a.txt"));
        assert_eq!(artifacts[0].mime_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn artifact_requires_existing_run() {
        let (repo, _dir) = test_repo().await;
        let result = repo.create_artifact(&make_artifact(Uuid::now_v7(), "x.txt")).await;
        assert!(result.is_err());
    }
}
