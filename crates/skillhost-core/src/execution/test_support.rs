//! In-memory repositories and a scripted resolver for engine tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use skillhost_types::error::RepositoryError;
use skillhost_types::run::{Artifact, Run};
use skillhost_types::skill::SkillVersion;
use uuid::Uuid;

use super::handler::{HandlerFailure, Invocation, SkillHandler};
use super::resolver::{EntrypointDescriptor, EntrypointResolver, ResolveError};
use super::sandbox::ArtifactFile;
use crate::repository::{ArtifactStore, RunRepository, SkillVersionRepository};

#[derive(Default)]
pub struct InMemoryRuns {
    runs: Mutex<HashMap<Uuid, Run>>,
    artifacts: Mutex<Vec<Artifact>>,
    updates: AtomicUsize,
    fail_updates: AtomicBool,
}

impl InMemoryRuns {
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn all_runs(&self) -> Vec<Run> {
        self.runs.lock().unwrap().values().cloned().collect()
    }
}

impl RunRepository for InMemoryRuns {
    async fn create_run(&self, run: &Run) -> Result<(), RepositoryError> {
        let mut runs = self.runs.lock().unwrap();
        if runs.contains_key(&run.id) {
            return Err(RepositoryError::Conflict(run.id.to_string()));
        }
        runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn update_run(&self, run: &Run) -> Result<(), RepositoryError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(RepositoryError::Query("updates disabled".into()));
        }
        let mut runs = self.runs.lock().unwrap();
        match runs.get_mut(&run.id) {
            Some(existing) => {
                *existing = run.clone();
                self.updates.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn get_run(&self, id: &Uuid) -> Result<Option<Run>, RepositoryError> {
        Ok(self.runs.lock().unwrap().get(id).cloned())
    }

    async fn list_runs(&self, limit: u32) -> Result<Vec<Run>, RepositoryError> {
        let mut runs = self.all_runs();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs.truncate(limit as usize);
        Ok(runs)
    }

    async fn create_artifact(&self, artifact: &Artifact) -> Result<(), RepositoryError> {
        self.artifacts.lock().unwrap().push(artifact.clone());
        Ok(())
    }

    async fn list_artifacts(&self, run_id: &Uuid) -> Result<Vec<Artifact>, RepositoryError> {
        Ok(self
            .artifacts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.run_id == *run_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryVersions {
    versions: Mutex<HashMap<Uuid, SkillVersion>>,
}

impl InMemoryVersions {
    /// Register a version whose entrypoint is `entrypoint`.
    pub fn add(&self, name: &str, entrypoint: &str, timeout_hint_secs: Option<u64>) -> Uuid {
        let version = SkillVersion {
            id: Uuid::now_v7(),
            skill_name: name.to_string(),
            version: semver::Version::new(1, 0, 0),
            entrypoint: entrypoint.to_string(),
            bundle_root: PathBuf::from("/bundles").join(name),
            timeout_hint_secs,
            description: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            tags: Vec::new(),
            input_schema: None,
        };
        let id = version.id;
        self.versions.lock().unwrap().insert(id, version);
        id
    }
}

impl SkillVersionRepository for InMemoryVersions {
    async fn get_version(&self, id: &Uuid) -> Result<Option<SkillVersion>, RepositoryError> {
        Ok(self.versions.lock().unwrap().get(id).cloned())
    }

    async fn list_versions(&self) -> Result<Vec<SkillVersion>, RepositoryError> {
        Ok(self.versions.lock().unwrap().values().cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryArtifacts {
    fail: AtomicBool,
}

impl InMemoryArtifacts {
    pub fn fail_stores(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl ArtifactStore for InMemoryArtifacts {
    async fn store(&self, run_id: Uuid, file: &ArtifactFile) -> Result<Artifact, RepositoryError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RepositoryError::Storage("bucket unavailable".into()));
        }
        Ok(Artifact {
            id: Uuid::now_v7(),
            run_id,
            filename: file.filename.clone(),
            size_bytes: file.size_bytes(),
            checksum: format!("len-{}", file.bytes.len()),
            locator: Some(format!("mem://{run_id}/{}", file.filename)),
            mime_type: None,
            created_at: Utc::now(),
        })
    }
}

/// Behaviours selected by the entrypoint symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Returns the input object as outputs.
    Echo,
    /// `{"n": x}` -> `{"n": x * 2}`.
    Double,
    /// Prints to both streams, then raises.
    Fail,
    /// Sleeps for the number of milliseconds in `input.sleep_ms`.
    Slow,
    /// Writes `report.txt` and declares it.
    Artifact,
    Panic,
}

pub struct ScriptedHandler(pub Script);

impl SkillHandler for ScriptedHandler {
    async fn invoke(&self, inv: Invocation) -> Result<Value, HandlerFailure> {
        match self.0 {
            Script::Echo => {
                inv.capture.write_stdout("echoing\n");
                Ok(json!({ "outputs": inv.input }))
            }
            Script::Double => {
                let n = inv.input["n"].as_i64().unwrap_or_default();
                Ok(json!({ "outputs": { "n": n * 2 } }))
            }
            Script::Fail => {
                inv.capture.write_stdout("partial\n");
                inv.capture.write_stderr("warning: about to fail\n");
                Err(HandlerFailure::new("ValueError: bad input")
                    .with_trace("Traceback (most recent call last):\n  ValueError: bad input"))
            }
            Script::Slow => {
                let ms = inv.input["sleep_ms"].as_u64().unwrap_or(10_000);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!({ "outputs": { "slept": ms } }))
            }
            Script::Artifact => {
                tokio::fs::write(inv.workdir.join("report.txt"), b"quarterly numbers")
                    .await
                    .map_err(|e| HandlerFailure::new(e.to_string()))?;
                Ok(json!({ "outputs": { "written": true }, "artifacts": ["report.txt"] }))
            }
            Script::Panic => panic!("handler exploded"),
        }
    }
}

/// Resolves `<file>:<symbol>` by symbol name. Files named `missing.*` do not exist.
#[derive(Default)]
pub struct ScriptedResolver;

impl EntrypointResolver for ScriptedResolver {
    type Handler = ScriptedHandler;

    async fn resolve(
        &self,
        _bundle_root: &Path,
        descriptor: &EntrypointDescriptor,
    ) -> Result<ScriptedHandler, ResolveError> {
        let file = descriptor.path().display().to_string();
        if descriptor
            .path()
            .file_stem()
            .is_some_and(|stem| stem == "missing")
        {
            return Err(ResolveError::EntrypointNotFound(file));
        }
        let script = match descriptor.symbol() {
            "run" | "echo" => Script::Echo,
            "double" => Script::Double,
            "fail" => Script::Fail,
            "slow" => Script::Slow,
            "artifact" => Script::Artifact,
            "panic" => Script::Panic,
            "CONSTANT" => {
                return Err(ResolveError::NotInvocable {
                    file,
                    symbol: "CONSTANT".into(),
                    reason: "not a function".into(),
                });
            }
            other => {
                return Err(ResolveError::SymbolNotFound {
                    file,
                    symbol: other.to_string(),
                });
            }
        };
        Ok(ScriptedHandler(script))
    }
}
