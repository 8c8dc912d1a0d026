//! Execution orchestrator: creates runs, drives them through the sandbox and
//! composes several runs in parallel or as a chain.
//!
//! # Run flow
//!
//! 1. Look up the skill version (fails before any run exists).
//! 2. Persist a `queued` run.
//! 3. Enter `running`, then resolve the entrypoint.
//! 4. Invoke the handler in the sandbox under the effective timeout.
//! 5. On success: store artifacts, publish `artifact`, `log` and `output`
//!    events, persist `success`, publish `complete`.
//! 6. On failure: publish `log` events, persist `error`, publish `error`.
//!
//! Ordinary execution failures never surface as `Err`; they come back as a
//! [`RunResult`] with `status == error`. Only an unknown skill version (or a
//! repository that cannot even create the run, for `spawn_one`) is an `Err`.

use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::Stream;
use serde_json::{Map, Value};
use skillhost_types::config::HostConfig;
use skillhost_types::error::RepositoryError;
use skillhost_types::event::{LogStream, RunEvent};
use skillhost_types::run::{ArtifactSummary, Run, RunErrorKind, RunResult, RunStatus, Strategy};
use skillhost_types::skill::SkillVersion;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use super::handler::CapturedOutput;
use super::lifecycle::{LifecycleError, RunTracker};
use super::resolver::{EntrypointDescriptor, EntrypointResolver};
use super::sandbox::{Sandbox, SandboxFailure, SandboxResult};
use crate::event::RunEventBus;
use crate::repository::{ArtifactStore, RunRepository, SkillVersionRepository};

// ---------------------------------------------------------------------------
// Errors and handles
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("skill version not found: {0}")]
    SkillVersionNotFound(Uuid),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// A run started in the background.
pub struct RunHandle {
    pub run_id: Uuid,
    /// Events for this run, subscribed before the run started.
    pub events: Pin<Box<dyn Stream<Item = RunEvent> + Send>>,
    pub result: JoinHandle<RunResult>,
}

/// How the effective timeout of a run is chosen.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    pub default: Duration,
    pub max: Duration,
}

impl TimeoutPolicy {
    /// Caller override, else the bundle's hint, else the default; capped at `max`.
    /// Zero values count as unset.
    pub fn effective(&self, requested: Option<Duration>, hint_secs: Option<u64>) -> Duration {
        requested
            .filter(|d| !d.is_zero())
            .or_else(|| hint_secs.filter(|s| *s > 0).map(Duration::from_secs))
            .unwrap_or(self.default)
            .min(self.max)
    }
}

impl From<&HostConfig> for TimeoutPolicy {
    fn from(config: &HostConfig) -> Self {
        Self {
            default: config.default_timeout(),
            max: config.max_timeout(),
        }
    }
}

/// Why a run ended in `error`, before it is recorded.
struct RunFailure {
    message: String,
    kind: RunErrorKind,
    trace: Option<String>,
    captured: CapturedOutput,
}

impl From<SandboxFailure> for RunFailure {
    fn from(failure: SandboxFailure) -> Self {
        Self {
            message: failure.error.to_string(),
            kind: failure.error.kind(),
            trace: failure.error.trace().map(String::from),
            captured: failure.captured,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<V, S, A, R> {
    versions: V,
    runs: Arc<S>,
    artifacts: A,
    resolver: R,
    sandbox: Sandbox,
    bus: RunEventBus,
    timeouts: TimeoutPolicy,
    stream_idle_timeout: Duration,
}

impl<V, S, A, R> Orchestrator<V, S, A, R>
where
    V: SkillVersionRepository + 'static,
    S: RunRepository + 'static,
    A: ArtifactStore + 'static,
    R: EntrypointResolver + 'static,
{
    pub fn new(
        versions: V,
        runs: Arc<S>,
        artifacts: A,
        resolver: R,
        bus: RunEventBus,
        config: &HostConfig,
    ) -> Self {
        Self {
            versions,
            runs,
            artifacts,
            resolver,
            sandbox: Sandbox::from_config(config),
            bus,
            timeouts: TimeoutPolicy::from(config),
            stream_idle_timeout: config.stream_idle_timeout(),
        }
    }

    pub fn versions(&self) -> &V {
        &self.versions
    }

    pub fn runs(&self) -> &Arc<S> {
        &self.runs
    }

    pub fn event_bus(&self) -> &RunEventBus {
        &self.bus
    }

    pub fn timeouts(&self) -> TimeoutPolicy {
        self.timeouts
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        self.stream_idle_timeout
    }

    /// Execute one skill version and wait for its result.
    pub async fn execute_one(
        &self,
        version_id: Uuid,
        input: Value,
        timeout: Option<Duration>,
    ) -> Result<RunResult, OrchestrationError> {
        let version = self.lookup(version_id).await?;
        let run = Run::queued(version.id, input);
        Ok(self.persist_and_drive(run, version, timeout).await)
    }

    /// Create a run and drive it on a background task.
    ///
    /// The returned event stream is subscribed before the run leaves
    /// `queued`, so it sees every event from `status: running` on.
    pub async fn spawn_one(
        self: &Arc<Self>,
        version_id: Uuid,
        input: Value,
        timeout: Option<Duration>,
    ) -> Result<RunHandle, OrchestrationError> {
        let version = self.lookup(version_id).await?;
        let run = Run::queued(version.id, input);
        self.runs.create_run(&run).await?;

        let run_id = run.id;
        let subscription = self.bus.subscribe(run_id);
        let events = Box::pin(
            self.bus
                .stream_subscription(subscription, self.stream_idle_timeout),
        );

        let this = Arc::clone(self);
        let result =
            tokio::spawn(async move { this.drive_or_recover(run, version, timeout).await });

        Ok(RunHandle {
            run_id,
            events,
            result,
        })
    }

    /// Execute several skill versions against `input`.
    ///
    /// Every id is looked up before anything runs. Results come back in the
    /// order of `version_ids`; under [`Strategy::Chain`] the list stops at
    /// the first run that did not succeed.
    pub async fn execute_many(
        self: &Arc<Self>,
        version_ids: &[Uuid],
        input: Value,
        strategy: Strategy,
    ) -> Result<Vec<RunResult>, OrchestrationError> {
        self.execute_many_with_timeout(version_ids, input, strategy, None)
            .await
    }

    /// [`execute_many`](Self::execute_many) with one timeout override applied to every run.
    pub async fn execute_many_with_timeout(
        self: &Arc<Self>,
        version_ids: &[Uuid],
        input: Value,
        strategy: Strategy,
        timeout: Option<Duration>,
    ) -> Result<Vec<RunResult>, OrchestrationError> {
        let mut versions = Vec::with_capacity(version_ids.len());
        for id in version_ids {
            versions.push(self.lookup(*id).await?);
        }

        info!(count = versions.len(), %strategy, "executing skill versions");
        let results = match strategy {
            Strategy::Parallel => self.execute_parallel(versions, input, timeout).await,
            Strategy::Chain => self.execute_chain(versions, input, timeout).await,
        };
        Ok(results)
    }

    /// Every run is a detached task: if the caller stops waiting, the runs
    /// still finish and reach a terminal state.
    async fn execute_parallel(
        self: &Arc<Self>,
        versions: Vec<SkillVersion>,
        input: Value,
        timeout: Option<Duration>,
    ) -> Vec<RunResult> {
        let tasks: Vec<_> = versions
            .into_iter()
            .map(|version| {
                let run = Run::queued(version.id, input.clone());
                let ids = (run.id, version.id);
                let this = Arc::clone(self);
                let task =
                    tokio::spawn(async move { this.persist_and_drive(run, version, timeout).await });
                (ids, task)
            })
            .collect();

        let mut results = Vec::with_capacity(tasks.len());
        for ((run_id, version_id), task) in tasks {
            let result = match task.await {
                Ok(result) => result,
                Err(join_error) => {
                    let message = format!("run task failed: {join_error}");
                    self.recover(run_id, version_id, message).await
                }
            };
            results.push(result);
        }
        results
    }

    async fn execute_chain(
        self: &Arc<Self>,
        versions: Vec<SkillVersion>,
        input: Value,
        timeout: Option<Duration>,
    ) -> Vec<RunResult> {
        let mut results = Vec::with_capacity(versions.len());
        let mut current = input;

        for version in versions {
            let run = Run::queued(version.id, current.clone());
            let (run_id, version_id) = (run.id, version.id);
            let this = Arc::clone(self);
            let task =
                tokio::spawn(async move { this.persist_and_drive(run, version, timeout).await });
            let result = match task.await {
                Ok(result) => result,
                Err(join_error) => {
                    let message = format!("run task failed: {join_error}");
                    self.recover(run_id, version_id, message).await
                }
            };

            let succeeded = result.is_success();
            if succeeded {
                current = Value::Object(result.outputs.clone());
            }
            results.push(result);
            if !succeeded {
                info!(%run_id, "chain stopped at failed run");
                break;
            }
        }
        results
    }

    async fn lookup(&self, version_id: Uuid) -> Result<SkillVersion, OrchestrationError> {
        self.versions
            .get_version(&version_id)
            .await?
            .ok_or(OrchestrationError::SkillVersionNotFound(version_id))
    }

    async fn persist_and_drive(
        &self,
        run: Run,
        version: SkillVersion,
        timeout: Option<Duration>,
    ) -> RunResult {
        if let Err(e) = self.runs.create_run(&run).await {
            return self.recover(run.id, version.id, e.to_string()).await;
        }
        self.drive_or_recover(run, version, timeout).await
    }

    async fn drive_or_recover(
        &self,
        run: Run,
        version: SkillVersion,
        timeout: Option<Duration>,
    ) -> RunResult {
        let (run_id, version_id) = (run.id, version.id);
        let span = info_span!(
            "skill.run",
            skill.run_id = %run_id,
            skill.name = %version.skill_name,
            skill.version = %version.version,
        );
        match self.drive(run, &version, timeout).instrument(span).await {
            Ok(result) => result,
            Err(e) => self.recover(run_id, version_id, e.to_string()).await,
        }
    }

    async fn drive(
        &self,
        run: Run,
        version: &SkillVersion,
        timeout: Option<Duration>,
    ) -> Result<RunResult, OrchestrationError> {
        let started = Instant::now();
        let timeout = self.timeouts.effective(timeout, version.timeout_hint_secs);

        let mut tracker = RunTracker::new(run, Arc::clone(&self.runs), self.bus.clone());
        tracker.start().await?;
        info!(
            entrypoint = %version.entrypoint,
            timeout_ms = timeout.as_millis() as u64,
            "run started"
        );

        let resolved = match EntrypointDescriptor::parse(&version.entrypoint) {
            Ok(descriptor) => {
                self.resolver
                    .resolve(&version.bundle_root, &descriptor)
                    .await
            }
            Err(e) => Err(e),
        };
        let handler = match resolved {
            Ok(handler) => handler,
            Err(e) => {
                warn!(error = %e, "entrypoint resolution failed");
                let failure = RunFailure {
                    message: e.to_string(),
                    kind: e.kind(),
                    trace: None,
                    captured: CapturedOutput::default(),
                };
                return self.finish_failure(tracker, failure, started).await;
            }
        };

        let input = tracker.run().input.clone();
        match self.sandbox.run(tracker.id(), &handler, input, timeout).await {
            Ok(result) => self.finish_success(tracker, result, started).await,
            Err(failure) => {
                self.finish_failure(tracker, RunFailure::from(failure), started)
                    .await
            }
        }
    }

    async fn finish_success(
        &self,
        mut tracker: RunTracker<S>,
        result: SandboxResult,
        started: Instant,
    ) -> Result<RunResult, OrchestrationError> {
        let run_id = tracker.id();
        let mut artifacts = Vec::with_capacity(result.artifact_files.len());

        for file in &result.artifact_files {
            let recorded = match self.artifacts.store(run_id, file).await {
                Ok(artifact) => self
                    .runs
                    .create_artifact(&artifact)
                    .await
                    .map(|()| artifact),
                Err(e) => Err(e),
            };
            match recorded {
                Ok(artifact) => {
                    self.bus.publish(
                        run_id,
                        RunEvent::Artifact {
                            filename: artifact.filename.clone(),
                            size_bytes: artifact.size_bytes,
                            url: artifact.locator.clone(),
                        },
                    );
                    artifacts.push(ArtifactSummary::from(&artifact));
                }
                Err(e) => {
                    let failure = RunFailure {
                        message: format!("failed to store artifact '{}': {e}", file.filename),
                        kind: RunErrorKind::ArtifactError,
                        trace: None,
                        captured: result.captured.clone(),
                    };
                    return self.finish_failure(tracker, failure, started).await;
                }
            }
        }

        self.publish_logs(run_id, &result.captured);
        for (key, value) in &result.outputs {
            self.bus.publish(
                run_id,
                RunEvent::Output {
                    key: key.clone(),
                    value: value.clone(),
                },
            );
        }

        let duration_ms = elapsed_ms(started);
        let logs = result.captured.combined();
        tracker
            .succeed(result.outputs.clone(), logs.clone(), duration_ms)
            .await?;
        self.bus.publish(
            run_id,
            RunEvent::Complete {
                status: RunStatus::Success,
                outputs: result.outputs.clone(),
                duration_ms,
            },
        );
        info!(duration_ms, artifacts = artifacts.len(), "run succeeded");

        Ok(RunResult {
            run_id,
            skill_version_id: tracker.run().skill_version_id,
            status: RunStatus::Success,
            outputs: result.outputs,
            artifacts,
            duration_ms,
            logs,
            error: None,
            error_kind: None,
        })
    }

    async fn finish_failure(
        &self,
        mut tracker: RunTracker<S>,
        failure: RunFailure,
        started: Instant,
    ) -> Result<RunResult, OrchestrationError> {
        let run_id = tracker.id();
        let duration_ms = elapsed_ms(started);
        let logs = failure_logs(&failure.captured, failure.trace.as_deref());

        self.publish_logs(run_id, &failure.captured);
        tracker
            .fail(failure.message.clone(), logs.clone(), duration_ms)
            .await?;
        self.publish_error(run_id, failure.message.clone(), failure.trace, duration_ms);
        warn!(duration_ms, kind = ?failure.kind, error = %failure.message, "run failed");

        Ok(RunResult {
            run_id,
            skill_version_id: tracker.run().skill_version_id,
            status: RunStatus::Error,
            outputs: Map::new(),
            artifacts: Vec::new(),
            duration_ms,
            logs,
            error: Some(failure.message),
            error_kind: Some(failure.kind),
        })
    }

    /// Turn an aborted drive (repository failure, panicked task) into a
    /// failed result, forcing the stored run to `error` if it was left open.
    async fn recover(&self, run_id: Uuid, version_id: Uuid, message: String) -> RunResult {
        error!(%run_id, error = %message, "run aborted");

        match self.runs.get_run(&run_id).await {
            Ok(Some(run)) if !run.status.is_terminal() => {
                let mut tracker = RunTracker::new(run, Arc::clone(&self.runs), self.bus.clone());
                let forced = async {
                    if tracker.status() == RunStatus::Queued {
                        tracker.start().await?;
                    }
                    tracker.fail(message.clone(), String::new(), 0).await
                }
                .await;
                if let Err(e) = forced {
                    warn!(%run_id, error = %e, "could not mark aborted run as failed");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(%run_id, error = %e, "could not load aborted run"),
        }
        self.publish_error(run_id, message.clone(), None, 0);

        RunResult {
            run_id,
            skill_version_id: version_id,
            status: RunStatus::Error,
            outputs: Map::new(),
            artifacts: Vec::new(),
            duration_ms: 0,
            logs: String::new(),
            error: Some(message),
            error_kind: Some(RunErrorKind::Internal),
        }
    }

    fn publish_logs(&self, run_id: Uuid, captured: &CapturedOutput) {
        let streams = [
            (LogStream::Stdout, &captured.stdout),
            (LogStream::Stderr, &captured.stderr),
        ];
        for (stream, text) in streams {
            for line in text.lines().filter(|l| !l.is_empty()) {
                self.bus.publish(
                    run_id,
                    RunEvent::Log {
                        stream,
                        line: line.to_string(),
                    },
                );
            }
        }
    }

    /// `error` closes the channel, so the trailing `complete` only reaches
    /// consumers that do not treat `error` as terminal (none today).
    fn publish_error(
        &self,
        run_id: Uuid,
        error: String,
        traceback: Option<String>,
        duration_ms: u64,
    ) {
        self.bus.publish(run_id, RunEvent::Error { error, traceback });
        self.bus.publish(
            run_id,
            RunEvent::Complete {
                status: RunStatus::Error,
                outputs: Map::new(),
                duration_ms,
            },
        );
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Persisted logs for a failed run: both streams, then the handler trace.
fn failure_logs(captured: &CapturedOutput, trace: Option<&str>) -> String {
    let mut logs = captured.combined();
    if let Some(trace) = trace.filter(|t| !t.is_empty()) {
        logs.push_str("\n\n=== TRACE ===\n");
        logs.push_str(trace);
    }
    logs
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
