//! Execution sandbox: one handler call in an isolated working directory.
//!
//! For every call the sandbox allocates a fresh directory, hands the
//! handler its run environment and an output capture, bounds the call by a
//! timeout and collects declared artifacts before the directory is removed.
//! The working directory and environment are only ever given to the
//! handler; the host process's cwd and env are never touched, so concurrent
//! runs cannot see each other's state.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use futures_util::FutureExt;
use serde_json::{Map, Value};
use skillhost_types::config::HostConfig;
use skillhost_types::run::RunErrorKind;
use tempfile::TempDir;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::handler::{
    CapturedOutput, ENV_RUN_ID, ENV_WORKDIR, HandlerFailure, HandlerReply, Invocation,
    OutputCapture, SkillHandler,
};

/// Prefix of every per-run working directory name.
pub const WORKDIR_PREFIX: &str = "skillhost-run-";

// ---------------------------------------------------------------------------
// Errors and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandboxError {
    #[error("Execution timed out after {}", format_timeout(.0))]
    Timeout(Duration),

    #[error("{message}")]
    Handler {
        message: String,
        trace: Option<String>,
    },

    #[error("failed to prepare working directory: {0}")]
    Workdir(String),

    #[error("artifact error: {0}")]
    Artifact(String),
}

impl SandboxError {
    pub fn kind(&self) -> RunErrorKind {
        match self {
            Self::Timeout(_) => RunErrorKind::Timeout,
            Self::Handler { .. } => RunErrorKind::HandlerError,
            Self::Workdir(_) => RunErrorKind::Internal,
            Self::Artifact(_) => RunErrorKind::ArtifactError,
        }
    }

    pub fn trace(&self) -> Option<&str> {
        match self {
            Self::Handler { trace, .. } => trace.as_deref(),
            _ => None,
        }
    }
}

fn format_timeout(timeout: &Duration) -> String {
    if timeout.subsec_nanos() == 0 {
        format!("{}s", timeout.as_secs())
    } else {
        format!("{}ms", timeout.as_millis())
    }
}

/// Artifact bytes read out of a working directory before it was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    /// Final path component.
    pub filename: String,
    /// Path as declared by the handler, relative to the working directory.
    pub relative_path: String,
    pub bytes: Vec<u8>,
}

impl ArtifactFile {
    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Debug)]
pub struct SandboxResult {
    pub outputs: Map<String, Value>,
    pub artifact_files: Vec<ArtifactFile>,
    pub captured: CapturedOutput,
}

/// A failed call, with whatever output was captured before it failed.
#[derive(Debug)]
pub struct SandboxFailure {
    pub error: SandboxError,
    pub captured: CapturedOutput,
}

// ---------------------------------------------------------------------------
// Sandbox
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct SandboxLimits {
    pub max_artifacts: usize,
    pub max_artifact_size_bytes: u64,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self::from(&HostConfig::default())
    }
}

impl From<&HostConfig> for SandboxLimits {
    fn from(config: &HostConfig) -> Self {
        Self {
            max_artifacts: config.max_artifacts_per_run,
            max_artifact_size_bytes: config.max_artifact_size_bytes,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    workdir_root: Option<PathBuf>,
    limits: SandboxLimits,
}

impl Sandbox {
    /// `workdir_root` is the parent of per-run directories; the system temp
    /// directory is used when it is `None`.
    pub fn new(workdir_root: Option<PathBuf>, limits: SandboxLimits) -> Self {
        Self {
            workdir_root,
            limits,
        }
    }

    pub fn from_config(config: &HostConfig) -> Self {
        Self::new(config.workdir_root.clone(), SandboxLimits::from(config))
    }

    pub fn limits(&self) -> SandboxLimits {
        self.limits
    }

    /// Invoke `handler` once with `input`, bounded by `timeout`.
    ///
    /// The working directory is removed before this returns, whatever the
    /// outcome. A panicking handler is a handler failure. On timeout the
    /// handler's cancellation token fires, its future is dropped and output
    /// it writes afterwards is discarded.
    pub async fn run<H: SkillHandler>(
        &self,
        run_id: Uuid,
        handler: &H,
        input: Value,
        timeout: Duration,
    ) -> Result<SandboxResult, SandboxFailure> {
        let workdir = self.allocate_workdir(run_id).map_err(|e| SandboxFailure {
            error: SandboxError::Workdir(e.to_string()),
            captured: CapturedOutput::default(),
        })?;
        let workdir_path = workdir.path().to_path_buf();
        debug!(%run_id, workdir = %workdir_path.display(), "allocated run working directory");

        let capture = OutputCapture::new();
        let cancel = CancellationToken::new();
        let invocation = Invocation {
            run_id,
            input,
            workdir: workdir_path.clone(),
            env: vec![
                (ENV_WORKDIR.to_string(), workdir_path.display().to_string()),
                (ENV_RUN_ID.to_string(), run_id.to_string()),
            ],
            capture: capture.clone(),
            cancel: cancel.clone(),
        };

        let call = AssertUnwindSafe(handler.invoke(invocation)).catch_unwind();
        let outcome = tokio::select! {
            result = call => Some(result.unwrap_or_else(|panic| {
                warn!(%run_id, "handler panicked");
                Err(HandlerFailure::new(format!(
                    "handler panicked: {}",
                    panic_message(&*panic)
                )))
            })),
            _ = tokio::time::sleep(timeout) => None,
        };

        let result = match outcome {
            None => {
                cancel.cancel();
                warn!(%run_id, timeout_ms = timeout.as_millis() as u64, "handler timed out");
                Err(SandboxError::Timeout(timeout))
            }
            Some(Err(failure)) => Err(SandboxError::Handler {
                message: failure.message,
                trace: failure.trace,
            }),
            Some(Ok(value)) => match HandlerReply::from_value(value) {
                Ok(reply) => self
                    .collect_artifacts(&workdir_path, &reply.artifacts)
                    .await
                    .map(|files| (reply.outputs, files)),
                Err(failure) => Err(SandboxError::Handler {
                    message: failure.message,
                    trace: failure.trace,
                }),
            },
        };

        let captured = capture.seal();
        release_workdir(workdir).await;

        match result {
            Ok((outputs, artifact_files)) => Ok(SandboxResult {
                outputs,
                artifact_files,
                captured,
            }),
            Err(error) => Err(SandboxFailure { error, captured }),
        }
    }

    fn allocate_workdir(&self, run_id: Uuid) -> std::io::Result<TempDir> {
        let prefix = format!("{WORKDIR_PREFIX}{}-", run_id.simple());
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        match &self.workdir_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
    }

    /// Read declared artifacts out of the working directory.
    ///
    /// Missing files are skipped with a warning. Paths must stay inside the
    /// working directory.
    async fn collect_artifacts(
        &self,
        workdir: &Path,
        declared: &[String],
    ) -> Result<Vec<ArtifactFile>, SandboxError> {
        if declared.len() > self.limits.max_artifacts {
            return Err(SandboxError::Artifact(format!(
                "run declared {} artifacts; the limit is {}",
                declared.len(),
                self.limits.max_artifacts
            )));
        }

        let mut files = Vec::with_capacity(declared.len());
        for name in declared {
            let relative = Path::new(name);
            let contained = !name.is_empty()
                && !relative.is_absolute()
                && relative
                    .components()
                    .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
            if !contained {
                return Err(SandboxError::Artifact(format!(
                    "artifact path must stay inside the working directory: {name}"
                )));
            }

            let path = workdir.join(relative);
            let metadata = match tokio::fs::symlink_metadata(&path).await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => {
                    warn!(artifact = %name, "declared artifact is not a regular file; skipping");
                    continue;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(artifact = %name, "declared artifact not found; skipping");
                    continue;
                }
                Err(e) => {
                    return Err(SandboxError::Artifact(format!("failed to stat {name}: {e}")));
                }
            };

            if metadata.len() > self.limits.max_artifact_size_bytes {
                return Err(SandboxError::Artifact(format!(
                    "{name} is {} bytes; the limit is {}",
                    metadata.len(),
                    self.limits.max_artifact_size_bytes
                )));
            }

            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| SandboxError::Artifact(format!("failed to read {name}: {e}")))?;
            let filename = relative
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_else(|| name.clone());

            files.push(ArtifactFile {
                filename,
                relative_path: name.clone(),
                bytes,
            });
        }
        Ok(files)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

async fn release_workdir(workdir: TempDir) {
    let path = workdir.path().to_path_buf();
    match tokio::task::spawn_blocking(move || workdir.close()).await {
        Ok(Ok(())) => debug!(workdir = %path.display(), "removed run working directory"),
        Ok(Err(e)) => {
            warn!(workdir = %path.display(), error = %e, "failed to remove run working directory")
        }
        Err(e) => {
            warn!(workdir = %path.display(), error = %e, "working directory cleanup task failed")
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
