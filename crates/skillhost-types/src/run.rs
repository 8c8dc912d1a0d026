//! Run and artifact domain types.
//!
//! A [`Run`] is one execution attempt of a skill version against an input
//! payload. [`RunResult`] is the caller-facing summary that transport layers
//! serialize; [`Artifact`] records a file a run declared as output.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle state of a run.
///
/// `queued -> running -> {success | error | cancelled}`. The three right-hand
/// states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Error,
    Cancelled,
}

impl RunStatus {
    /// Whether no further transition is possible from this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Cancelled)
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        match (self, next) {
            (Self::Queued, Self::Running) => true,
            (Self::Running, next) => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy used to compose several skill versions in one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Every run starts concurrently against the same input.
    #[default]
    Parallel,
    /// Runs execute one after another; each success feeds its outputs forward.
    Chain,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parallel => write!(f, "parallel"),
            Self::Chain => write!(f, "chain"),
        }
    }
}

/// Classification of why a run ended in `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorKind {
    EntrypointNotFound,
    SymbolNotFound,
    NotInvocable,
    Timeout,
    HandlerError,
    ArtifactError,
    Internal,
}

// ---------------------------------------------------------------------------
// Run record
// ---------------------------------------------------------------------------

/// Persisted record of one execution attempt.
///
/// Invariants maintained by the lifecycle tracker:
/// - `completed_at` is set iff `status` is terminal.
/// - `output` is present only when `status == Success`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub skill_version_id: Uuid,
    pub status: RunStatus,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Create a new run in the `queued` state with a fresh UUIDv7.
    pub fn queued(skill_version_id: Uuid, input: Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            skill_version_id,
            status: RunStatus::Queued,
            input,
            output: None,
            logs: None,
            error: None,
            duration_ms: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// A file produced by a run and recorded after the handler returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub run_id: Uuid,
    pub filename: String,
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 of the file contents.
    pub checksum: String,
    /// Durable storage locator, when the artifact store provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    /// Media type guessed from the file extension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Caller-facing view of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSummary {
    pub filename: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl From<&Artifact> for ArtifactSummary {
    fn from(artifact: &Artifact) -> Self {
        Self {
            filename: artifact.filename.clone(),
            size_bytes: artifact.size_bytes,
            checksum: Some(artifact.checksum.clone()),
            url: artifact.locator.clone(),
            mime_type: artifact.mime_type.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Result summary
// ---------------------------------------------------------------------------

/// Structured summary of one run, returned whether the run succeeded or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub run_id: Uuid,
    pub skill_version_id: Uuid,
    pub status: RunStatus,
    pub outputs: Map<String, Value>,
    pub artifacts: Vec<ArtifactSummary>,
    pub duration_ms: u64,
    pub logs: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<RunErrorKind>,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}
