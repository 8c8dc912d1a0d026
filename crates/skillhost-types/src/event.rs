//! Progress events published on a run's event channel.
//!
//! `RunEvent` values are ephemeral: they are never persisted, and a run's
//! channel closes after its terminal event (`complete` or `error`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::run::RunStatus;

/// Which captured stream a log event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// A typed progress notification about one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RunEvent {
    /// The run record moved to a new lifecycle state.
    Status { status: RunStatus },

    /// Captured handler output.
    Log { stream: LogStream, line: String },

    /// One key of the handler's `outputs` mapping.
    Output { key: String, value: Value },

    /// An artifact was recorded for the run.
    Artifact {
        filename: String,
        #[serde(rename = "sizeBytes")]
        size_bytes: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },

    /// The run failed. Terminal for the channel.
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        traceback: Option<String>,
    },

    /// The run finished. Terminal for the channel.
    Complete {
        status: RunStatus,
        outputs: Map<String, Value>,
        #[serde(rename = "durationMs")]
        duration_ms: u64,
    },

    /// Synthetic idle marker produced by the stream, never published.
    Keepalive,
}

impl RunEvent {
    /// The event name used by the streaming transport.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Log { .. } => "log",
            Self::Output { .. } => "output",
            Self::Artifact { .. } => "artifact",
            Self::Error { .. } => "error",
            Self::Complete { .. } => "complete",
            Self::Keepalive => "keepalive",
        }
    }

    /// Whether this event closes the run's channel.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Complete { .. })
    }

    /// The JSON payload carried by the event, without the type tag.
    pub fn payload(&self) -> Value {
        match self {
            Self::Status { status } => json!({ "status": status }),
            Self::Log { stream, line } => json!({ "stream": stream, "line": line }),
            Self::Output { key, value } => json!({ "key": key, "value": value }),
            Self::Artifact {
                filename,
                size_bytes,
                url,
            } => {
                let mut payload = json!({ "filename": filename, "sizeBytes": size_bytes });
                if let Some(url) = url {
                    payload["url"] = json!(url);
                }
                payload
            }
            Self::Error { error, traceback } => {
                let mut payload = json!({ "error": error });
                if let Some(traceback) = traceback {
                    payload["traceback"] = json!(traceback);
                }
                payload
            }
            Self::Complete {
                status,
                outputs,
                duration_ms,
            } => json!({ "status": status, "outputs": outputs, "durationMs": duration_ms }),
            Self::Keepalive => json!({}),
        }
    }

    /// Serialize as a Server-Sent Events frame: `event: <name>\ndata: <json>\n\n`.
    pub fn to_sse_frame(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.name(), self.payload())
    }
}
