//! The contract between the sandbox and a resolved skill handler.
//!
//! A handler receives one [`Invocation`] (input, working directory, run
//! environment and an output capture) and returns a JSON value that must
//! decode as a [`HandlerReply`]. Handlers never see the event bus or the run
//! record.

use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Environment variable carrying the run's working directory.
pub const ENV_WORKDIR: &str = "SKILLHOST_WORKDIR";

/// Environment variable carrying the run id.
pub const ENV_RUN_ID: &str = "SKILLHOST_RUN_ID";

// ---------------------------------------------------------------------------
// Output capture
// ---------------------------------------------------------------------------

/// Text a handler wrote to stdout and stderr.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }

    /// Both streams in the persisted log layout.
    pub fn combined(&self) -> String {
        format!(
            "=== STDOUT ===\n{}\n\n=== STDERR ===\n{}",
            self.stdout, self.stderr
        )
    }
}

#[derive(Debug, Default)]
struct CaptureState {
    output: CapturedOutput,
    sealed: bool,
}

/// Shared sink for a handler's stdout and stderr.
///
/// Once sealed, further writes are discarded; that is how output produced
/// after a timeout is kept out of the run's logs.
#[derive(Debug, Clone, Default)]
pub struct OutputCapture {
    state: Arc<Mutex<CaptureState>>,
}

impl OutputCapture {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append to stdout. Returns `false` if the capture is sealed.
    pub fn write_stdout(&self, text: &str) -> bool {
        let mut state = self.lock();
        if state.sealed {
            return false;
        }
        state.output.stdout.push_str(text);
        true
    }

    /// Append to stderr. Returns `false` if the capture is sealed.
    pub fn write_stderr(&self, text: &str) -> bool {
        let mut state = self.lock();
        if state.sealed {
            return false;
        }
        state.output.stderr.push_str(text);
        true
    }

    pub fn snapshot(&self) -> CapturedOutput {
        self.lock().output.clone()
    }

    /// Stop accepting writes and return everything captured so far.
    pub fn seal(&self) -> CapturedOutput {
        let mut state = self.lock();
        state.sealed = true;
        state.output.clone()
    }

    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }
}

// ---------------------------------------------------------------------------
// Invocation and reply
// ---------------------------------------------------------------------------

/// Everything a handler gets for one call.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub run_id: Uuid,
    pub input: Value,
    /// Fresh, empty directory owned by this run. Relative paths resolve here.
    pub workdir: PathBuf,
    /// Variables visible to the handler on top of the host environment.
    pub env: Vec<(String, String)>,
    pub capture: OutputCapture,
    /// Cancelled when the sandbox gives up on the call (timeout).
    pub cancel: CancellationToken,
}

impl Invocation {
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A handler raised instead of returning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerFailure {
    pub message: String,
    /// Handler-side stack trace or diagnostic dump, if any.
    pub trace: Option<String>,
}

impl HandlerFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

/// Decoded handler return value.
///
/// The raw value must be an object; `outputs` defaults to `{}` and
/// `artifacts` (workdir-relative paths) defaults to `[]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerReply {
    pub outputs: Map<String, Value>,
    pub artifacts: Vec<String>,
}

impl HandlerReply {
    pub fn from_value(value: Value) -> Result<Self, HandlerFailure> {
        let Value::Object(mut object) = value else {
            return Err(HandlerFailure::new(
                "malformed handler result: expected an object",
            ));
        };

        let outputs = match object.remove("outputs") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(outputs)) => outputs,
            Some(_) => {
                return Err(HandlerFailure::new(
                    "malformed handler result: 'outputs' must be an object",
                ));
            }
        };

        let artifacts = match object.remove("artifacts") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(path) => Ok(path),
                    _ => Err(HandlerFailure::new(
                        "malformed handler result: 'artifacts' must contain only strings",
                    )),
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => {
                return Err(HandlerFailure::new(
                    "malformed handler result: 'artifacts' must be an array",
                ));
            }
        };

        Ok(Self { outputs, artifacts })
    }
}

// ---------------------------------------------------------------------------
// Handler trait
// ---------------------------------------------------------------------------

/// A resolved, callable skill entrypoint.
pub trait SkillHandler: Send + Sync {
    fn invoke(
        &self,
        invocation: Invocation,
    ) -> impl Future<Output = Result<Value, HandlerFailure>> + Send;
}

/// Wraps an async closure as a handler.
pub struct AsyncFnHandler<F> {
    func: F,
}

impl<F, Fut> AsyncFnHandler<F>
where
    F: Fn(Invocation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerFailure>> + Send,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F, Fut> SkillHandler for AsyncFnHandler<F>
where
    F: Fn(Invocation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerFailure>> + Send,
{
    fn invoke(
        &self,
        invocation: Invocation,
    ) -> impl Future<Output = Result<Value, HandlerFailure>> + Send {
        (self.func)(invocation)
    }
}

/// Wraps a synchronous closure; each call runs on the blocking thread pool.
pub struct BlockingFnHandler<F> {
    func: Arc<F>,
}

impl<F> BlockingFnHandler<F>
where
    F: Fn(Invocation) -> Result<Value, HandlerFailure> + Send + Sync + 'static,
{
    pub fn new(func: F) -> Self {
        Self {
            func: Arc::new(func),
        }
    }
}

impl<F> SkillHandler for BlockingFnHandler<F>
where
    F: Fn(Invocation) -> Result<Value, HandlerFailure> + Send + Sync + 'static,
{
    async fn invoke(&self, invocation: Invocation) -> Result<Value, HandlerFailure> {
        let func = Arc::clone(&self.func);
        tokio::task::spawn_blocking(move || func(invocation))
            .await
            .map_err(|e| HandlerFailure::new(format!("handler task failed: {e}")))?
    }
}
