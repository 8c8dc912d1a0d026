//! Subprocess-backed skill handlers.
//!
//! Every entrypoint kind (Python module, shell function, shell script,
//! executable) runs as a child process:
//!
//! - the input payload is written to stdin as JSON, then stdin is closed;
//! - the working directory and environment come from the [`Invocation`];
//! - stderr is streamed into the run's capture as it arrives;
//! - stdout is streamed too, except for the last non-empty line, which is
//!   held back and read as the handler's result. If the call ends any other
//!   way (failure, cancellation, timeout) the held line is written out as
//!   ordinary output.
//!
//! The call finishes when the process exits. Pipes still held open by its
//! background children get a short grace period to drain, then are dropped.
//!
//! A non-zero exit status is a handler error whose message is the last line
//! of stderr (for Python, the exception line of the traceback).

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{Map, Value};
use skillhost_core::execution::handler::{HandlerFailure, Invocation, OutputCapture, SkillHandler};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;

/// Environment variable carrying the bundle root.
pub const ENV_BUNDLE_ROOT: &str = "SKILLHOST_BUNDLE_ROOT";

/// Key the Python bootstrap wraps the handler's return value in.
pub const RESULT_ENVELOPE_KEY: &str = "skillhost_result";

/// Loads a module by path, calls one symbol with the payload and prints the
/// result as the final stdout line. Awaitable results are driven by asyncio.
pub const PYTHON_BOOTSTRAP: &str = r#"
import asyncio, importlib.util, inspect, json, sys, traceback

class _Tracked:
    def __init__(self, inner):
        self._inner = inner
        self.at_line_start = True
    def write(self, text):
        if text:
            self.at_line_start = text.endswith("\n")
        return self._inner.write(text)
    def flush(self):
        return self._inner.flush()
    def __getattr__(self, name):
        return getattr(self._inner, name)

async def _await(value):
    return await value

def _main(path, symbol, bundle_root):
    sys.path.insert(0, bundle_root)
    raw = sys.stdin.read()
    payload = json.loads(raw) if raw.strip() else {}
    spec = importlib.util.spec_from_file_location("skillhost_entrypoint", path)
    module = importlib.util.module_from_spec(spec)
    spec.loader.exec_module(module)
    result = getattr(module, symbol)(payload)
    if inspect.isawaitable(result):
        result = asyncio.run(_await(result))
    return result

sys.stdout = _Tracked(sys.stdout)
try:
    line = json.dumps({"skillhost_result": _main(*sys.argv[1:4])})
except Exception:
    traceback.print_exc()
    sys.exit(1)
if not sys.stdout.at_line_start:
    sys.stdout.write("\n")
sys.stdout.write(line + "\n")
sys.stdout.flush()
"#;

/// How the final stdout line is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultProtocol {
    /// The line is `{"skillhost_result": <value>}`; anything else is malformed.
    Envelope,
    /// The line is the reply object itself when it parses as a JSON object;
    /// otherwise it is ordinary output and the reply is `{}`.
    LastLine,
}

/// A resolved entrypoint launched as a child process per invocation.
#[derive(Debug, Clone)]
pub struct ProcessHandler {
    program: String,
    args: Vec<String>,
    bundle_root: PathBuf,
    protocol: ResultProtocol,
}

impl ProcessHandler {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        bundle_root: PathBuf,
        protocol: ResultProtocol,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            bundle_root,
            protocol,
        }
    }

    /// `python -u -c BOOTSTRAP <file> <symbol> <bundle_root>`, unbuffered so
    /// output streams while the handler runs.
    pub fn python(python_bin: &str, file: PathBuf, symbol: &str, bundle_root: PathBuf) -> Self {
        let args = vec![
            "-u".to_string(),
            "-c".to_string(),
            PYTHON_BOOTSTRAP.to_string(),
            file.display().to_string(),
            symbol.to_string(),
            bundle_root.display().to_string(),
        ];
        Self::new(python_bin, args, bundle_root, ResultProtocol::Envelope)
    }

    /// Source `file` and call the function `symbol`.
    pub fn shell_function(shell_bin: &str, file: PathBuf, symbol: &str, bundle_root: PathBuf) -> Self {
        let args = vec![
            "-c".to_string(),
            r#"source "$1" && "$2""#.to_string(),
            "skillhost".to_string(),
            file.display().to_string(),
            symbol.to_string(),
        ];
        Self::new(shell_bin, args, bundle_root, ResultProtocol::LastLine)
    }

    /// Run `file` as a script.
    pub fn shell_script(shell_bin: &str, file: PathBuf, bundle_root: PathBuf) -> Self {
        let args = vec![file.display().to_string()];
        Self::new(shell_bin, args, bundle_root, ResultProtocol::LastLine)
    }

    /// Execute `file` directly, passing `symbol` as the first argument when given.
    pub fn executable(file: PathBuf, symbol: Option<&str>, bundle_root: PathBuf) -> Self {
        let args = symbol.map(str::to_string).into_iter().collect();
        Self::new(
            file.display().to_string(),
            args,
            bundle_root,
            ResultProtocol::LastLine,
        )
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn protocol(&self) -> ResultProtocol {
        self.protocol
    }
}

impl SkillHandler for ProcessHandler {
    async fn invoke(&self, invocation: Invocation) -> Result<Value, HandlerFailure> {
        let payload = serde_json::to_vec(&invocation.input)
            .map_err(|e| HandlerFailure::new(format!("failed to encode input: {e}")))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&invocation.workdir)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(ENV_BUNDLE_ROOT, &self.bundle_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HandlerFailure::new(format!("failed to launch {}: {e}", self.program)))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Declared before the pumps so it outlives them. Dropping it (timeout,
        // cancellation, any early return) writes the held line to the capture.
        let tail = StdoutTail::new(invocation.capture.clone());
        let stderr_text = Mutex::new(String::new());

        let write_input = async {
            if let Some(mut stdin) = stdin {
                // A handler that never reads its input closes the pipe early.
                if let Err(e) = stdin.write_all(&payload).await {
                    tracing::debug!(program = %self.program, "stdin closed early: {e}");
                }
            }
        };
        let pumps = async {
            tokio::join!(
                write_input,
                pump_stdout(stdout, &tail),
                pump_stderr(stderr, &invocation.capture, &stderr_text),
            );
        };
        tokio::pin!(pumps);

        let finished = async {
            let mut drained = false;
            let status = tokio::select! {
                status = child.wait() => status,
                () = &mut pumps => {
                    drained = true;
                    child.wait().await
                }
            };
            // Background processes may inherit the pipes and keep them open
            // long after the handler itself has exited.
            if !drained && tokio::time::timeout(PIPE_DRAIN_GRACE, &mut pumps).await.is_err() {
                tracing::debug!(program = %self.program, "output pipes still open after exit");
            }
            status
        };

        let status = tokio::select! {
            status = finished => status
                .map_err(|e| HandlerFailure::new(format!("failed to wait for {}: {e}", self.program)))?,
            // The child is killed when it is dropped on return.
            () = invocation.cancel.cancelled() => return Err(HandlerFailure::new("cancelled")),
        };

        let stderr_text = std::mem::take(&mut *stderr_text.lock().unwrap_or_else(|p| p.into_inner()));
        if !status.success() {
            let message = stderr_text
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .map(|line| line.trim().to_string())
                .unwrap_or_else(|| match status.code() {
                    Some(code) => format!("exited with status {code}"),
                    None => "terminated by signal".to_string(),
                });
            let failure = HandlerFailure::new(message);
            return Err(if stderr_text.trim().is_empty() {
                failure
            } else {
                failure.with_trace(stderr_text)
            });
        }

        self.decode_result(tail.take(), &invocation.capture)
    }
}

impl ProcessHandler {
    fn decode_result(&self, held: HeldLine, capture: &OutputCapture) -> Result<Value, HandlerFailure> {
        let parsed = held
            .line
            .as_deref()
            .and_then(|line| serde_json::from_str::<Value>(line).ok());

        match self.protocol {
            ResultProtocol::Envelope => match parsed {
                Some(Value::Object(mut envelope)) if envelope.contains_key(RESULT_ENVELOPE_KEY) => {
                    Ok(envelope.remove(RESULT_ENVELOPE_KEY).unwrap_or(Value::Null))
                }
                _ => {
                    held.flush(capture);
                    Err(HandlerFailure::new(
                        "malformed handler result: process produced no result",
                    ))
                }
            },
            ResultProtocol::LastLine => match parsed {
                Some(Value::Object(reply)) => Ok(Value::Object(reply)),
                _ => {
                    held.flush(capture);
                    Ok(Value::Object(Map::new()))
                }
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Stream pumps
// ---------------------------------------------------------------------------

/// How long pipes may stay open after the handler process has exited.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// The last non-empty stdout line plus blank lines seen after it.
#[derive(Debug, Default)]
struct HeldLine {
    line: Option<String>,
    trailing_blanks: usize,
}

impl HeldLine {
    /// Push a new line; returns text that is now known not to be the result.
    fn push(&mut self, line: String) -> Option<String> {
        if line.trim().is_empty() {
            if self.line.is_some() {
                self.trailing_blanks += 1;
                return None;
            }
            return Some("\n".to_string());
        }
        let released = self.take_text();
        self.line = Some(line);
        released
    }

    fn take_text(&mut self) -> Option<String> {
        let held = self.line.take()?;
        let mut text = held;
        text.push('\n');
        text.push_str(&"\n".repeat(self.trailing_blanks));
        self.trailing_blanks = 0;
        Some(text)
    }

    /// Release the held line into the capture as ordinary output.
    fn flush(mut self, capture: &OutputCapture) {
        if let Some(text) = self.take_text() {
            capture.write_stdout(&text);
        }
    }
}

/// Stdout as seen by one invocation: everything but the held line goes
/// straight to the capture. Whatever is still held on drop is written too,
/// so a handler cut off mid-run keeps its last line of output.
#[derive(Debug)]
struct StdoutTail {
    held: Mutex<HeldLine>,
    capture: OutputCapture,
}

impl StdoutTail {
    fn new(capture: OutputCapture) -> Self {
        Self {
            held: Mutex::new(HeldLine::default()),
            capture,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HeldLine> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, line: String) {
        let released = self.lock().push(line);
        if let Some(text) = released {
            self.capture.write_stdout(&text);
        }
    }

    /// Take the held line out; it is no longer flushed on drop.
    fn take(&self) -> HeldLine {
        std::mem::take(&mut *self.lock())
    }
}

impl Drop for StdoutTail {
    fn drop(&mut self) {
        let text = self.lock().take_text();
        if let Some(text) = text {
            self.capture.write_stdout(&text);
        }
    }
}

async fn pump_stdout(stream: Option<impl AsyncRead + Unpin>, tail: &StdoutTail) {
    let Some(stream) = stream else {
        return;
    };
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tail.push(line),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("stdout read failed: {e}");
                break;
            }
        }
    }
}

/// Streams stderr into the capture and keeps a copy in `all`.
async fn pump_stderr(
    stream: Option<impl AsyncRead + Unpin>,
    capture: &OutputCapture,
    all: &Mutex<String>,
) {
    let Some(stream) = stream else {
        return;
    };
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(mut line)) => {
                line.push('\n');
                capture.write_stderr(&line);
                all.lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push_str(&line);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("stderr read failed: {e}");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
