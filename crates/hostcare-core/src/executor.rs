//! Bounded execution of one external command.
//!
//! The command runs as its own process, raced against a wall-clock deadline.
//! Whichever finishes first decides the result: on expiry the whole process
//! tree is killed and reaped before control returns, and whatever output had
//! been captured so far is handed back with `completed = false`.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{HostcareError, Result};
use crate::operation::Invocation;

/// Tail of the combined output kept for classification and the raw log.
pub const MAX_OUTPUT: usize = 1024 * 1024;

/// How long reader tasks may keep draining after the process is gone. A
/// grandchild that inherited the pipes can hold them open indefinitely.
const READER_GRACE: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Execution (output)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecFailure {
    TimedOut(Duration),
    SpawnFailed(String),
}

impl std::fmt::Display for ExecFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecFailure::TimedOut(d) => write!(f, "timed out after {}s", d.as_secs_f64()),
            ExecFailure::SpawnFailed(msg) => f.write_str(msg),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Execution {
    pub output: String,
    /// True only when the process ran to its own exit.
    pub completed: bool,
    pub exit_code: Option<i32>,
    pub failure: Option<ExecFailure>,
    pub duration: Duration,
}

impl Execution {
    pub fn finished(output: impl Into<String>, exit_code: Option<i32>, duration: Duration) -> Self {
        Self {
            output: output.into(),
            completed: true,
            exit_code,
            failure: None,
            duration,
        }
    }

    pub fn timed_out(partial: impl Into<String>, timeout: Duration, duration: Duration) -> Self {
        Self {
            output: partial.into(),
            completed: false,
            exit_code: None,
            failure: Some(ExecFailure::TimedOut(timeout)),
            duration,
        }
    }

    pub fn spawn_failed(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            output: String::new(),
            completed: false,
            exit_code: None,
            failure: Some(ExecFailure::SpawnFailed(message.into())),
            duration,
        }
    }
}

// ---------------------------------------------------------------------------
// Invoker
// ---------------------------------------------------------------------------

/// The command boundary: anything able to run an invocation under a deadline.
pub trait Invoker {
    /// Whether `program` can be located at all. Unresolvable programs are a
    /// missing step definition and are never spawned.
    fn resolve(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }

    fn invoke(&self, invocation: &Invocation, timeout: Duration) -> Execution;
}

/// Runs invocations as native processes on a private current-thread runtime.
pub struct ProcessInvoker {
    runtime: tokio::runtime::Runtime,
    cwd: Option<PathBuf>,
}

impl ProcessInvoker {
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| HostcareError::Runtime(e.to_string()))?;
        Ok(Self { runtime, cwd: None })
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

impl Invoker for ProcessInvoker {
    fn invoke(&self, invocation: &Invocation, timeout: Duration) -> Execution {
        self.runtime
            .block_on(run_bounded(invocation, timeout, self.cwd.as_deref()))
    }
}

// ---------------------------------------------------------------------------
// run_bounded
// ---------------------------------------------------------------------------

/// Spawn `invocation` and race it against `timeout`.
///
/// Every exit path releases the child: spawn failures never create one, a
/// normal exit is awaited, and a timeout kills and reaps it. `kill_on_drop`
/// covers a caller that drops this future mid-flight.
pub async fn run_bounded(
    invocation: &Invocation,
    timeout: Duration,
    cwd: Option<&std::path::Path>,
) -> Execution {
    let start = Instant::now();
    let Some((program, args)) = invocation.argv.split_first() else {
        return Execution::spawn_failed("empty command line", start.elapsed());
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own process group, so a deadline takes down helpers the tool started.
    #[cfg(unix)]
    cmd.process_group(0);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            return Execution::spawn_failed(
                format!("failed to spawn '{program}': {e}"),
                start.elapsed(),
            )
        }
    };
    let pid = child.id();
    debug!(pid, command = %invocation.display(), "spawned");

    if let (Some(text), Some(mut stdin)) = (invocation.stdin.clone(), child.stdin.take()) {
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(text.as_bytes()).await {
                debug!("stdin closed early: {e}");
            }
        });
    }

    let stdout_buf = Arc::new(Mutex::new(Vec::new()));
    let stderr_buf = Arc::new(Mutex::new(Vec::new()));
    let mut readers = Vec::with_capacity(2);
    if let Some(out) = child.stdout.take() {
        readers.push(tokio::spawn(drain(out, Arc::clone(&stdout_buf))));
    }
    if let Some(err) = child.stderr.take() {
        readers.push(tokio::spawn(drain(err, Arc::clone(&stderr_buf))));
    }

    let waited = tokio::select! {
        status = child.wait() => Some(status),
        _ = tokio::time::sleep(timeout) => None,
    };

    let outcome = match waited {
        Some(Ok(status)) => Ok(status.code()),
        Some(Err(e)) => Err(ExecFailure::SpawnFailed(format!("wait failed: {e}"))),
        None => {
            warn!(command = %invocation.display(), "deadline expired, killing");
            if let Some(pid) = pid {
                kill_tree(pid).await;
            }
            // kill() also waits, so the child is reaped here.
            if let Err(e) = child.kill().await {
                warn!("kill failed: {e}");
            }
            Err(ExecFailure::TimedOut(timeout))
        }
    };

    let settle = tokio::time::timeout(READER_GRACE, async {
        for reader in readers.iter_mut() {
            let _ = reader.await;
        }
    })
    .await;
    if settle.is_err() {
        debug!("output pipes still open after exit, abandoning readers");
        // Stragglers holding the pipes outlived the tool itself.
        if let Some(pid) = pid {
            kill_tree(pid).await;
        }
        for reader in &readers {
            reader.abort();
        }
    }

    let output = combine(&snapshot(&stdout_buf), &snapshot(&stderr_buf));
    let duration = start.elapsed();
    match outcome {
        Ok(code) => Execution::finished(output, code, duration),
        Err(ExecFailure::TimedOut(t)) => Execution::timed_out(output, t, duration),
        Err(failure) => Execution {
            output,
            completed: false,
            exit_code: None,
            failure: Some(failure),
            duration,
        },
    }
}

/// Kill every process in the tree rooted at `pid`.
#[cfg(unix)]
async fn kill_tree(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!(pid, "killpg failed: {e}"),
    }
}

#[cfg(windows)]
async fn kill_tree(pid: u32) {
    let status = Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(e) = status {
        warn!(pid, "taskkill failed: {e}");
    }
}

async fn drain<R: AsyncRead + Unpin>(mut reader: R, buf: Arc<Mutex<Vec<u8>>>) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if let Ok(mut b) = buf.lock() {
                    b.extend_from_slice(&chunk[..n]);
                    if b.len() > MAX_OUTPUT {
                        // Even cut keeps UTF-16 code units aligned.
                        let excess = (b.len() - MAX_OUTPUT + 1) & !1;
                        b.drain(..excess);
                    }
                }
            }
        }
    }
}

fn snapshot(buf: &Arc<Mutex<Vec<u8>>>) -> String {
    buf.lock().map(|b| decode_output(&b)).unwrap_or_default()
}

fn combine(stdout: &str, stderr: &str) -> String {
    let stdout = stdout.trim();
    let stderr = stderr.trim();
    if stderr.is_empty() {
        stdout.to_string()
    } else if stdout.is_empty() {
        stderr.to_string()
    } else {
        format!("{stdout}\n{stderr}")
    }
}

// ---------------------------------------------------------------------------
// Output decoding
// ---------------------------------------------------------------------------

/// Decode raw tool output. Some repair tools write UTF-16LE to a pipe; that is
/// detected from a BOM or from the share of zero high bytes.
pub fn decode_output(bytes: &[u8]) -> String {
    let text = if looks_utf16le(bytes) {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    };
    text.replace(['\0', '\u{feff}'], "")
}

fn looks_utf16le(bytes: &[u8]) -> bool {
    if bytes.starts_with(&[0xFF, 0xFE]) {
        return true;
    }
    let sample = &bytes[..bytes.len().min(512)];
    if sample.len() < 4 {
        return false;
    }
    let pairs = sample.len() / 2;
    let zero_high = sample.iter().skip(1).step_by(2).filter(|b| **b == 0).count();
    zero_high * 10 >= pairs * 8
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
