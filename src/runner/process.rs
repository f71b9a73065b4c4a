//! Subprocess execution with a prompt on stdin and a hard timeout.
//!
//! stdout and stderr are drained line by line on their own tasks so a chatty
//! child can never block on a full pipe. On timeout the child is killed.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::RunnerError;

/// What to run.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[String]) -> Self {
        Self {
            program: program.into(),
            args: args.to_vec(),
            stdin: None,
            cwd: None,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Result of one subprocess run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentOutcome {
    /// `None` when the process was killed on timeout.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl AgentOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// stdout followed by stderr, for signal scanning.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Short failure description for errors and logs.
    pub fn failure_detail(&self) -> String {
        if self.timed_out {
            return format!("timed out after {:.0}s", self.duration.as_secs_f64());
        }
        let tail = last_lines(&self.stderr, 5);
        if tail.is_empty() {
            last_lines(&self.stdout, 5)
        } else {
            tail
        }
    }

    fn synthetic(exit_code: i32, message: String) -> Self {
        Self {
            exit_code: Some(exit_code),
            stderr: message,
            ..Default::default()
        }
    }
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

fn drain<R>(reader: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut out = String::new();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    out.push_str(&line);
                    out.push('\n');
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "Stopped reading child output");
                    break;
                }
            }
        }
        out
    })
}

#[cfg(unix)]
fn exit_code_of(status: std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
}

#[cfg(not(unix))]
fn exit_code_of(status: std::process::ExitStatus) -> Option<i32> {
    status.code()
}

/// Run a command to completion or timeout.
///
/// A missing binary or a permission error at spawn time is reported as a
/// normal outcome with exit code 127 or 126, matching what a shell returns.
pub async fn run_command(spec: &CommandSpec) -> Result<AgentOutcome, RunnerError> {
    let start = Instant::now();
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(ref cwd) = spec.cwd {
        cmd.current_dir(cwd);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(AgentOutcome::synthetic(
                127,
                format!("{}: command not found", spec.program),
            ));
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Ok(AgentOutcome::synthetic(
                126,
                format!("{}: permission denied", spec.program),
            ));
        }
        Err(source) => {
            return Err(RunnerError::Spawn {
                program: spec.program.clone(),
                source,
            });
        }
    };
    debug!(command = %spec.display(), pid = child.id().unwrap_or(0), "Spawned");

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    if let (Some(mut stdin), Some(input)) = (child.stdin.take(), spec.stdin.clone()) {
        let program = spec.program.clone();
        tokio::spawn(async move {
            // a child that exits without reading stdin yields EPIPE here
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                debug!(%program, error = %e, "Failed to write prompt to stdin");
            }
            let _ = stdin.shutdown().await;
        });
    }

    let (exit_code, timed_out) = match tokio::time::timeout(spec.timeout, child.wait()).await {
        Ok(Ok(status)) => (exit_code_of(status), false),
        Ok(Err(source)) => {
            return Err(RunnerError::Io {
                program: spec.program.clone(),
                source,
            });
        }
        Err(_) => {
            warn!(command = %spec.display(), timeout_secs = spec.timeout.as_secs(), "Command timed out; killing");
            if let Err(e) = child.kill().await {
                debug!(error = %e, "Kill after timeout failed");
            }
            (None, true)
        }
    };

    let duration = start.elapsed();
    let stdout = collect(stdout, timed_out).await;
    let stderr = collect(stderr, timed_out).await;

    Ok(AgentOutcome {
        exit_code,
        timed_out,
        stdout,
        stderr,
        duration,
    })
}

/// Join a drain task. After a timeout, grandchildren may still hold the pipe
/// open, so the wait is bounded.
async fn collect(handle: Option<JoinHandle<String>>, timed_out: bool) -> String {
    let Some(mut handle) = handle else {
        return String::new();
    };
    if !timed_out {
        return handle.await.unwrap_or_default();
    }
    match tokio::time::timeout(Duration::from_secs(1), &mut handle).await {
        Ok(joined) => joined.unwrap_or_default(),
        Err(_) => {
            handle.abort();
            String::new()
        }
    }
}
