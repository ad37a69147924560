use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout, Command};

use crate::error::{Error, Result};
use crate::ringbuffer::RingBuffer;

/// Line kubectl appends to stderr when a command run through `exec` fails.
/// The exit code is already reported by the error itself.
const EXIT_CODE_NOISE: &[u8] = b"command terminated with exit code";

/// Default number of output bytes kept for error reports.
pub const DEFAULT_CAPTURE_BYTES: usize = 4096;

// ── invocation ────────────────────────────────────────────────────────────────

/// One subprocess call: program, arguments and how to run it.
#[derive(Debug, Clone)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    stdin: Option<Vec<u8>>,
    timeout: Option<Duration>,
    level: log::Level,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            timeout: None,
            level: log::Level::Debug,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Bytes fed to the child's standard input.
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Kills the child and fails with [`Error::CommandTimedOut`] past `limit`.
    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Level used to log the command line. Tight polling loops use `Trace`.
    pub fn level(mut self, level: log::Level) -> Self {
        self.level = level;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Program and arguments joined with spaces, for logs and matching.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

// ── runner ────────────────────────────────────────────────────────────────────

/// Runs external programs. Every cluster, container engine and helm call goes
/// through this seam.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Resolves `program` on the search path.
    fn lookup(&self, program: &str) -> Option<PathBuf>;

    /// Runs the invocation to completion and returns its standard output.
    ///
    /// A non-zero exit fails with [`Error::CommandFailed`] carrying the tail of
    /// the combined output.
    async fn run(&self, invocation: &Invocation) -> Result<Vec<u8>>;
}

/// Runs `invocation` and returns its standard output as text.
pub async fn run_text(runner: &dyn CommandRunner, invocation: &Invocation) -> Result<String> {
    let out = runner.run(invocation).await?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

pub fn is_installed(runner: &dyn CommandRunner, program: &str) -> bool {
    runner.lookup(program).is_some()
}

/// [`CommandRunner`] spawning real processes with tokio.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    capture_bytes: usize,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new(DEFAULT_CAPTURE_BYTES)
    }
}

impl SystemRunner {
    /// `capture_bytes` bounds the output kept for error reports.
    pub fn new(capture_bytes: usize) -> Self {
        Self {
            capture_bytes: capture_bytes.max(1),
        }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    fn lookup(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }

    async fn run(&self, invocation: &Invocation) -> Result<Vec<u8>> {
        log::log!(invocation.level, "exec: {invocation}");

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let (Some(input), Some(mut stdin)) = (invocation.stdin.clone(), child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&input).await {
                    log::debug!("exec: failed to write stdin: {e}");
                }
                // Dropping stdin closes the pipe so the child sees EOF.
            });
        }

        // Both streams feed one tail buffer, like a terminal would show them.
        let tail = Arc::new(RingBuffer::new(self.capture_bytes));
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("child stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("child stderr was not captured"))?;
        let stdout_task = tokio::spawn(drain_stdout(stdout, Arc::clone(&tail)));
        let stderr_task = tokio::spawn(drain_stderr(stderr, Arc::clone(&tail)));

        let finished = async {
            let status = child.wait().await?;
            let out = stdout_task.await.map_err(io::Error::other)??;
            stderr_task.await.map_err(io::Error::other)??;
            Ok::<_, Error>((status, out))
        };

        let (status, out) = match invocation.timeout {
            Some(limit) => tokio::time::timeout(limit, finished)
                .await
                .map_err(|_| Error::CommandTimedOut {
                    program: invocation.program.clone(),
                    timeout: limit,
                })??,
            None => finished.await?,
        };

        if !status.success() {
            return Err(Error::CommandFailed {
                program: invocation.program.clone(),
                exit_code: status.code(),
                output_tail: tail.tail_string(),
            });
        }
        Ok(out)
    }
}

async fn drain_stdout(mut stdout: ChildStdout, tail: Arc<RingBuffer>) -> io::Result<Vec<u8>> {
    let mut collected = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = stdout.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        tail.push(&buf[..n]);
        collected.extend_from_slice(&buf[..n]);
    }
    Ok(collected)
}

async fn drain_stderr(stderr: ChildStderr, tail: Arc<RingBuffer>) -> io::Result<()> {
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        if is_exit_code_noise(&line) {
            continue;
        }
        log::trace!("exec: stderr: {}", String::from_utf8_lossy(&line).trim_end());
        tail.push(&line);
    }
    Ok(())
}

fn is_exit_code_noise(line: &[u8]) -> bool {
    line.starts_with(EXIT_CODE_NOISE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_joins_arguments() {
        let inv = Invocation::new("kubectl")
            .args(["get", "pod"])
            .arg("-A")
            .level(log::Level::Trace);
        assert_eq!(inv.command_line(), "kubectl get pod -A");
        assert_eq!(inv.to_string(), "kubectl get pod -A");
        assert_eq!(inv.program(), "kubectl");
        assert_eq!(inv.arguments().len(), 3);
    }

    #[test]
    fn only_the_exit_code_line_is_noise() {
        assert!(is_exit_code_noise(b"command terminated with exit code 3\n"));
        assert!(!is_exit_code_noise(b"error: command terminated with exit code 3\n"));
        assert!(!is_exit_code_noise(b"Error from server (NotFound)\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout_of_successful_command() {
        let runner = SystemRunner::default();
        let out = run_text(&runner, &Invocation::new("sh").args(["-c", "printf hello"]))
            .await
            .unwrap();
        assert_eq!(out, "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failure_carries_exit_code_and_filtered_tail() {
        let runner = SystemRunner::new(64);
        let script = "echo partial; echo 'boom' >&2; \
                      echo 'command terminated with exit code 7' >&2; exit 7";
        let err = runner
            .run(&Invocation::new("sh").args(["-c", script]))
            .await
            .unwrap_err();
        match err {
            Error::CommandFailed {
                program,
                exit_code,
                output_tail,
            } => {
                assert_eq!(program, "sh");
                assert_eq!(exit_code, Some(7));
                assert!(output_tail.contains("boom"));
                assert!(!output_tail.contains("command terminated"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn tail_is_bounded_by_capture_size() {
        let runner = SystemRunner::new(8);
        let err = runner
            .run(&Invocation::new("sh").args(["-c", "echo 0123456789abcdef >&2; exit 1"]))
            .await
            .unwrap_err();
        match err {
            Error::CommandFailed { output_tail, .. } => assert_eq!(output_tail, "9abcdef"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdin_is_forwarded() {
        let runner = SystemRunner::default();
        let out = run_text(&runner, &Invocation::new("cat").stdin("piped input"))
            .await
            .unwrap();
        assert_eq!(out, "piped input");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let runner = SystemRunner::default();
        let err = runner
            .run(
                &Invocation::new("sleep")
                    .arg("5")
                    .timeout(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandTimedOut { .. }));
    }

    #[test]
    fn lookup_misses_unknown_programs() {
        let runner = SystemRunner::default();
        assert!(!is_installed(&runner, "podlift-no-such-binary"));
    }
}
