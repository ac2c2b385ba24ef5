//! Builder for executing external tool commands with timeout support.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::time::Instant;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Number of diagnostic stderr lines kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8). Empty for streaming runs.
    pub stdout: String,
    /// Captured standard error (lossy UTF-8). For streaming runs only the
    /// last diagnostic lines are kept.
    pub stderr: String,
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use vf_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> vf_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffprobe"))
///     .arg("-v").arg("error")
///     .arg("-show_entries").arg("format=duration")
///     .arg("/path/to/video.mp4")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    soft_timeout: Option<Duration>,
}

/// `key=value` lines emitted by `-progress`; everything else is diagnostic.
fn is_progress_line(line: &str) -> bool {
    match line.split_once('=') {
        Some((key, _)) => {
            !key.is_empty()
                && key
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        }
        None => false,
    }
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            soft_timeout: None,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time. The process is killed once it
    /// elapses.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// For [`execute_streaming`](Self::execute_streaming): after `d`, write
    /// `q` to the process's stdin asking it to finish up.
    pub fn soft_timeout(&mut self, d: Duration) -> &mut Self {
        self.soft_timeout = Some(d);
        self
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// - Returns [`vf_core::Error::Tool`] if the process times out (message
    ///   includes the timeout duration).
    /// - Returns [`vf_core::Error::Tool`] if the process exits with a non-zero
    ///   status (message includes stderr).
    /// - Returns [`vf_core::Error::Tool`] if spawning the process fails.
    pub async fn execute(&self) -> vf_core::Result<ToolOutput> {
        let program_name = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| vf_core::Error::tool(&program_name, format!("failed to spawn: {e}")))?;

        // On timeout the future (and with it the child) is dropped, and
        // kill_on_drop reaps the process.
        let result = tokio::time::timeout(self.timeout, child.wait_with_output()).await;

        match result {
            Ok(Ok(output)) => {
                let tool_output = ToolOutput {
                    status: output.status,
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };

                if !output.status.success() {
                    return Err(vf_core::Error::tool(
                        program_name,
                        format!(
                            "exited with status {}: {}",
                            output.status,
                            tool_output.stderr.trim()
                        ),
                    ));
                }

                Ok(tool_output)
            }
            Ok(Err(e)) => Err(vf_core::Error::tool(
                program_name,
                format!("I/O error waiting for process: {e}"),
            )),
            Err(_elapsed) => Err(vf_core::Error::tool(
                program_name,
                format!("timed out after {:?}", self.timeout),
            )),
        }
    }

    /// Execute the command, handing every stderr line to `on_stderr_line`
    /// as it arrives.
    ///
    /// Stdout is discarded. When a soft timeout is set and elapses, `q` is
    /// written to stdin; the run then fails even if the process exits
    /// cleanly. When the hard timeout elapses the process is killed.
    pub async fn execute_streaming(
        &self,
        mut on_stderr_line: impl FnMut(&str),
    ) -> vf_core::Result<ToolOutput> {
        let program_name = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| vf_core::Error::tool(&program_name, format!("failed to spawn: {e}")))?;

        let mut stdin = child.stdin.take();
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| vf_core::Error::tool(&program_name, "stderr was not captured"))?;
        let mut lines = BufReader::new(stderr).lines();

        let started = Instant::now();
        let hard_deadline = started + self.timeout;
        let soft_deadline = self.soft_timeout.map(|d| started + d);
        let mut soft_stopped = false;
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut stderr_open = true;

        let status = loop {
            let soft_pending = !soft_stopped && soft_deadline.is_some();
            let soft_at = soft_deadline.unwrap_or(hard_deadline);

            tokio::select! {
                line = lines.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => {
                        on_stderr_line(&line);
                        if !is_progress_line(&line) && !line.trim().is_empty() {
                            if tail.len() == STDERR_TAIL_LINES {
                                tail.pop_front();
                            }
                            tail.push_back(line);
                        }
                    }
                    Ok(None) => stderr_open = false,
                    Err(e) => {
                        tracing::warn!(tool = %program_name, "Error reading stderr: {e}");
                        stderr_open = false;
                    }
                },
                status = child.wait(), if !stderr_open => {
                    break status.map_err(|e| {
                        vf_core::Error::tool(&program_name, format!("I/O error waiting for process: {e}"))
                    })?;
                }
                _ = tokio::time::sleep_until(soft_at), if soft_pending => {
                    tracing::warn!(
                        tool = %program_name,
                        elapsed_secs = started.elapsed().as_secs(),
                        "Soft timeout reached; asking process to stop"
                    );
                    soft_stopped = true;
                    if let Some(mut pipe) = stdin.take() {
                        // The process may already be gone; a broken pipe is fine.
                        let _ = pipe.write_all(b"q\n").await;
                        let _ = pipe.flush().await;
                    }
                }
                _ = tokio::time::sleep_until(hard_deadline) => {
                    tracing::error!(tool = %program_name, "Hard timeout reached; killing process");
                    let _ = child.kill().await;
                    return Err(vf_core::Error::tool(
                        program_name,
                        format!("killed after hard timeout of {:?}", self.timeout),
                    ));
                }
            }
        };

        let stderr_tail = tail.into_iter().collect::<Vec<_>>().join("\n");

        if soft_stopped {
            return Err(vf_core::Error::tool(
                program_name,
                format!(
                    "stopped after soft timeout of {:?}",
                    self.soft_timeout.unwrap_or_default()
                ),
            ));
        }

        if !status.success() {
            return Err(vf_core::Error::tool(
                program_name,
                format!("exited with status {status}: {}", stderr_tail.trim()),
            ));
        }

        Ok(ToolOutput {
            status,
            stdout: String::new(),
            stderr: stderr_tail,
        })
    }
}
