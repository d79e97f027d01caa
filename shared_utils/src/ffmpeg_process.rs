//! FFmpeg/FFprobe process management
//!
//! ## Pipe deadlock
//!
//! When both stdout and stderr are piped but only one is read, a chatty
//! ffmpeg fills the other pipe buffer (~64KB) and blocks forever. Both
//! streams are therefore drained by dedicated threads while the caller polls
//! the child for completion, timeout or cancellation.
//!
//! ## Killing
//!
//! On unix the child leads its own process group, and timeout/cancel kill
//! the whole group. A wrapper script's grandchild would otherwise keep the
//! pipes open after the child dies. Reader threads are joined against a
//! deadline and detached if it passes.
//!
//! ## Usage
//!
//! ```ignore
//! use shared_utils::ffmpeg_process::{run_tool, RunLimits};
//! use std::time::Duration;
//!
//! let limits = RunLimits::new(Duration::from_secs(60));
//! let outcome = run_tool(Path::new("ffmpeg"), &args, &limits, None)?;
//! ```

use crate::cancel::CancellationToken;
use crate::logging::log_external_tool;
use anyhow::{Context, Result};
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Poll interval while waiting on a child process.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How long reader threads may keep draining after a kill.
const KILL_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Receives encode progress as a fraction in `0.0..=1.0`.
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Routes `-progress pipe:1` output of an encode to a callback.
#[derive(Clone)]
pub struct ProgressSink {
    pub total_duration: f64,
    pub callback: ProgressCallback,
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSink")
            .field("total_duration", &self.total_duration)
            .finish_non_exhaustive()
    }
}

/// Wall-clock ceiling and cancellation flag for one invocation.
#[derive(Debug, Clone)]
pub struct RunLimits {
    pub timeout: Duration,
    pub token: CancellationToken,
}

impl RunLimits {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            token: CancellationToken::new(),
        }
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }
}

/// How a supervised process ended.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// The process exited on its own (successfully or not).
    Completed {
        status: ExitStatus,
        stdout: String,
        stderr: String,
        elapsed: Duration,
    },
    /// The deadline passed; the process was killed.
    TimedOut { stderr: String, elapsed: Duration },
    /// The token was cancelled; the process was killed.
    Cancelled { stderr: String },
}

impl ProcessOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessOutcome::Completed { status, .. } if status.success())
    }
}

// ═══════════════════════════════════════════════════════════════
// FfmpegProcess - child with drained stdout/stderr
// ═══════════════════════════════════════════════════════════════

/// Child process whose stdout and stderr are consumed by background threads.
pub struct FfmpegProcess {
    child: Child,
    stdout_thread: Option<JoinHandle<String>>,
    stderr_thread: Option<JoinHandle<String>>,
}

impl FfmpegProcess {
    /// Spawn `cmd` with piped output.
    ///
    /// When `progress` is given, stdout is parsed line by line as ffmpeg
    /// `-progress` key/value output and forwarded to the callback.
    pub fn spawn(cmd: &mut Command, progress: Option<ProgressSink>) -> Result<Self> {
        let command_str = format!("{:?}", cmd);
        info!(command = %command_str, "Executing external command");

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn process: {}", command_str))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow::anyhow!("Failed to capture process stderr"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("Failed to capture process stdout"))?;

        let stderr_thread = thread::spawn(move || {
            let mut buf = String::new();
            let reader = BufReader::new(stderr);
            for line in reader.lines().map_while(std::result::Result::ok) {
                buf.push_str(&line);
                buf.push('\n');
            }
            buf
        });

        let stdout_thread = thread::spawn(move || match progress {
            Some(sink) => {
                let mut parser = FfmpegProgressParser::with_duration(sink.total_duration);
                let mut buf = String::new();
                for line in BufReader::new(stdout).lines().map_while(std::result::Result::ok) {
                    if let Some(fraction) = parser.parse_line(&line) {
                        (sink.callback)(fraction);
                    }
                    buf.push_str(&line);
                    buf.push('\n');
                }
                buf
            }
            None => {
                let mut buf = String::new();
                let mut reader = BufReader::new(stdout);
                if let Err(e) = reader.read_to_string(&mut buf) {
                    warn!(error = %e, "Failed to read process stdout");
                }
                buf
            }
        });

        Ok(Self {
            child,
            stdout_thread: Some(stdout_thread),
            stderr_thread: Some(stderr_thread),
        })
    }

    /// Wait until the child exits, the deadline passes or the token fires.
    pub fn wait_with_limits(mut self, limits: &RunLimits) -> Result<ProcessOutcome> {
        let started = Instant::now();
        loop {
            if limits.token.is_cancelled() {
                self.terminate();
                let (_, stderr) = self.collect_output(Instant::now() + KILL_DRAIN_GRACE);
                return Ok(ProcessOutcome::Cancelled { stderr });
            }
            if started.elapsed() >= limits.timeout {
                self.terminate();
                let (_, stderr) = self.collect_output(Instant::now() + KILL_DRAIN_GRACE);
                return Ok(ProcessOutcome::TimedOut {
                    stderr,
                    elapsed: started.elapsed(),
                });
            }
            match self
                .child
                .try_wait()
                .context("Failed to check process status")?
            {
                Some(status) => {
                    // a leftover grandchild may still hold the pipes open
                    let deadline = (started + limits.timeout).max(Instant::now())
                        + KILL_DRAIN_GRACE;
                    let (stdout, stderr) = self.collect_output(deadline);
                    return Ok(ProcessOutcome::Completed {
                        status,
                        stdout,
                        stderr,
                        elapsed: started.elapsed(),
                    });
                }
                None => thread::sleep(POLL_INTERVAL),
            }
        }
    }

    fn terminate(&mut self) {
        #[cfg(unix)]
        {
            // the child is its own group leader, so its pid is the group id
            let pgid = self.child.id() as libc::pid_t;
            // SAFETY: killpg only sends a signal; a stale group id fails with ESRCH
            if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
                debug!(
                    error = %std::io::Error::last_os_error(),
                    "Process group already gone before kill"
                );
            }
        }
        if let Err(e) = self.child.kill() {
            debug!(error = %e, "Process already exited before kill");
        }
        if let Err(e) = self.child.wait() {
            warn!(error = %e, "Failed to reap killed process");
        }
    }

    fn collect_output(&mut self, deadline: Instant) -> (String, String) {
        let stdout = join_until(self.stdout_thread.take(), deadline, "stdout");
        let stderr = join_until(self.stderr_thread.take(), deadline, "stderr");
        (stdout, stderr)
    }
}

/// Join a reader thread, or detach it once `deadline` passes.
fn join_until(handle: Option<JoinHandle<String>>, deadline: Instant, stream: &str) -> String {
    let Some(handle) = handle else {
        return String::new();
    };
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!(stream, "Reader still blocked after exit, detaching");
            return String::new();
        }
        thread::sleep(POLL_INTERVAL);
    }
    handle.join().unwrap_or_default()
}

/// Run `program args...` under `limits` and log the result.
///
/// Spawn failures (missing binary, permissions) are returned as `Err`;
/// everything after a successful spawn is described by [`ProcessOutcome`].
pub fn run_tool(
    program: &Path,
    args: &[String],
    limits: &RunLimits,
    progress: Option<ProgressSink>,
) -> Result<ProcessOutcome> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    let process = FfmpegProcess::spawn(&mut cmd, progress)?;
    let outcome = process.wait_with_limits(limits)?;

    let tool_name = program.to_string_lossy();
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    match &outcome {
        ProcessOutcome::Completed {
            status,
            stderr,
            elapsed,
            ..
        } => log_external_tool(&tool_name, &arg_refs, stderr, status.code(), *elapsed),
        ProcessOutcome::TimedOut { stderr, elapsed } => {
            warn!(
                tool = %tool_name,
                timeout_secs = limits.timeout.as_secs_f64(),
                "External tool timed out and was killed"
            );
            log_external_tool(&tool_name, &arg_refs, stderr, None, *elapsed);
        }
        ProcessOutcome::Cancelled { .. } => {
            info!(tool = %tool_name, "External tool cancelled");
        }
    }
    Ok(outcome)
}

// ═══════════════════════════════════════════════════════════════
// FfmpegProgressParser
// ═══════════════════════════════════════════════════════════════

/// Parses ffmpeg progress output.
///
/// Understands the `-progress` key/value lines (`out_time_us=`,
/// `out_time=`, `progress=`) and the classic `time=` stats key.
#[derive(Debug, Clone)]
pub struct FfmpegProgressParser {
    total_duration: f64,
    current_time: f64,
    finished: bool,
}

impl FfmpegProgressParser {
    pub fn with_duration(total_duration: f64) -> Self {
        Self {
            total_duration,
            current_time: 0.0,
            finished: false,
        }
    }

    /// Feed one line; returns the progress fraction when it can be computed.
    pub fn parse_line(&mut self, line: &str) -> Option<f64> {
        let line = line.trim();
        let (key, value) = line.split_once('=')?;
        let value = value.trim();

        match key.trim() {
            "out_time_us" | "out_time_ms" => {
                // ffmpeg reports both keys in microseconds
                if let Ok(us) = value.parse::<i64>() {
                    if us >= 0 {
                        self.current_time = us as f64 / 1_000_000.0;
                    }
                }
            }
            "out_time" | "time" => {
                if let Some(time) = Self::parse_time(value) {
                    self.current_time = time;
                }
            }
            // closes every progress block: `continue` or `end`
            "progress" => {
                if value == "end" {
                    self.finished = true;
                }
            }
            _ => return None,
        }

        self.calculate_progress()
    }

    /// Parse `HH:MM:SS.micro`.
    fn parse_time(time_str: &str) -> Option<f64> {
        let parts: Vec<&str> = time_str.split(':').collect();
        if parts.len() != 3 {
            return None;
        }

        let hours: f64 = parts[0].parse().ok()?;
        let minutes: f64 = parts[1].parse().ok()?;
        let seconds: f64 = parts[2].parse().ok()?;

        Some(hours * 3600.0 + minutes * 60.0 + seconds)
    }

    fn calculate_progress(&self) -> Option<f64> {
        if self.finished {
            return Some(1.0);
        }

        if self.total_duration > 0.0 && self.current_time > 0.0 {
            return Some((self.current_time / self.total_duration).min(1.0));
        }

        None
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }
}

// ═══════════════════════════════════════════════════════════════
// Error formatting
// ═══════════════════════════════════════════════════════════════

/// Condense ffmpeg stderr to its most meaningful line.
///
/// 1. Prefer the last line mentioning "Error"/"error"
/// 2. Otherwise the last non-empty line that is not a stats line
/// 3. Otherwise "Unknown FFmpeg error"
pub fn format_ffmpeg_error(stderr: &str) -> String {
    if let Some(error_line) = stderr
        .lines()
        .rev()
        .find(|line| line.contains("Error") || line.contains("error"))
    {
        return error_line.trim().to_string();
    }

    stderr
        .lines()
        .rev()
        .find(|line| {
            let trimmed = line.trim();
            !trimmed.is_empty()
                && !trimmed.starts_with("frame=")
                && !trimmed.starts_with("fps=")
                && !trimmed.starts_with("size=")
        })
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "Unknown FFmpeg error".to_string())
}

/// Map common ffmpeg failure patterns to an actionable hint.
pub fn get_error_suggestion(stderr: &str) -> Option<String> {
    let patterns = [
        ("No such file or directory", "Check that the input file still exists"),
        ("Invalid data found", "The upload may be corrupted or not a video"),
        ("moov atom not found", "The MP4 upload is incomplete; upload it again"),
        ("Unknown encoder", "Install an ffmpeg build with libx264 enabled"),
        ("Permission denied", "Check read/write permissions of the work directory"),
        (
            "Unrecognized option",
            "The installed ffmpeg is too old for this option; upgrade ffmpeg",
        ),
        (
            "height not divisible by 2",
            "Odd frame dimensions cannot be encoded as yuv420p",
        ),
        (
            "width not divisible by 2",
            "Odd frame dimensions cannot be encoded as yuv420p",
        ),
        ("Output file is empty", "No frames were encoded; widen the trim range"),
    ];

    patterns
        .iter()
        .find(|(pattern, _)| stderr.contains(pattern))
        .map(|(_, suggestion)| suggestion.to_string())
}

// ═══════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════


// ═══════════════════════════════════════════════════════════════
// Property tests
// ═══════════════════════════════════════════════════════════════
