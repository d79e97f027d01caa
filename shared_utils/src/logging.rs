//! Logging
//!
//! tracing-based logging shared by every binary in the workspace:
//! - a daily-rotated log file in the system temp directory (or a configured one)
//! - a compact stderr layer, quiet by default and verbose on request
//! - structured records of every external tool invocation
//!
//! # Examples
//!
//! ```no_run
//! use shared_utils::logging::{LogConfig, init_logging};
//! use tracing::info;
//!
//! init_logging("vid_gif", LogConfig::default()).expect("Failed to initialize logging");
//! info!(input = "clip.mov", "Probing upload");
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory holding the log files (system temp dir by default).
    pub log_dir: PathBuf,
    /// Number of rotated log files kept for a program.
    pub max_files: usize,
    /// Level for the file layer and for the program's own targets.
    pub level: Level,
    /// Level printed to stderr.
    pub stderr_level: Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: std::env::temp_dir(),
            max_files: 5,
            level: Level::INFO,
            stderr_level: Level::WARN,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.log_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_max_files(mut self, count: usize) -> Self {
        self.max_files = count;
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_stderr_level(mut self, level: Level) -> Self {
        self.stderr_level = level;
        self
    }

    /// Default directive when `RUST_LOG` is unset: the program's own crate
    /// plus `shared_utils`, where process execution is logged.
    pub fn default_directive(&self, program_name: &str) -> String {
        let level = self.level.as_str().to_ascii_lowercase();
        format!("{program_name}={level},shared_utils={level}")
    }
}

/// Install the global subscriber.
///
/// Log files are named `{program_name}.log.YYYY-MM-DD`. Must be called at
/// most once per process.
pub fn init_logging(program_name: &str, config: LogConfig) -> Result<()> {
    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("Failed to create log directory: {:?}", config.log_dir))?;

    let log_file_name = format!("{}.log", program_name);
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &config.log_dir, &log_file_name);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive(program_name)));

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true);

    let stderr_level = config.stderr_level;
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr.with_max_level(stderr_level))
        .with_ansi(true)
        .with_target(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!(
        program = program_name,
        log_dir = ?config.log_dir,
        log_file = log_file_name,
        max_files = config.max_files,
        level = ?config.level,
        "Logging system initialized"
    );

    cleanup_old_logs(&config.log_dir, program_name, config.max_files)?;

    Ok(())
}

/// Keep only the `max_files` most recent log files of `program_name`.
fn cleanup_old_logs(log_dir: &Path, program_name: &str, max_files: usize) -> Result<()> {
    use std::fs;

    let entries = fs::read_dir(log_dir)
        .with_context(|| format!("Failed to read log directory: {:?}", log_dir))?;

    let prefix = format!("{}.log", program_name);
    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with(&prefix))
            .unwrap_or(false);
        if !matches {
            continue;
        }
        if let Ok(modified) = fs::metadata(&path).and_then(|m| m.modified()) {
            log_files.push((path, modified));
        }
    }

    if log_files.len() > max_files {
        log_files.sort_by(|a, b| b.1.cmp(&a.1));
        for (path, _) in log_files.iter().skip(max_files) {
            match fs::remove_file(path) {
                Ok(()) => tracing::debug!(path = ?path, "Removed old log file"),
                Err(e) => tracing::warn!(path = ?path, error = %e, "Failed to remove old log file"),
            }
        }
    }

    Ok(())
}

/// Record one external tool invocation.
///
/// Successful runs log the command at info and the tool output at debug;
/// failures log everything at error.
///
/// ```no_run
/// use shared_utils::logging::log_external_tool;
/// use std::time::Duration;
///
/// log_external_tool(
///     "ffmpeg",
///     &["-i", "input.mp4", "output.mp4"],
///     "ffmpeg output...",
///     Some(0),
///     Duration::from_secs(10),
/// );
/// ```
pub fn log_external_tool(
    tool_name: &str,
    args: &[&str],
    output: &str,
    exit_code: Option<i32>,
    duration: Duration,
) {
    let command = format!("{} {}", tool_name, args.join(" "));

    match exit_code {
        Some(0) => {
            tracing::info!(
                tool = tool_name,
                command = %command,
                duration_secs = duration.as_secs_f64(),
                exit_code = 0,
                "External tool completed successfully"
            );
            tracing::debug!(tool = tool_name, output = %output, "External tool output");
        }
        Some(code) => {
            tracing::error!(
                tool = tool_name,
                command = %command,
                duration_secs = duration.as_secs_f64(),
                exit_code = code,
                output = %output,
                "External tool failed"
            );
        }
        None => {
            tracing::error!(
                tool = tool_name,
                command = %command,
                duration_secs = duration.as_secs_f64(),
                output = %output,
                "External tool terminated without exit code"
            );
        }
    }
}

/// Record the end of a pipeline stage.
pub fn log_operation_end(operation: &str, duration: Duration, success: bool) {
    if success {
        tracing::info!(
            operation = operation,
            duration_secs = duration.as_secs_f64(),
            "Operation completed successfully"
        );
    } else {
        tracing::warn!(
            operation = operation,
            duration_secs = duration.as_secs_f64(),
            "Operation failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.max_files, 5);
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.stderr_level, Level::WARN);
    }

    #[test]
    fn test_log_config_builder() {
        let temp_dir = TempDir::new().unwrap();
        let config = LogConfig::new()
            .with_log_dir(temp_dir.path())
            .with_max_files(3)
            .with_level(Level::DEBUG)
            .with_stderr_level(Level::INFO);

        assert_eq!(config.log_dir, temp_dir.path());
        assert_eq!(config.max_files, 3);
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.stderr_level, Level::INFO);
    }

    #[test]
    fn test_default_directive_covers_shared_utils() {
        let directive = LogConfig::new()
            .with_level(Level::DEBUG)
            .default_directive("vid_gif");
        assert_eq!(directive, "vid_gif=debug,shared_utils=debug");
    }

    #[test]
    fn test_cleanup_old_logs() {
        let temp_dir = TempDir::new().unwrap();
        let program_name = "test_program";

        for i in 0..10 {
            let file_path = temp_dir
                .path()
                .join(format!("{}.log.2026-01-{:02}", program_name, i + 1));
            fs::write(&file_path, format!("log content {}", i)).unwrap();
            std::thread::sleep(Duration::from_millis(10));
        }
        fs::write(temp_dir.path().join("other.log"), "keep").unwrap();

        cleanup_old_logs(temp_dir.path(), program_name, 3).unwrap();

        let remaining: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(program_name))
            .collect();
        assert_eq!(remaining.len(), 3);
        assert!(temp_dir.path().join("other.log").exists());
    }

    #[test]
    fn test_log_external_tool_accepts_all_outcomes() {
        log_external_tool("ffmpeg", &["-version"], "ok", Some(0), Duration::from_millis(5));
        log_external_tool("ffmpeg", &["-i", "x"], "boom", Some(1), Duration::from_millis(5));
        log_external_tool("ffmpeg", &[], "", None, Duration::from_millis(5));
    }
}
