//! External command execution with streamed output

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::errors::DeployError;
use crate::logstream::ProgressSink;
use crate::models::LogSeverity;

/// What a finished command printed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Last `max_chars` characters of stderr, or of stdout when stderr is empty
    pub fn error_tail(&self, max_chars: usize) -> String {
        let text = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let count = text.chars().count();
        text.chars().skip(count.saturating_sub(max_chars)).collect()
    }
}

/// A command line to run in a directory
#[derive(Debug, Clone)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

impl CommandLine {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            envs: Vec::new(),
        }
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Run `line` in `cwd`, forwarding each output line to `sink`. The process
/// is killed when `timeout` elapses.
pub async fn run_command(
    line: &CommandLine,
    cwd: &Path,
    timeout: Duration,
    sink: &dyn ProgressSink,
) -> Result<CommandOutput, DeployError> {
    sink.info(format!("$ {}", line.display())).await;

    let mut child = Command::new(&line.program)
        .args(&line.args)
        .envs(line.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| DeployError::CommandError(format!("Failed to run {}: {}", line.program, e)))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let execution = async {
        let (out, err) = tokio::join!(
            pump(stdout, LogSeverity::Info, "", sink),
            pump(stderr, LogSeverity::Warning, "[stderr] ", sink),
        );
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((status, out, err))
    };

    match tokio::time::timeout(timeout, execution).await {
        Ok(Ok((status, out, err))) => {
            debug!("{} exited with {:?}", line.program, status.code());
            Ok(CommandOutput {
                success: status.success(),
                code: status.code(),
                stdout: out.join("\n"),
                stderr: err.join("\n"),
            })
        }
        Ok(Err(e)) => Err(DeployError::CommandError(format!(
            "Failed waiting for {}: {}",
            line.program, e
        ))),
        Err(_) => Err(DeployError::CommandError(format!(
            "Command timed out after {}s: {}",
            timeout.as_secs(),
            line.display()
        ))),
    }
}

async fn pump<R: AsyncRead + Unpin>(
    reader: Option<R>,
    level: LogSeverity,
    prefix: &str,
    sink: &dyn ProgressSink,
) -> Vec<String> {
    let mut collected = Vec::new();
    let Some(reader) = reader else {
        return collected;
    };

    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            sink.emit(level, format!("  {}{}", prefix, line)).await;
        }
        collected.push(line);
    }
    collected
}
