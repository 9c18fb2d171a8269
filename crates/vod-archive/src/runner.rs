//! Execution of generated commands as child processes.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, warn};

use crate::command::GeneratedCommand;
use crate::{Error, Result};

/// Number of trailing stderr lines kept for error reports.
pub const STDERR_TAIL_LINES: usize = 20;

/// How a child process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
    /// Human-readable exit description ("exit code 1", "terminated by signal 9").
    pub description: String,
    /// Last lines the child wrote to stderr.
    pub stderr_tail: Vec<String>,
    /// Wall-clock run time.
    pub elapsed: Duration,
}

impl ExitOutcome {
    /// An outcome with the given exit code and no output; handy for fakes.
    pub fn from_code(code: i32) -> Self {
        Self {
            code: Some(code),
            description: format!("exit code {}", code),
            stderr_tail: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Exit outcome plus everything the child printed on stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub outcome: ExitOutcome,
    pub stdout: String,
}

/// Runs generated commands. The real implementation spawns processes; tests
/// substitute fakes so command generation is checked without any binaries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion, streaming output into the log.
    async fn run(&self, command: &GeneratedCommand, cwd: &Path) -> Result<ExitOutcome>;

    /// Run to completion and return stdout.
    async fn capture(&self, command: &GeneratedCommand, cwd: &Path) -> Result<CapturedOutput>;
}

/// [`ProcessRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }

    async fn execute(
        &self,
        command: &GeneratedCommand,
        cwd: &Path,
        keep_stdout: bool,
    ) -> Result<CapturedOutput> {
        let start = Instant::now();

        let mut cmd = process_utils::tokio_command(command.program());
        cmd.args(command.args())
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(cwd = %cwd.display(), "Spawning: {}", command);

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            program: command.program().to_string(),
            source,
        })?;

        let stdout_task = child
            .stdout
            .take()
            .map(|stdout| tokio::spawn(drain_stdout(stdout, keep_stdout)));
        let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(drain_stderr(stderr)));

        let status = child.wait().await?;

        // Readers finish once the child closes its pipes.
        let stdout = match stdout_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        let stderr_tail = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };

        let outcome = ExitOutcome {
            code: status.code(),
            description: process_utils::describe_exit(&status),
            stderr_tail,
            elapsed: start.elapsed(),
        };

        debug!(
            program = command.program(),
            elapsed_secs = outcome.elapsed.as_secs_f64(),
            "Process finished with {}",
            outcome.description
        );

        Ok(CapturedOutput { outcome, stdout })
    }
}

async fn drain_stdout<R>(reader: R, keep: bool) -> String
where
    R: AsyncRead + Unpin,
{
    let mut collected = String::new();
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("stdout: {}", line);
        if keep {
            collected.push_str(&line);
            collected.push('\n');
        }
    }
    collected
}

async fn drain_stderr<R>(reader: R) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        // Both tools print progress and info on stderr, so only lines that
        // look like errors are raised above debug.
        if line.to_lowercase().contains("error") {
            warn!("stderr: {}", line);
        } else {
            debug!("stderr: {}", line);
        }
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into_iter().collect()
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: &GeneratedCommand, cwd: &Path) -> Result<ExitOutcome> {
        Ok(self.execute(command, cwd, false).await?.outcome)
    }

    async fn capture(&self, command: &GeneratedCommand, cwd: &Path) -> Result<CapturedOutput> {
        self.execute(command, cwd, true).await
    }
}

/// Measures the duration of the fixed-up recording.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn probe(&self, command: &GeneratedCommand, cwd: &Path) -> Result<Duration>;
}

/// [`DurationProbe`] that runs ffprobe through a [`ProcessRunner`].
pub struct FfprobeDuration<R> {
    runner: R,
}

impl<R: ProcessRunner> FfprobeDuration<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl<R: ProcessRunner> DurationProbe for FfprobeDuration<R> {
    async fn probe(&self, command: &GeneratedCommand, cwd: &Path) -> Result<Duration> {
        let output = self.runner.capture(command, cwd).await?;
        if !output.outcome.success() {
            let detail = output
                .outcome
                .stderr_tail
                .last()
                .cloned()
                .unwrap_or_default();
            return Err(Error::Probe(format!(
                "{} ({}) {}",
                command.program(),
                output.outcome.description,
                detail
            )));
        }
        parse_duration_output(&output.stdout)
    }
}

/// Parse ffprobe's `format=duration` output (seconds as a decimal number).
pub fn parse_duration_output(stdout: &str) -> Result<Duration> {
    let value = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| Error::Probe("empty duration output".to_string()))?;

    let secs: f64 = value
        .parse()
        .map_err(|_| Error::Probe(format!("unparseable duration `{}`", value)))?;

    // Rejects negative, NaN and out-of-range values.
    Duration::try_from_secs_f64(secs)
        .map_err(|_| Error::Probe(format!("invalid duration `{}`", value)))
}
