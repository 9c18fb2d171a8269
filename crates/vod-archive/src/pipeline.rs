//! Sequential download → fixup → split/finalize pipeline for one job.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::command::{self, GeneratedCommand};
use crate::config::{CommandConfig, format_hhmmss};
use crate::job::{ArchiveJob, JobState, Phase};
use crate::runner::{DurationProbe, FfprobeDuration, ProcessRunner, TokioProcessRunner};
use crate::{Error, Result};

/// Behaviour switches that are not part of command generation.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Remove partial artifacts (fixup temp file, split segments) when a phase
    /// fails. Off by default so failures can be inspected by hand.
    pub cleanup_on_failure: bool,
}

/// Result of a job that reached `Done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveOutcome {
    pub state: JobState,
    /// Duration of the fixed-up recording.
    pub duration: Duration,
    /// Whether the recording was split into segments.
    pub split: bool,
    /// Final files, in playback order.
    pub outputs: Vec<PathBuf>,
}

/// Notified after each phase completes, e.g. to persist progress.
#[async_trait]
pub trait PhaseListener: Send {
    async fn phase_completed(&mut self, job: &ArchiveJob, phase: Phase) -> Result<()>;
}

/// Listener that ignores every event.
pub struct NoopListener;

#[async_trait]
impl PhaseListener for NoopListener {
    async fn phase_completed(&mut self, _job: &ArchiveJob, _phase: Phase) -> Result<()> {
        Ok(())
    }
}

/// Runs the phases of an [`ArchiveJob`] one after another.
pub struct ArchivePipeline<R, P> {
    runner: R,
    probe: P,
    config: CommandConfig,
    options: PipelineOptions,
}

impl ArchivePipeline<TokioProcessRunner, FfprobeDuration<TokioProcessRunner>> {
    /// Pipeline spawning real processes.
    pub fn with_process_runner(config: CommandConfig, options: PipelineOptions) -> Result<Self> {
        Self::new(
            TokioProcessRunner::new(),
            FfprobeDuration::new(TokioProcessRunner::new()),
            config,
            options,
        )
    }
}

impl<R: ProcessRunner, P: DurationProbe> ArchivePipeline<R, P> {
    pub fn new(runner: R, probe: P, config: CommandConfig, options: PipelineOptions) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            runner,
            probe,
            config,
            options,
        })
    }

    pub fn config(&self) -> &CommandConfig {
        &self.config
    }

    /// Run every phase of `job`.
    pub async fn run(&self, job: &ArchiveJob) -> Result<ArchiveOutcome> {
        self.run_from(job, Phase::Download, &mut NoopListener).await
    }

    /// Run `job` starting at `start`, skipping the phases before it.
    ///
    /// `start` of `Split` or `Finalize` both resume at the duration probe, as
    /// the choice between them depends on it. On failure the returned error is
    /// attributed to the failing phase (see [`Error::phase`]).
    pub async fn run_from(
        &self,
        job: &ArchiveJob,
        start: Phase,
        listener: &mut dyn PhaseListener,
    ) -> Result<ArchiveOutcome> {
        let mut state = JobState::Pending;
        let name = job.target_base_filename();

        if start == Phase::Download {
            self.enter(&mut state, JobState::Downloading, name)?;
            self.download(job)
                .await
                .map_err(|e| self.fail(&mut state, Phase::Download, name, e))?;
            listener
                .phase_completed(job, Phase::Download)
                .await
                .map_err(|e| self.fail(&mut state, Phase::Download, name, e))?;
        }

        if matches!(start, Phase::Download | Phase::Fixup) {
            self.enter(&mut state, JobState::FixingUp, name)?;
            self.fixup(job)
                .await
                .map_err(|e| self.fail(&mut state, Phase::Fixup, name, e))?;
            listener
                .phase_completed(job, Phase::Fixup)
                .await
                .map_err(|e| self.fail(&mut state, Phase::Fixup, name, e))?;
        }

        let duration = self
            .measure(job)
            .await
            .map_err(|e| self.fail(&mut state, Phase::Split, name, e))?;

        let (phase, outputs) = match command::split_command_for(job, &self.config, duration) {
            Some(split) => {
                self.enter(&mut state, JobState::Splitting, name)?;
                let outputs = self
                    .split(job, &split)
                    .await
                    .map_err(|e| self.fail(&mut state, Phase::Split, name, e))?;
                (Phase::Split, outputs)
            }
            None => {
                self.enter(&mut state, JobState::Finalizing, name)?;
                let output = self
                    .finalize(job)
                    .await
                    .map_err(|e| self.fail(&mut state, Phase::Finalize, name, e))?;
                (Phase::Finalize, vec![output])
            }
        };

        listener
            .phase_completed(job, phase)
            .await
            .map_err(|e| self.fail(&mut state, phase, name, e))?;

        self.enter(&mut state, JobState::Done, name)?;
        info!(
            job = name,
            duration = %format_hhmmss(duration),
            parts = outputs.len(),
            "Archive complete"
        );

        Ok(ArchiveOutcome {
            state,
            duration,
            split: phase == Phase::Split,
            outputs,
        })
    }

    fn enter(&self, state: &mut JobState, next: JobState, name: &str) -> Result<()> {
        let previous = *state;
        state.transition(next)?;
        debug!(job = name, from = %previous, to = %next, "Job state changed");
        Ok(())
    }

    fn fail(&self, state: &mut JobState, phase: Phase, name: &str, error: Error) -> Error {
        // Every non-terminal state may move to Failed.
        let _ = state.transition(JobState::Failed(phase));
        warn!(job = name, phase = %phase, error = %error, "Job failed");
        error.in_phase(phase)
    }

    async fn run_tool(&self, phase: Phase, command: &GeneratedCommand, cwd: &Path) -> Result<()> {
        info!(phase = %phase, "Running: {}", command);
        let outcome = self.runner.run(command, cwd).await?;
        if !outcome.success() {
            return Err(Error::tool_failed(
                phase,
                outcome.description,
                outcome.stderr_tail,
            ));
        }
        debug!(
            phase = %phase,
            elapsed_secs = outcome.elapsed.as_secs_f64(),
            "Phase finished"
        );
        Ok(())
    }

    /// Download phase. Retries are left to the downloader's own flags.
    pub async fn download(&self, job: &ArchiveJob) -> Result<()> {
        let cmd = command::download_command(job, &self.config);
        self.run_tool(Phase::Download, &cmd, job.working_dir()).await?;

        if !tokio::fs::try_exists(job.media_path()).await.unwrap_or(false) {
            warn!(
                path = %job.media_path().display(),
                "Downloader finished but the expected file is missing; fixup will fail"
            );
        }
        Ok(())
    }

    /// Fixup phase: remux into the temp file, then replace the download with it.
    pub async fn fixup(&self, job: &ArchiveJob) -> Result<()> {
        let cmd = command::fixup_command(job, &self.config);
        if let Err(e) = self.run_tool(Phase::Fixup, &cmd, job.working_dir()).await {
            if self.options.cleanup_on_failure {
                remove_if_exists(&job.temp_path()).await;
            }
            return Err(e);
        }

        let temp = job.temp_path();
        let media = job.media_path();
        // Single rename over the download, never a window without either file.
        tokio::fs::rename(&temp, &media).await?;
        debug!(from = %temp.display(), to = %media.display(), "Replaced download with fixed file");
        Ok(())
    }

    /// Measure the fixed-up recording.
    pub async fn measure(&self, job: &ArchiveJob) -> Result<Duration> {
        let cmd = command::probe_command(job, &self.config);
        let duration = self.probe.probe(&cmd, job.working_dir()).await?;
        info!(
            job = job.target_base_filename(),
            duration = %format_hhmmss(duration),
            divide_time = %format_hhmmss(self.config.divide_time),
            "Measured recording"
        );
        Ok(duration)
    }

    /// Split phase: segment the recording, then drop the unsplit file.
    async fn split(&self, job: &ArchiveJob, cmd: &GeneratedCommand) -> Result<Vec<PathBuf>> {
        if let Err(e) = self.run_tool(Phase::Split, cmd, job.working_dir()).await {
            if self.options.cleanup_on_failure {
                for segment in collect_segments(job).await {
                    remove_if_exists(&segment).await;
                }
            }
            return Err(e);
        }

        let segments = collect_segments(job).await;
        if segments.is_empty() {
            return Err(Error::tool_failed(
                Phase::Split,
                "exit code 0".to_string(),
                vec![format!("no segment matching {} was written", job.segment_pattern())],
            ));
        }

        tokio::fs::remove_file(job.media_path()).await?;
        info!(job = job.target_base_filename(), parts = segments.len(), "Split recording");
        Ok(segments)
    }

    /// Finalize phase: the fixed file already carries its final name.
    async fn finalize(&self, job: &ArchiveJob) -> Result<PathBuf> {
        let media = job.media_path();
        tokio::fs::metadata(&media).await?;
        Ok(media)
    }
}

/// `<base>_000.mp4`, `<base>_001.mp4`, ... up to the first gap.
async fn collect_segments(job: &ArchiveJob) -> Vec<PathBuf> {
    let mut segments = Vec::new();
    for index in 0.. {
        let path = job.working_dir().join(job.segment_file_name(index));
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            break;
        }
        segments.push(path);
    }
    segments
}

async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial artifact"),
    }
}
