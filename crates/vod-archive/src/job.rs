//! Archive job identity and per-job state machine.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Suffix appended to the base name to form the default fixup output name.
pub const TEMP_SUFFIX: &str = ".temp";

/// Container extension the fixup and split steps operate on.
pub const MEDIA_EXTENSION: &str = "mp4";

/// One VOD to archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveJob {
    source_url: String,
    target_base_filename: String,
    temp_filename: String,
    working_dir: PathBuf,
}

impl ArchiveJob {
    /// Create a job writing `<base>.*` files into `working_dir`.
    ///
    /// The temporary fixup name defaults to `<base>.temp`.
    pub fn new(
        source_url: impl Into<String>,
        target_base_filename: impl Into<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let base = target_base_filename.into();
        let temp = format!("{}{}", base, TEMP_SUFFIX);
        Self::with_temp_filename(source_url, base, temp, working_dir)
    }

    /// Create a job with an explicit temporary fixup name.
    pub fn with_temp_filename(
        source_url: impl Into<String>,
        target_base_filename: impl Into<String>,
        temp_filename: impl Into<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let source_url = source_url.into();
        let target_base_filename = target_base_filename.into();
        let temp_filename = temp_filename.into();

        if source_url.trim().is_empty() {
            return Err(Error::invalid_job("source URL must not be empty"));
        }
        validate_file_stem("target base filename", &target_base_filename)?;
        validate_file_stem("temp filename", &temp_filename)?;
        if temp_filename == target_base_filename {
            return Err(Error::invalid_job(
                "temp filename must differ from the target base filename",
            ));
        }

        Ok(Self {
            source_url,
            target_base_filename,
            temp_filename,
            working_dir: working_dir.into(),
        })
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn target_base_filename(&self) -> &str {
        &self.target_base_filename
    }

    pub fn temp_filename(&self) -> &str {
        &self.temp_filename
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// `<base>.mp4`, relative to the working directory.
    pub fn media_file_name(&self) -> String {
        format!("{}.{}", self.target_base_filename, MEDIA_EXTENSION)
    }

    /// `<temp>.mp4`, relative to the working directory.
    pub fn temp_file_name(&self) -> String {
        format!("{}.{}", self.temp_filename, MEDIA_EXTENSION)
    }

    /// `<base>_%03d.mp4`, the segment muxer output pattern.
    pub fn segment_pattern(&self) -> String {
        format!("{}_%03d.{}", self.target_base_filename, MEDIA_EXTENSION)
    }

    /// `<base>_NNN.mp4` for a zero-based segment index.
    pub fn segment_file_name(&self, index: usize) -> String {
        format!("{}_{:03}.{}", self.target_base_filename, index, MEDIA_EXTENSION)
    }

    pub fn media_path(&self) -> PathBuf {
        self.working_dir.join(self.media_file_name())
    }

    pub fn temp_path(&self) -> PathBuf {
        self.working_dir.join(self.temp_file_name())
    }
}

fn validate_file_stem(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::invalid_job(format!("{} must not be empty", what)));
    }
    if value.contains(&['/', '\\'][..]) {
        return Err(Error::invalid_job(format!(
            "{} must not contain a path separator: {}",
            what, value
        )));
    }
    if value == "." || value == ".." {
        return Err(Error::invalid_job(format!("{} is not a file name: {}", what, value)));
    }
    Ok(())
}

/// Pipeline phase, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Download,
    Fixup,
    Split,
    Finalize,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Download => "download",
            Self::Fixup => "fixup",
            Self::Split => "split",
            Self::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a single job.
///
/// `Pending → Downloading → FixingUp → {Splitting | Finalizing} → Done`, with
/// `Failed(phase)` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Downloading,
    FixingUp,
    Splitting,
    Finalizing,
    Done,
    Failed(Phase),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }

    /// The phase work in this state belongs to.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Downloading => Some(Phase::Download),
            Self::FixingUp => Some(Phase::Fixup),
            Self::Splitting => Some(Phase::Split),
            Self::Finalizing => Some(Phase::Finalize),
            Self::Failed(phase) => Some(*phase),
            Self::Pending | Self::Done => None,
        }
    }

    /// Whether `self → next` is an edge of the lifecycle.
    ///
    /// `Pending` may jump straight to a later phase so that a job recorded as
    /// already downloaded (or fixed) resumes where it stopped.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Done | Failed(_), _) => false,
            (_, Failed(_)) => true,
            (Pending, Downloading | FixingUp | Splitting | Finalizing) => true,
            (Downloading, FixingUp) => true,
            (FixingUp, Splitting | Finalizing) => true,
            (Splitting | Finalizing, Done) => true,
            _ => false,
        }
    }

    /// Validate and perform a transition.
    pub fn transition(&mut self, next: JobState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Downloading => f.write_str("downloading"),
            Self::FixingUp => f.write_str("fixing_up"),
            Self::Splitting => f.write_str("splitting"),
            Self::Finalizing => f.write_str("finalizing"),
            Self::Done => f.write_str("done"),
            Self::Failed(phase) => write!(f, "failed({})", phase),
        }
    }
}
