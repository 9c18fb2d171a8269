//! Error types for the archive pipeline.

use thiserror::Error;

use crate::job::Phase;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Download failed ({status}){}", tail_suffix(.stderr_tail))]
    DownloadFailed {
        status: String,
        stderr_tail: Vec<String>,
    },

    #[error("Fixup failed ({status}){}", tail_suffix(.stderr_tail))]
    FixupFailed {
        status: String,
        stderr_tail: Vec<String>,
    },

    #[error("Split failed ({status}){}", tail_suffix(.stderr_tail))]
    SplitFailed {
        status: String,
        stderr_tail: Vec<String>,
    },

    #[error("Failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{phase} phase failed: {source}")]
    Job {
        phase: Phase,
        #[source]
        source: Box<Error>,
    },

    #[error("Duration probe failed: {0}")]
    Probe(String),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn tail_suffix(tail: &[String]) -> String {
    match tail.last() {
        Some(line) => format!(": {}", line),
        None => String::new(),
    }
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid_job(msg: impl Into<String>) -> Self {
        Self::InvalidJob(msg.into())
    }

    pub fn ledger(msg: impl Into<String>) -> Self {
        Self::Ledger(msg.into())
    }

    /// Build the failure error for a phase whose external tool exited non-zero.
    ///
    /// Finalize never runs an external tool; a failing rename surfaces as `Io`.
    pub fn tool_failed(phase: Phase, status: String, stderr_tail: Vec<String>) -> Self {
        match phase {
            Phase::Download => Self::DownloadFailed {
                status,
                stderr_tail,
            },
            Phase::Fixup => Self::FixupFailed {
                status,
                stderr_tail,
            },
            Phase::Split | Phase::Finalize => Self::SplitFailed {
                status,
                stderr_tail,
            },
        }
    }

    /// Attribute an error to the phase it happened in.
    ///
    /// Tool failures already name their phase and are returned unchanged.
    pub fn in_phase(self, phase: Phase) -> Self {
        if self.phase().is_some() {
            return self;
        }
        Self::Job {
            phase,
            source: Box::new(self),
        }
    }

    /// The pipeline phase this error is attributed to, if known.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::DownloadFailed { .. } => Some(Phase::Download),
            Self::FixupFailed { .. } => Some(Phase::Fixup),
            Self::SplitFailed { .. } => Some(Phase::Split),
            Self::Job { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}
