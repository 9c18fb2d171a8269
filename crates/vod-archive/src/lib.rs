//! # VOD Archive
//!
//! Archives streaming-platform VODs by driving external tools: a downloader
//! (`yt-dlp`) and a media tool (`ffmpeg`/`ffprobe`).
//!
//! ## Pipeline
//!
//! Download → Fixup (always) → Split when the recording is longer than the
//! configured `divide_time`, otherwise Finalize.
//!
//! - [`command`]: pure command-line builders, one per phase
//! - [`runner`]: process execution behind the [`ProcessRunner`] trait
//! - [`pipeline`]: the per-job state machine
//! - [`ledger`], [`batch`], [`order`]: resumable multi-VOD runs and
//!   date-based ordering of finished parts
//! - [`title`]: optional upload titles for ordered parts
//!
//! ## Example
//!
//! ```no_run
//! use vod_archive::{ArchiveJob, ArchivePipeline, CommandConfig, PipelineOptions};
//!
//! # async fn run() -> vod_archive::Result<()> {
//! let pipeline = ArchivePipeline::with_process_runner(
//!     CommandConfig::default(),
//!     PipelineOptions::default(),
//! )?;
//! let job = ArchiveJob::new("https://twitch.tv/videos/123", "episode1", "/recordings")?;
//! let outcome = pipeline.run(&job).await?;
//! println!("{:?}", outcome.outputs);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod command;
pub mod config;
mod error;
pub mod job;
pub mod ledger;
pub mod order;
pub mod pipeline;
pub mod runner;
pub mod title;

pub use batch::{BatchOptions, BatchReport, archive_pending};
pub use command::GeneratedCommand;
pub use config::{CommandConfig, ToolPaths};
pub use error::{Error, Result};
pub use job::{ArchiveJob, JobState, Phase};
pub use ledger::{Ledger, VodEntry, VodStatus};
pub use pipeline::{ArchiveOutcome, ArchivePipeline, PhaseListener, PipelineOptions};
pub use runner::{DurationProbe, FfprobeDuration, ProcessRunner, TokioProcessRunner};
