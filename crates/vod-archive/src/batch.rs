//! Runs the pipeline over every pending entry of a [`Ledger`].

use std::path::Path;

use async_trait::async_trait;
use tracing::{error, info};

use crate::job::{ArchiveJob, Phase};
use crate::ledger::{Ledger, VodStatus};
use crate::pipeline::{ArchivePipeline, PhaseListener};
use crate::runner::{DurationProbe, ProcessRunner};
use crate::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Keep going with the next VOD after a failure instead of stopping.
    pub continue_on_error: bool,
}

/// What a batch run did.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub archived: Vec<String>,
    pub failed: Vec<(String, Error)>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Persists each completed phase so a crash never repeats finished work.
struct LedgerProgress<'a> {
    ledger: &'a mut Ledger,
    id: &'a str,
}

#[async_trait]
impl<'a> PhaseListener for LedgerProgress<'a> {
    async fn phase_completed(&mut self, _job: &ArchiveJob, phase: Phase) -> Result<()> {
        self.ledger.set_status(self.id, VodStatus::after(phase))?;
        self.ledger.save().await
    }
}

fn part_stem(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().to_string())
}

/// Archive every pending VOD of `ledger` into `recording_dir`.
///
/// Entries are processed one at a time, oldest first. Without
/// `continue_on_error` the first failure ends the batch; the failure is
/// recorded in the ledger either way.
pub async fn archive_pending<R, P>(
    pipeline: &ArchivePipeline<R, P>,
    ledger: &mut Ledger,
    recording_dir: &Path,
    options: &BatchOptions,
) -> Result<BatchReport>
where
    R: ProcessRunner,
    P: DurationProbe,
{
    let pending = ledger.pending();
    let mut report = BatchReport::default();

    info!(
        ledger = %ledger.path().display(),
        pending = pending.len(),
        "Archiving pending VODs"
    );

    for (index, (id, entry)) in pending.iter().enumerate() {
        let Some(start) = entry.status.resume_phase() else {
            continue;
        };
        info!(
            vod = %id,
            file_name = %entry.file_name,
            start = %start,
            "Archiving VOD {}/{}",
            index + 1,
            pending.len()
        );

        // A hand-edited entry with an unusable name fails like any other VOD.
        let result = match ArchiveJob::new(&entry.url, &entry.file_name, recording_dir) {
            Ok(job) => {
                let mut progress = LedgerProgress {
                    ledger: &mut *ledger,
                    id,
                };
                pipeline.run_from(&job, start, &mut progress).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(outcome) => {
                let parts = outcome.outputs.iter().filter_map(|p| part_stem(p)).collect();
                ledger.set_parts(id, parts)?;
                ledger.save().await?;
                report.archived.push(id.clone());
            }
            Err(e) => {
                error!(vod = %id, error = %e, "Failed to archive VOD");
                ledger.record_error(id, e.to_string())?;
                ledger.save().await?;
                report.failed.push((id.clone(), e));
                if !options.continue_on_error {
                    break;
                }
            }
        }
    }

    Ok(report)
}
