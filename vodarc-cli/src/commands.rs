use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{info, warn};
use vod_archive::config::format_hhmmss;
use vod_archive::ledger::DATE_FORMAT;
use vod_archive::{
    ArchiveJob, ArchivePipeline, BatchOptions, CommandConfig, Ledger, PipelineOptions, VodEntry,
    archive_pending, command, order, title,
};

use crate::cli::OutputFormat;
use crate::config::{AppConfig, ChannelConfig};
use crate::error::{CliError, Result};
use crate::output::{ChannelStatus, OutputManager, PlannedStep};

/// Overrides applied to the configured commands for a one-off archive.
#[derive(Debug, Default)]
pub struct ArchiveOverrides {
    pub divide_time: Option<Duration>,
    pub hwaccel: Option<String>,
    pub cookies: Option<PathBuf>,
    pub cleanup_on_failure: bool,
}

/// A VOD to enqueue into a channel ledger.
#[derive(Debug)]
pub struct NewVod {
    pub channel: String,
    pub id: String,
    pub url: String,
    pub name: String,
    pub date: String,
    pub timestamp: Option<i64>,
}

pub struct CommandExecutor {
    config: AppConfig,
    output: OutputManager,
}

impl CommandExecutor {
    pub fn new(config: AppConfig, colored: bool) -> Self {
        Self {
            config,
            output: OutputManager::new(colored),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn commands_with(&self, overrides: &ArchiveOverrides) -> CommandConfig {
        let mut commands = self.config.commands.clone();
        if let Some(divide_time) = overrides.divide_time {
            commands.divide_time = divide_time;
        }
        if let Some(hwaccel) = &overrides.hwaccel {
            commands.hwaccel = Some(hwaccel.clone());
        }
        if let Some(cookies) = &overrides.cookies {
            commands.cookies_file = Some(cookies.clone());
        }
        commands
    }

    /// Run one job end to end.
    pub async fn archive(
        &self,
        url: &str,
        name: &str,
        dir: &Path,
        overrides: ArchiveOverrides,
    ) -> Result<()> {
        validate_url(url)?;
        tokio::fs::create_dir_all(dir).await?;

        let job = ArchiveJob::new(url, name, dir)?;
        let pipeline = ArchivePipeline::with_process_runner(
            self.commands_with(&overrides),
            PipelineOptions {
                cleanup_on_failure: overrides.cleanup_on_failure,
            },
        )?;

        info!(url, name, dir = %dir.display(), "Archiving VOD");
        let outcome = pipeline.run(&job).await?;
        print!("{}", self.output.format_outcome(&outcome));
        Ok(())
    }

    /// Print the commands an archive would run. Nothing is executed.
    pub fn plan(
        &self,
        url: &str,
        name: &str,
        duration: Option<Duration>,
        format: &OutputFormat,
    ) -> Result<String> {
        validate_url(url)?;
        let config = &self.config.commands;
        config.validate()?;
        let job = ArchiveJob::new(url, name, ".")?;

        let mut steps = vec![
            PlannedStep::new("download", &command::download_command(&job, config)),
            PlannedStep::new("fixup", &command::fixup_command(&job, config)),
        ];
        let mut notes = Vec::new();
        let divide_time = format_hhmmss(config.divide_time);

        match duration {
            Some(duration) => match command::split_command_for(&job, config, duration) {
                Some(split) => steps.push(PlannedStep::new("split", &split)),
                None => notes.push(format!(
                    "{} is not longer than {}: kept whole as {}",
                    format_hhmmss(duration),
                    divide_time,
                    job.media_file_name()
                )),
            },
            None => {
                steps.push(PlannedStep::new("probe", &command::probe_command(&job, config)));
                steps.push(PlannedStep::new(
                    "split",
                    &command::split_command(&job, config),
                ));
                notes.push(format!(
                    "split only runs when the probed duration exceeds {}",
                    divide_time
                ));
            }
        }

        self.output.format_plan(&steps, &notes, format)
    }

    /// Add a VOD to a channel ledger.
    pub async fn add(&self, vod: NewVod) -> Result<()> {
        validate_url(&vod.url)?;
        let channel = self.config.channel(&vod.channel)?;
        // Rejects names that cannot be used as a file name.
        ArchiveJob::new(&vod.url, &vod.name, &channel.recording_path)?;

        let timestamp = match vod.timestamp {
            Some(ts) => ts,
            None => midnight_timestamp(&vod.date)?,
        };

        let mut ledger = Ledger::load(self.config.ledger_path(channel)).await?;
        ledger.add(
            vod.id.clone(),
            VodEntry::new(vod.url, vod.name, vod.date, timestamp)?,
        )?;
        ledger.save().await?;

        info!(channel = %channel.name, vod = %vod.id, "Added VOD to ledger");
        println!("✓ Added {} to {}", vod.id, channel.name);
        Ok(())
    }

    /// Archive pending VODs of the selected channels, then order them where configured.
    pub async fn run(&self, channel: Option<&str>, continue_on_error: bool) -> Result<()> {
        let options = BatchOptions { continue_on_error };
        let mut failed = 0;

        for channel in self.config.select_channels(channel)? {
            failed += self.run_channel(channel, &options).await?;
            if failed > 0 && !continue_on_error {
                break;
            }
        }

        if failed > 0 {
            return Err(CliError::BatchFailed { failed });
        }
        Ok(())
    }

    async fn run_channel(&self, channel: &ChannelConfig, options: &BatchOptions) -> Result<usize> {
        tokio::fs::create_dir_all(&channel.recording_path).await?;
        let mut ledger = Ledger::load(self.config.ledger_path(channel)).await?;
        let pipeline = ArchivePipeline::with_process_runner(
            self.config.commands_for(channel),
            PipelineOptions::default(),
        )?;

        info!(channel = %channel.name, "Processing channel");
        let report =
            archive_pending(&pipeline, &mut ledger, &channel.recording_path, options).await?;

        for id in &report.archived {
            println!("✓ {}/{} archived", channel.name, id);
        }
        for (id, error) in &report.failed {
            warn!(channel = %channel.name, vod = %id, "VOD failed");
            eprintln!("✗ {}/{}: {}", channel.name, id, error);
        }

        if channel.order_before_upload {
            let moves = order::plan_order(&ledger, &channel.recording_path);
            if !moves.is_empty() {
                order::apply_order(&moves, &mut ledger).await?;
                print!("{}", self.output.format_moves(&moves));
            }
        }

        if let Some(format) = &channel.title {
            let upload_dir = channel.recording_path.join(order::UPLOAD_FOLDER_NAME);
            let renames = title::apply_titles(&upload_dir, format).await?;
            print!("{}", self.output.format_titles(&renames));
        }

        Ok(report.failed.len())
    }

    /// Ledger entries of the selected channels.
    pub async fn status(&self, channel: Option<&str>, format: &OutputFormat) -> Result<String> {
        let mut channels = Vec::new();
        for channel in self.config.select_channels(channel)? {
            let ledger = Ledger::load(self.config.ledger_path(channel)).await?;
            let mut entries: Vec<_> = ledger
                .entries()
                .map(|(id, entry)| (id.to_string(), entry.clone()))
                .collect();
            entries.sort_by(|a, b| a.1.timestamp.cmp(&b.1.timestamp).then_with(|| a.0.cmp(&b.0)));
            channels.push(ChannelStatus {
                channel: channel.name.clone(),
                entries,
            });
        }
        self.output.format_status(&channels, format)
    }
}

fn validate_url(url: &str) -> Result<()> {
    url::Url::parse(url).map_err(|source| CliError::InvalidUrl {
        url: url.to_string(),
        source,
    })?;
    Ok(())
}

/// Unix timestamp of `date` at 00:00 UTC.
fn midnight_timestamp(date: &str) -> Result<i64> {
    let date = NaiveDate::parse_from_str(date, DATE_FORMAT)
        .map_err(|e| CliError::invalid_input(format!("invalid date `{}`: {}", date, e)))?;
    Ok(date.and_time(chrono::NaiveTime::MIN).and_utc().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn executor(dir: &TempDir) -> CommandExecutor {
        let raw = format!(
            r#"
data_dir = "{data}"

[[channels]]
name = "somechannel"
recording_path = "{rec}"
"#,
            data = dir.path().join("data").display(),
            rec = dir.path().join("rec").display(),
        );
        CommandExecutor::new(AppConfig::parse(&raw).unwrap(), false)
    }

    fn vod(id: &str, name: &str) -> NewVod {
        NewVod {
            channel: "somechannel".to_string(),
            id: id.to_string(),
            url: format!("https://twitch.tv/videos/{}", id),
            name: name.to_string(),
            date: "2024-03-01".to_string(),
            timestamp: None,
        }
    }

    #[test]
    fn test_plan_without_duration_shows_conditional_split() {
        let dir = TempDir::new().unwrap();
        let text = executor(&dir)
            .plan("https://twitch.tv/videos/1", "episode1", None, &OutputFormat::Pretty)
            .unwrap();

        assert!(text.contains("1. download\n    yt-dlp --fixup never"));
        assert!(text.contains("2. fixup\n    ffmpeg -y -i file:episode1.mp4"));
        assert!(text.contains("3. probe\n    ffprobe"));
        assert!(text.contains("-segment_time 11:59:57"));
        assert!(text.contains("exceeds 11:59:57"));
    }

    #[test]
    fn test_plan_with_short_duration_skips_split() {
        let dir = TempDir::new().unwrap();
        let text = executor(&dir)
            .plan(
                "https://twitch.tv/videos/1",
                "episode1",
                Some(Duration::from_secs(3600)),
                &OutputFormat::Json,
            )
            .unwrap();

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        let steps = value["steps"].as_array().unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0]["program"], "yt-dlp");
        assert!(value["notes"][0].as_str().unwrap().contains("episode1.mp4"));
    }

    #[test]
    fn test_plan_rejects_bad_input() {
        let dir = TempDir::new().unwrap();
        let executor = executor(&dir);
        assert!(matches!(
            executor.plan("not a url", "episode1", None, &OutputFormat::Pretty),
            Err(CliError::InvalidUrl { .. })
        ));
        assert!(matches!(
            executor.plan("https://twitch.tv/videos/1", "a/b", None, &OutputFormat::Pretty),
            Err(CliError::Archive(_))
        ));
    }

    #[tokio::test]
    async fn test_add_then_status() {
        let dir = TempDir::new().unwrap();
        let executor = executor(&dir);

        executor.add(vod("2", "second")).await.unwrap();
        executor
            .add(NewVod {
                timestamp: Some(1),
                ..vod("1", "first")
            })
            .await
            .unwrap();

        let ledger = Ledger::load(dir.path().join("data").join("somechannel.json"))
            .await
            .unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.get("2").unwrap().timestamp, 1709251200);

        let text = executor
            .status(Some("somechannel"), &OutputFormat::Pretty)
            .await
            .unwrap();
        let first = text.find("first").unwrap();
        let second = text.find("second").unwrap();
        assert!(first < second);
    }

    #[tokio::test]
    async fn test_add_rejects_unknown_channel_and_duplicates() {
        let dir = TempDir::new().unwrap();
        let executor = executor(&dir);

        let err = executor
            .add(NewVod {
                channel: "nope".to_string(),
                ..vod("1", "first")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::UnknownChannel(_)));

        executor.add(vod("1", "first")).await.unwrap();
        let err = executor.add(vod("1", "again")).await.unwrap_err();
        assert!(matches!(err, CliError::Archive(vod_archive::Error::Ledger(_))));
    }

    #[rstest]
    #[case("1970-01-01", 0)]
    #[case("1970-01-02", 86400)]
    #[case("2024-03-01", 1709251200)]
    fn test_midnight_timestamp(#[case] date: &str, #[case] expected: i64) {
        assert_eq!(midnight_timestamp(date).unwrap(), expected);
    }

    #[rstest]
    #[case("2024-02-30")]
    #[case("2024-3-1x")]
    #[case("01/03/2024")]
    #[case("")]
    fn test_midnight_timestamp_invalid(#[case] date: &str) {
        assert!(matches!(
            midnight_timestamp(date),
            Err(CliError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_archive_overrides() {
        let dir = TempDir::new().unwrap();
        let commands = executor(&dir).commands_with(&ArchiveOverrides {
            divide_time: Some(Duration::from_secs(60)),
            hwaccel: Some("cuda".to_string()),
            ..Default::default()
        });
        assert_eq!(commands.divide_time, Duration::from_secs(60));
        assert_eq!(commands.hwaccel.as_deref(), Some("cuda"));
        assert!(commands.cookies_file.is_none());
    }
}
