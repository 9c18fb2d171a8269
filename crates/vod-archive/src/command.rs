//! Command-line generation for each pipeline phase.
//!
//! Every builder is a pure function of the job and the configuration; nothing
//! here touches the filesystem or spawns a process.

use std::fmt;
use std::time::Duration;

use crate::config::{CommandConfig, format_hhmmss};
use crate::job::ArchiveJob;

/// A fully resolved external command: program plus ordered arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedCommand {
    program: String,
    args: Vec<String>,
}

impl GeneratedCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Value following the first occurrence of `flag`, if any.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Shell-quoted rendering, for logs and dry runs.
    pub fn render(&self) -> String {
        process_utils::render_command_line(&self.program, &self.args)
    }
}

impl fmt::Display for GeneratedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// ffmpeg reads and writes through the `file:` protocol so names containing
/// `:` or starting with `-` are never mistaken for another protocol or flag.
fn file_url(name: &str) -> String {
    format!("file:{}", name)
}

/// Downloader invocation.
///
/// Automatic post-processing is disabled (remuxing is done by the fixup step),
/// the three retry counters share one value and the output base name is fixed
/// while the extension is left to the downloader.
pub fn download_command(job: &ArchiveJob, config: &CommandConfig) -> GeneratedCommand {
    let retries = config.retry_value();
    let mut args = Vec::with_capacity(16);

    if let Some(ref cookies) = config.cookies_file {
        args.extend(["--cookies".to_string(), cookies.to_string_lossy().to_string()]);
    }

    args.extend(["--fixup".to_string(), "never".to_string()]);
    args.extend(["--retries".to_string(), retries.clone()]);
    args.extend(["--file-access-retries".to_string(), retries.clone()]);
    args.extend(["--fragment-retries".to_string(), retries]);
    args.extend([
        "--concurrent-fragments".to_string(),
        config.concurrent_fragments.to_string(),
    ]);
    args.extend([
        "-o".to_string(),
        format!("{}.%(ext)s", job.target_base_filename()),
    ]);
    args.push(job.source_url().to_string());

    GeneratedCommand::new(config.tools.downloader.clone(), args)
}

/// Remux of the downloaded file into a clean MP4.
///
/// Always run, whatever the downloaded container. Output goes to the temp
/// name; the download is left untouched until the remux succeeded.
pub fn fixup_command(job: &ArchiveJob, config: &CommandConfig) -> GeneratedCommand {
    let args = vec![
        "-y".to_string(),
        "-i".to_string(),
        file_url(&job.media_file_name()),
        "-map".to_string(),
        "0".to_string(),
        "-dn".to_string(),
        "-ignore_unknown".to_string(),
        "-c".to_string(),
        "copy".to_string(),
        "-f".to_string(),
        "mp4".to_string(),
        // ADTS AAC from a transport stream must become ASC for MP4.
        "-bsf:a".to_string(),
        "aac_adtstoasc".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        file_url(&job.temp_file_name()),
    ];

    GeneratedCommand::new(config.tools.ffmpeg.clone(), args)
}

/// Stream-copy split into `divide_time` long segments.
///
/// Timestamps restart at every segment; a boundary may duplicate a frame but
/// never drops one.
pub fn split_command(job: &ArchiveJob, config: &CommandConfig) -> GeneratedCommand {
    let mut args = Vec::with_capacity(18);

    if let Some(ref hwaccel) = config.hwaccel {
        args.extend(["-hwaccel".to_string(), hwaccel.clone()]);
    }

    args.extend(["-i".to_string(), file_url(&job.media_file_name())]);
    args.extend(["-map".to_string(), "0".to_string()]);
    args.extend(["-c".to_string(), "copy".to_string()]);
    args.extend(["-f".to_string(), "segment".to_string()]);
    args.extend([
        "-segment_time".to_string(),
        format_hhmmss(config.divide_time),
    ]);
    args.extend(["-reset_timestamps".to_string(), "1".to_string()]);
    args.push(file_url(&job.segment_pattern()));

    GeneratedCommand::new(config.tools.ffmpeg.clone(), args)
}

/// Container duration query; stdout is the duration in seconds.
pub fn probe_command(job: &ArchiveJob, config: &CommandConfig) -> GeneratedCommand {
    let args = vec![
        "-v".to_string(),
        "error".to_string(),
        "-show_entries".to_string(),
        "format=duration".to_string(),
        "-of".to_string(),
        "default=noprint_wrappers=1:nokey=1".to_string(),
        file_url(&job.media_file_name()),
    ];

    GeneratedCommand::new(config.tools.ffprobe.clone(), args)
}

/// Whether a recording of `duration` must be split. Strictly greater: a file
/// exactly `divide_time` long is kept whole.
pub fn needs_split(duration: Duration, divide_time: Duration) -> bool {
    duration > divide_time
}

/// Split command if `duration` calls for one.
pub fn split_command_for(
    job: &ArchiveJob,
    config: &CommandConfig,
    duration: Duration,
) -> Option<GeneratedCommand> {
    needs_split(duration, config.divide_time).then(|| split_command(job, config))
}
