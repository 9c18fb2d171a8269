use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

#[derive(Parser)]
#[command(
    name = "vodarc",
    author,
    version,
    about = "Archive streaming VODs: download, remux and split recordings for upload",
    long_about = None
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "VODARC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Also write daily-rotated log files into this directory
    #[arg(long, global = true, env = "VODARC_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download, fix up and (if needed) split a single VOD
    Archive {
        /// VOD URL
        url: String,

        /// Base file name (without extension) of the produced files
        #[arg(short, long)]
        name: String,

        /// Directory the files are written to
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Split recordings longer than this (HH:MM:SS)
        #[arg(long, value_parser = parse_duration_arg)]
        divide_time: Option<Duration>,

        /// Hardware acceleration backend for the split step (e.g. cuda)
        #[arg(long)]
        hwaccel: Option<String>,

        /// Cookies file passed to the downloader
        #[arg(long)]
        cookies: Option<PathBuf>,

        /// Remove partial outputs when a phase fails
        #[arg(long)]
        cleanup_on_failure: bool,
    },

    /// Print the commands an archive run would execute, without running them
    Plan {
        /// VOD URL
        url: String,

        /// Base file name (without extension) of the produced files
        #[arg(short, long)]
        name: String,

        /// Assume the recording has this duration (HH:MM:SS) when deciding on a split
        #[arg(long, value_parser = parse_duration_arg)]
        duration: Option<Duration>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "pretty")]
        output: OutputFormat,
    },

    /// Add a VOD to a channel's ledger
    Add {
        /// Channel name, as configured under [[channels]]
        #[arg(long)]
        channel: String,

        /// VOD id, unique within the channel
        #[arg(long)]
        id: String,

        /// VOD URL
        #[arg(long)]
        url: String,

        /// Base file name (without extension)
        #[arg(short, long)]
        name: String,

        /// Broadcast date (YYYY-MM-DD)
        #[arg(long)]
        date: String,

        /// Broadcast start as a unix timestamp, orders VODs of one date
        #[arg(long)]
        timestamp: Option<i64>,
    },

    /// Archive every pending VOD of the configured channels
    Run {
        /// Only process this channel
        #[arg(long)]
        channel: Option<String>,

        /// Continue with the next VOD after a failure
        #[arg(long)]
        continue_on_error: bool,
    },

    /// Show ledger entries
    Status {
        /// Only show this channel
        #[arg(long)]
        channel: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "pretty")]
        output: OutputFormat,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Show or reset configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Reset configuration to defaults
        #[arg(long, conflicts_with = "show")]
        reset: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human readable
    Pretty,
    /// Pretty-printed JSON
    Json,
    /// Table (falls back to pretty without the table-output feature)
    Table,
}

fn parse_duration_arg(value: &str) -> Result<Duration, String> {
    vod_archive::config::parse_hhmmss(value).map_err(|e| e.to_string())
}
