mod cli;
mod commands;
mod config;
mod error;
mod output;

use crate::{
    cli::{Args, Commands},
    commands::{ArchiveOverrides, CommandExecutor, NewVod},
    config::AppConfig,
    error::{CliError, Result},
};
use chrono::Local;
use clap::Parser;
#[cfg(feature = "colored-output")]
use colored::*;
use std::{io::IsTerminal, path::Path, process};
use tracing::{Level, error};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    Layer,
    filter::EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    prelude::*,
};

/// Timestamps in the local timezone.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

#[tokio::main]
async fn main() {
    // A missing .env is fine; tool paths then come from the config file.
    dotenvy::dotenv().ok();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        #[cfg(feature = "colored-output")]
        {
            eprintln!("{} {}", "Error:".red().bold(), e);
        }
        #[cfg(not(feature = "colored-output"))]
        {
            eprintln!("Error: {}", e);
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    // Held until exit so buffered file logs are flushed.
    let _guard = init_logging(args.verbose, args.quiet, args.log_dir.as_deref())?;

    // Reset never reads the existing file, so a broken one can be replaced.
    if let Commands::Config { reset: true, .. } = args.command {
        let path = AppConfig::reset(args.config.as_deref())?;
        println!("✓ Configuration reset to defaults at {}", path.display());
        return Ok(());
    }

    let config = AppConfig::load(args.config.as_deref())?;
    let executor = CommandExecutor::new(config, std::io::stdout().is_terminal());

    match args.command {
        Commands::Archive {
            url,
            name,
            dir,
            divide_time,
            hwaccel,
            cookies,
            cleanup_on_failure,
        } => {
            executor
                .archive(
                    &url,
                    &name,
                    &dir,
                    ArchiveOverrides {
                        divide_time,
                        hwaccel,
                        cookies,
                        cleanup_on_failure,
                    },
                )
                .await?;
        }

        Commands::Plan {
            url,
            name,
            duration,
            output,
        } => {
            print!("{}", executor.plan(&url, &name, duration, &output)?);
        }

        Commands::Add {
            channel,
            id,
            url,
            name,
            date,
            timestamp,
        } => {
            executor
                .add(NewVod {
                    channel,
                    id,
                    url,
                    name,
                    date,
                    timestamp,
                })
                .await?;
        }

        Commands::Run {
            channel,
            continue_on_error,
        } => {
            executor.run(channel.as_deref(), continue_on_error).await?;
        }

        Commands::Status { channel, output } => {
            print!("{}", executor.status(channel.as_deref(), &output).await?);
        }

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Args::command();
            let bin_name = cmd.get_name().to_string();
            generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
        }

        Commands::Config { show, .. } => {
            if show {
                println!("{}", executor.config().show()?);
            } else {
                println!(
                    "Use --show to display current configuration or --reset to reset to defaults"
                );
            }
        }
    }

    Ok(())
}

fn init_logging(
    verbose: bool,
    quiet: bool,
    log_dir: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let filter = || {
        if quiet {
            EnvFilter::new("error")
        } else if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::from_default_env().add_directive(Level::INFO.into())
        }
    };

    let console = fmt::layer()
        .with_target(false)
        .with_level(verbose)
        .with_timer(LocalTimer)
        .with_writer(std::io::stderr)
        .with_filter(filter());

    let (file, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "vodarc.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(LocalTimer)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| CliError::Logging(e.to_string()))?;
    Ok(guard)
}
