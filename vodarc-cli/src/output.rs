use crate::{cli::OutputFormat, error::Result};
#[cfg(feature = "colored-output")]
use colored::*;
use serde::Serialize;
#[cfg(feature = "table-output")]
use tabled::{Table, Tabled, settings::Style};
use vod_archive::config::format_hhmmss;
use vod_archive::order::OrderMove;
use vod_archive::title::TitleRename;
use vod_archive::{ArchiveOutcome, GeneratedCommand, VodEntry, VodStatus};

/// One step of a dry run.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedStep {
    pub phase: String,
    pub command: String,
    pub program: String,
    pub args: Vec<String>,
}

impl PlannedStep {
    pub fn new(phase: impl Into<String>, command: &GeneratedCommand) -> Self {
        Self {
            phase: phase.into(),
            command: command.render(),
            program: command.program().to_string(),
            args: command.args().to_vec(),
        }
    }
}

/// Ledger entries of one channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub channel: String,
    pub entries: Vec<(String, VodEntry)>,
}

#[cfg(feature = "table-output")]
#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Channel")]
    channel: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "File")]
    file_name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Error")]
    error: String,
}

pub struct OutputManager {
    #[cfg_attr(not(feature = "colored-output"), allow(dead_code))]
    colored: bool,
}

impl OutputManager {
    pub fn new(colored: bool) -> Self {
        Self { colored }
    }

    pub fn format_plan(
        &self,
        steps: &[PlannedStep],
        notes: &[String],
        format: &OutputFormat,
    ) -> Result<String> {
        match format {
            OutputFormat::Json => {
                #[derive(Serialize)]
                struct Plan<'a> {
                    steps: &'a [PlannedStep],
                    notes: &'a [String],
                }
                Ok(serde_json::to_string_pretty(&Plan { steps, notes })?)
            }
            OutputFormat::Pretty | OutputFormat::Table => {
                let mut output = String::new();
                for (index, step) in steps.iter().enumerate() {
                    output.push_str(&format!(
                        "{} {}\n    {}\n",
                        self.heading(&format!("{}.", index + 1)),
                        self.heading(&step.phase),
                        step.command
                    ));
                }
                for note in notes {
                    output.push_str(&format!("{}\n", self.dim(note)));
                }
                Ok(output)
            }
        }
    }

    pub fn format_outcome(&self, outcome: &ArchiveOutcome) -> String {
        let mut output = format!(
            "{} {} ({})\n",
            self.success("✓"),
            if outcome.split {
                "Archived and split"
            } else {
                "Archived"
            },
            format_hhmmss(outcome.duration)
        );
        for path in &outcome.outputs {
            output.push_str(&format!("  {}\n", path.display()));
        }
        output
    }

    pub fn format_status(
        &self,
        channels: &[ChannelStatus],
        format: &OutputFormat,
    ) -> Result<String> {
        match format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(channels)?),
            #[cfg(feature = "table-output")]
            OutputFormat::Table => Ok(self.format_status_table(channels)),
            #[cfg(not(feature = "table-output"))]
            OutputFormat::Table => Ok(self.format_status_pretty(channels)),
            OutputFormat::Pretty => Ok(self.format_status_pretty(channels)),
        }
    }

    fn format_status_pretty(&self, channels: &[ChannelStatus]) -> String {
        let mut output = String::new();
        for channel in channels {
            output.push_str(&format!(
                "{} ({} VODs)\n",
                self.heading(&channel.channel),
                channel.entries.len()
            ));
            if channel.entries.is_empty() {
                output.push_str(&format!("  {}\n", self.dim("nothing queued")));
            }
            for (id, entry) in &channel.entries {
                output.push_str(&format!(
                    "  {} {} {} {}\n",
                    entry.date,
                    id,
                    entry.file_name,
                    self.status(entry.status)
                ));
                if let Some(error) = &entry.last_error {
                    output.push_str(&format!("      {}\n", self.failure(error)));
                }
            }
        }
        output
    }

    #[cfg(feature = "table-output")]
    fn format_status_table(&self, channels: &[ChannelStatus]) -> String {
        let rows: Vec<StatusRow> = channels
            .iter()
            .flat_map(|c| {
                c.entries.iter().map(|(id, entry)| StatusRow {
                    channel: c.channel.clone(),
                    id: id.clone(),
                    date: entry.date.clone(),
                    file_name: entry.file_name.clone(),
                    status: status_label(entry.status).to_string(),
                    error: entry.last_error.clone().unwrap_or_default(),
                })
            })
            .collect();
        Table::new(rows).with(Style::rounded()).to_string()
    }

    pub fn format_moves(&self, moves: &[OrderMove]) -> String {
        moves
            .iter()
            .map(|m| format!("  {} → {}\n", m.from.display(), m.to.display()))
            .collect()
    }

    pub fn format_titles(&self, renames: &[TitleRename]) -> String {
        renames
            .iter()
            .map(|r| {
                let to = r.to.display().to_string();
                format!("  {} → {}\n", r.from.display(), self.heading(&to))
            })
            .collect()
    }

    fn status(&self, status: VodStatus) -> String {
        let label = status_label(status);
        #[cfg(feature = "colored-output")]
        if self.colored {
            return match status {
                VodStatus::Split | VodStatus::Ordered => label.green().to_string(),
                _ => label.yellow().to_string(),
            };
        }
        label.to_string()
    }

    fn heading(&self, text: &str) -> String {
        #[cfg(feature = "colored-output")]
        if self.colored {
            return text.bold().to_string();
        }
        text.to_string()
    }

    fn dim(&self, text: &str) -> String {
        #[cfg(feature = "colored-output")]
        if self.colored {
            return text.dimmed().to_string();
        }
        text.to_string()
    }

    fn success(&self, text: &str) -> String {
        #[cfg(feature = "colored-output")]
        if self.colored {
            return text.green().bold().to_string();
        }
        text.to_string()
    }

    fn failure(&self, text: &str) -> String {
        #[cfg(feature = "colored-output")]
        if self.colored {
            return text.red().to_string();
        }
        text.to_string()
    }
}

fn status_label(status: VodStatus) -> &'static str {
    match status {
        VodStatus::NotDownloaded => "not downloaded",
        VodStatus::Downloaded => "downloaded",
        VodStatus::Fixed => "fixed",
        VodStatus::Split => "archived",
        VodStatus::Ordered => "ordered",
    }
}
