//! Upload titles for ordered parts.
//!
//! With the prefix `Channel` and the part format `Part {part}`, the ordered
//! file `2024-03-01_002.mp4` is renamed to `Channel [2024-03-01] Part 2.mp4`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::job::MEDIA_EXTENSION;
use crate::ledger::DATE_FORMAT;
use crate::{Error, Result};

/// Replaced by the part number in [`TitleFormat::part_format`].
pub const PART_PLACEHOLDER: &str = "{part}";

fn default_part_format() -> String {
    format!("Part {}", PART_PLACEHOLDER)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleFormat {
    /// Leading text of every title. Files already starting with it are left alone.
    pub prefix: String,

    #[serde(default = "default_part_format")]
    pub part_format: String,

    /// Drop the part text when the date has a single part.
    #[serde(default)]
    pub omit_part_if_single: bool,
}

impl Default for TitleFormat {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            part_format: default_part_format(),
            omit_part_if_single: false,
        }
    }
}

impl TitleFormat {
    pub fn validate(&self) -> Result<()> {
        if self.prefix.trim().is_empty() {
            return Err(Error::config("title prefix must not be empty"));
        }
        for (field, value) in [("prefix", &self.prefix), ("part_format", &self.part_format)] {
            if value.contains(&['/', '\\'][..]) {
                return Err(Error::config(format!(
                    "title {} `{}` must not contain path separators",
                    field, value
                )));
            }
        }
        Ok(())
    }

    /// Title (file name) of `part` of `date`.
    pub fn title(&self, date: &str, part: u32, single: bool) -> String {
        if single && self.omit_part_if_single {
            format!("{} [{}].{}", self.prefix, date, MEDIA_EXTENSION)
        } else {
            let part = self.part_format.replace(PART_PLACEHOLDER, &part.to_string());
            format!("{} [{}] {}.{}", self.prefix, date, part, MEDIA_EXTENSION)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleRename {
    pub from: PathBuf,
    pub to: PathBuf,
}

/// `2024-03-01.mp4` is part 1, `2024-03-01_002.mp4` part 2.
fn parse_ordered_name(file_name: &str) -> Option<(&str, u32)> {
    let stem = file_name.strip_suffix(&format!(".{}", MEDIA_EXTENSION))?;
    let (date, part) = match stem.split_once('_') {
        Some((date, part)) if part.chars().all(|c| c.is_ascii_digit()) => {
            (date, part.parse().ok()?)
        }
        Some(_) => return None,
        None => (stem, 1),
    };
    NaiveDate::parse_from_str(date, DATE_FORMAT).ok()?;
    (part > 0).then_some((date, part))
}

/// Compute the renames giving every ordered file in `upload_dir` its title.
///
/// `file_names` are the names found in `upload_dir`. Names that already carry
/// the prefix or are not ordered part names are skipped.
pub fn plan_titles(
    upload_dir: &Path,
    file_names: &[String],
    format: &TitleFormat,
) -> Vec<TitleRename> {
    let mut names: Vec<&String> = file_names.iter().collect();
    names.sort();

    let mut renames = Vec::new();
    for name in names {
        if name.starts_with(&format.prefix) {
            continue;
        }
        let Some((date, part)) = parse_ordered_name(name) else {
            debug!(file = %name, "Not an ordered part, leaving name as is");
            continue;
        };
        let second = format!("{}_{:03}.{}", date, 2, MEDIA_EXTENSION);
        let single = part == 1 && !file_names.contains(&second);
        renames.push(TitleRename {
            from: upload_dir.join(name),
            to: upload_dir.join(format.title(date, part, single)),
        });
    }
    renames
}

/// Rename the ordered files of `upload_dir` to their titles.
///
/// Nothing is renamed when two files would get the same title or a title is
/// already taken. A missing `upload_dir` means there is nothing to do.
pub async fn apply_titles(upload_dir: &Path, format: &TitleFormat) -> Result<Vec<TitleRename>> {
    format.validate()?;
    if !tokio::fs::try_exists(upload_dir).await? {
        return Ok(Vec::new());
    }

    let mut file_names = Vec::new();
    let mut entries = tokio::fs::read_dir(upload_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file()
            && let Some(name) = entry.file_name().to_str()
        {
            file_names.push(name.to_string());
        }
    }

    let renames = plan_titles(upload_dir, &file_names, format);
    let mut targets = HashSet::new();
    for rename in &renames {
        if !targets.insert(&rename.to) || tokio::fs::try_exists(&rename.to).await? {
            return Err(Error::ledger(format!(
                "refusing to rename {} to existing title {}",
                rename.from.display(),
                rename.to.display()
            )));
        }
    }

    for rename in &renames {
        info!(from = %rename.from.display(), to = %rename.to.display(), "Applying title");
        tokio::fs::rename(&rename.from, &rename.to).await?;
    }
    Ok(renames)
}
