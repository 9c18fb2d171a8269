//! Per-channel record of VODs and how far each one got.
//!
//! Stored as a pretty-printed JSON object keyed by VOD id so an interrupted
//! run picks every entry up at the phase after its last completed one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::job::Phase;
use crate::{Error, Result};

/// Date format of [`VodEntry::date`].
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Progress of a VOD through the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VodStatus {
    NotDownloaded,
    Downloaded,
    Fixed,
    /// Final parts exist in the recording directory (split or not).
    Split,
    /// Parts were moved into the upload folder.
    Ordered,
}

impl VodStatus {
    /// Phase the pipeline must resume at, `None` when archiving is finished.
    pub fn resume_phase(&self) -> Option<Phase> {
        match self {
            Self::NotDownloaded => Some(Phase::Download),
            Self::Downloaded => Some(Phase::Fixup),
            Self::Fixed => Some(Phase::Split),
            Self::Split | Self::Ordered => None,
        }
    }

    /// Status reached once `phase` completed.
    pub fn after(phase: Phase) -> Self {
        match phase {
            Phase::Download => Self::Downloaded,
            Phase::Fixup => Self::Fixed,
            Phase::Split | Phase::Finalize => Self::Split,
        }
    }
}

/// One VOD in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VodEntry {
    pub url: String,
    /// Base file name (no extension) used for every artifact of this VOD.
    pub file_name: String,
    pub status: VodStatus,
    /// Broadcast date, `YYYY-MM-DD`; VODs of one date are ordered together.
    pub date: String,
    /// Broadcast start as a unix timestamp; orders VODs within a date.
    pub timestamp: i64,
    /// Final part stems (`episode1` or `episode1_000`, ...), set once archived.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<String>,
    /// Last failure message, cleared on progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl VodEntry {
    pub fn new(
        url: impl Into<String>,
        file_name: impl Into<String>,
        date: impl Into<String>,
        timestamp: i64,
    ) -> Result<Self> {
        let date = date.into();
        NaiveDate::parse_from_str(&date, DATE_FORMAT)
            .map_err(|e| Error::ledger(format!("invalid date `{}`: {}", date, e)))?;

        Ok(Self {
            url: url.into(),
            file_name: file_name.into(),
            status: VodStatus::NotDownloaded,
            date,
            timestamp,
            parts: Vec::new(),
            last_error: None,
        })
    }

    /// Part stems, falling back to the base name for entries archived whole.
    pub fn part_stems(&self) -> Vec<String> {
        if self.parts.is_empty() {
            vec![self.file_name.clone()]
        } else {
            self.parts.clone()
        }
    }
}

/// JSON-backed ledger for one channel.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
    entries: BTreeMap<String, VodEntry>,
}

impl Ledger {
    /// Empty ledger that will be saved at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Ledger file of `channel` inside `data_dir`.
    pub fn path_for(data_dir: &Path, channel: &str) -> PathBuf {
        data_dir.join(format!("{}.json", channel))
    }

    /// Load from `path`; a missing file is an empty ledger.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No ledger yet, starting empty");
                return Ok(Self::new(path));
            }
            Err(e) => return Err(e.into()),
        };

        let entries = serde_json::from_str(&raw).map_err(|e| {
            Error::ledger(format!("failed to parse {}: {}", path.display(), e))
        })?;
        Ok(Self { path, entries })
    }

    /// Write to disk atomically (temp file, then rename).
    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(&self.entries)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), entries = self.entries.len(), "Saved ledger");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&VodEntry> {
        self.entries.get(id)
    }

    /// Every entry, by id.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &VodEntry)> {
        self.entries.iter().map(|(id, e)| (id.as_str(), e))
    }

    /// Add a new VOD. Ids and base file names must be unique.
    pub fn add(&mut self, id: impl Into<String>, entry: VodEntry) -> Result<()> {
        let id = id.into();
        if self.entries.contains_key(&id) {
            return Err(Error::ledger(format!("VOD {} is already in the ledger", id)));
        }
        if let Some((other, _)) = self
            .entries
            .iter()
            .find(|(_, e)| e.file_name == entry.file_name)
        {
            return Err(Error::ledger(format!(
                "file name `{}` is already used by VOD {}",
                entry.file_name, other
            )));
        }
        self.entries.insert(id, entry);
        Ok(())
    }

    /// Entries that still need pipeline work, oldest broadcast first.
    pub fn pending(&self) -> Vec<(String, VodEntry)> {
        let mut pending: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, e)| e.status.resume_phase().is_some())
            .map(|(id, e)| (id.clone(), e.clone()))
            .collect();
        pending.sort_by(|a, b| a.1.timestamp.cmp(&b.1.timestamp).then_with(|| a.0.cmp(&b.0)));
        pending
    }

    fn entry_mut(&mut self, id: &str) -> Result<&mut VodEntry> {
        self.entries
            .get_mut(id)
            .ok_or_else(|| Error::ledger(format!("VOD {} is not in the ledger", id)))
    }

    /// Move an entry forward. Status never goes backwards.
    pub fn set_status(&mut self, id: &str, status: VodStatus) -> Result<()> {
        let entry = self.entry_mut(id)?;
        if status < entry.status {
            return Err(Error::InvalidStateTransition {
                from: format!("{:?}", entry.status),
                to: format!("{:?}", status),
            });
        }
        entry.status = status;
        entry.last_error = None;
        Ok(())
    }

    pub fn set_parts(&mut self, id: &str, parts: Vec<String>) -> Result<()> {
        self.entry_mut(id)?.parts = parts;
        Ok(())
    }

    pub fn record_error(&mut self, id: &str, message: impl Into<String>) -> Result<()> {
        self.entry_mut(id)?.last_error = Some(message.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(name: &str, date: &str, ts: i64) -> VodEntry {
        VodEntry::new(format!("https://twitch.tv/videos/{}", ts), name, date, ts).unwrap()
    }

    #[test]
    fn test_status_resume_phase() {
        assert_eq!(VodStatus::NotDownloaded.resume_phase(), Some(Phase::Download));
        assert_eq!(VodStatus::Downloaded.resume_phase(), Some(Phase::Fixup));
        assert_eq!(VodStatus::Fixed.resume_phase(), Some(Phase::Split));
        assert_eq!(VodStatus::Split.resume_phase(), None);
        assert_eq!(VodStatus::after(Phase::Finalize), VodStatus::Split);
    }

    #[test]
    fn test_entry_rejects_bad_date() {
        assert!(VodEntry::new("u", "f", "2024-13-01", 0).is_err());
        assert!(VodEntry::new("u", "f", "yesterday", 0).is_err());
    }

    #[test]
    fn test_add_rejects_duplicates() {
        let mut ledger = Ledger::new("unused.json");
        ledger.add("1", entry("a", "2024-01-01", 1)).unwrap();
        assert!(ledger.add("1", entry("b", "2024-01-01", 2)).is_err());
        assert!(ledger.add("2", entry("a", "2024-01-01", 2)).is_err());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_pending_sorted_by_timestamp() {
        let mut ledger = Ledger::new("unused.json");
        ledger.add("late", entry("late", "2024-01-02", 200)).unwrap();
        ledger.add("early", entry("early", "2024-01-01", 100)).unwrap();
        ledger.add("done", entry("done", "2024-01-01", 50)).unwrap();
        ledger.set_status("done", VodStatus::Split).unwrap();

        let ids: Vec<_> = ledger.pending().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[test]
    fn test_status_never_goes_backwards() {
        let mut ledger = Ledger::new("unused.json");
        ledger.add("1", entry("a", "2024-01-01", 1)).unwrap();
        ledger.record_error("1", "boom").unwrap();
        ledger.set_status("1", VodStatus::Fixed).unwrap();
        assert!(ledger.get("1").unwrap().last_error.is_none());
        assert!(ledger.set_status("1", VodStatus::Downloaded).is_err());
        assert!(ledger.set_status("missing", VodStatus::Fixed).is_err());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = Ledger::path_for(&dir.path().join("data"), "somechannel");

        let mut ledger = Ledger::load(&path).await.unwrap();
        assert!(ledger.is_empty());

        ledger.add("123", entry("episode1", "2024-03-01", 1709280000)).unwrap();
        ledger
            .set_parts("123", vec!["episode1_000".to_string(), "episode1_001".to_string()])
            .unwrap();
        ledger.save().await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"NOT_DOWNLOADED\""));
        assert!(!raw.contains("last_error"));

        let loaded = Ledger::load(&path).await.unwrap();
        assert_eq!(loaded.get("123"), ledger.get("123"));
        assert_eq!(loaded.get("123").unwrap().part_stems().len(), 2);
    }

    #[tokio::test]
    async fn test_load_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = Ledger::load(&path).await.unwrap_err();
        assert!(matches!(err, Error::Ledger(_)));
    }
}
