//! Date-based ordering of archived parts into an upload folder.
//!
//! Parts of every VOD broadcast on one date are numbered in broadcast order:
//! `2024-03-01.mp4` when the date has a single part, otherwise
//! `2024-03-01_001.mp4`, `2024-03-01_002.mp4`, ...

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::job::MEDIA_EXTENSION;
use crate::ledger::{Ledger, VodStatus};
use crate::{Error, Result};

/// Folder (inside the recording directory) receiving ordered parts.
pub const UPLOAD_FOLDER_NAME: &str = "upload";

/// A single planned rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderMove {
    pub vod_id: String,
    pub from: PathBuf,
    pub to: PathBuf,
}

/// Compute the renames needed to order every `Split` VOD of `ledger`.
///
/// A date is only ordered once every VOD of that date is archived, so the
/// part count of the whole day is known. VODs of the date that were ordered
/// by an earlier run are counted for numbering but not moved.
pub fn plan_order(ledger: &Ledger, recording_dir: &Path) -> Vec<OrderMove> {
    let dates: BTreeSet<&str> = ledger
        .entries()
        .filter(|(_, e)| e.status == VodStatus::Split)
        .map(|(_, e)| e.date.as_str())
        .collect();

    let mut candidates: Vec<_> = ledger
        .entries()
        .filter(|(_, e)| dates.contains(e.date.as_str()))
        .collect();
    candidates.sort_by(|a, b| a.1.timestamp.cmp(&b.1.timestamp).then_with(|| a.0.cmp(b.0)));

    let upload_dir = recording_dir.join(UPLOAD_FOLDER_NAME);
    let mut moves = Vec::new();

    for date in dates {
        let same_day: Vec<_> = candidates.iter().filter(|(_, e)| e.date == date).collect();
        if let Some((waiting, entry)) = same_day.iter().find(|(_, e)| e.status < VodStatus::Split) {
            debug!(
                date,
                vod = %waiting,
                status = ?entry.status,
                "Holding date until every VOD is archived"
            );
            continue;
        }

        let parts: Vec<(&str, bool, String)> = same_day
            .iter()
            .flat_map(|(id, e)| {
                let movable = e.status == VodStatus::Split;
                e.part_stems().into_iter().map(move |stem| (*id, movable, stem))
            })
            .collect();

        let single = parts.len() == 1;
        for (index, (id, movable, stem)) in parts.into_iter().enumerate() {
            if !movable {
                continue;
            }
            let target = if single {
                format!("{}.{}", date, MEDIA_EXTENSION)
            } else {
                format!("{}_{:03}.{}", date, index + 1, MEDIA_EXTENSION)
            };
            moves.push(OrderMove {
                vod_id: id.to_string(),
                from: recording_dir.join(format!("{}.{}", stem, MEDIA_EXTENSION)),
                to: upload_dir.join(target),
            });
        }
    }

    moves
}

/// Perform `moves` and mark the moved VODs as `Ordered`.
///
/// Nothing is moved when any target already exists while its source is still
/// present. A move whose source is gone and whose target exists was done by
/// an interrupted earlier run and is skipped. Each VOD is marked `Ordered`
/// and the ledger saved as soon as all of its parts are in place.
pub async fn apply_order(moves: &[OrderMove], ledger: &mut Ledger) -> Result<()> {
    for mv in moves {
        if exists(&mv.to).await? && exists(&mv.from).await? {
            return Err(Error::ledger(format!(
                "refusing to order {} over existing {}",
                mv.from.display(),
                mv.to.display()
            )));
        }
    }

    for vod_moves in moves.chunk_by(|a, b| a.vod_id == b.vod_id) {
        for mv in vod_moves {
            if !exists(&mv.from).await? && exists(&mv.to).await? {
                debug!(to = %mv.to.display(), "Part already ordered");
                continue;
            }
            if let Some(parent) = mv.to.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            info!(from = %mv.from.display(), to = %mv.to.display(), "Ordering part");
            tokio::fs::rename(&mv.from, &mv.to).await?;
        }

        ledger.set_status(&vod_moves[0].vod_id, VodStatus::Ordered)?;
        ledger.save().await?;
    }
    Ok(())
}

async fn exists(path: &Path) -> Result<bool> {
    Ok(tokio::fs::try_exists(path).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::VodEntry;
    use std::fs;
    use tempfile::TempDir;

    fn add(ledger: &mut Ledger, id: &str, date: &str, ts: i64, status: VodStatus, parts: &[&str]) {
        ledger
            .add(id, VodEntry::new(format!("https://x/{}", id), id, date, ts).unwrap())
            .unwrap();
        ledger.set_status(id, status).unwrap();
        ledger
            .set_parts(id, parts.iter().map(|p| p.to_string()).collect())
            .unwrap();
    }

    fn pair(from: &str, to: &str) -> (String, String) {
        (from.to_string(), to.to_string())
    }

    fn names(moves: &[OrderMove]) -> Vec<(String, String)> {
        moves
            .iter()
            .map(|m| {
                (
                    m.from.file_name().unwrap().to_string_lossy().to_string(),
                    m.to.file_name().unwrap().to_string_lossy().to_string(),
                )
            })
            .collect()
    }

    #[test]
    fn test_single_part_date_gets_bare_name() {
        let mut ledger = Ledger::new("unused.json");
        add(&mut ledger, "a", "2024-03-01", 10, VodStatus::Split, &[]);

        let moves = plan_order(&ledger, Path::new("/rec"));
        assert_eq!(names(&moves), vec![pair("a.mp4", "2024-03-01.mp4")]);
        assert_eq!(moves[0].to, PathBuf::from("/rec/upload/2024-03-01.mp4"));
    }

    #[test]
    fn test_parts_numbered_across_vods_in_timestamp_order() {
        let mut ledger = Ledger::new("unused.json");
        add(&mut ledger, "late", "2024-03-01", 20, VodStatus::Split, &[]);
        add(
            &mut ledger,
            "early",
            "2024-03-01",
            10,
            VodStatus::Split,
            &["early_000", "early_001"],
        );
        add(&mut ledger, "other", "2024-03-02", 30, VodStatus::Split, &[]);

        let moves = plan_order(&ledger, Path::new("/rec"));
        assert_eq!(
            names(&moves),
            vec![
                pair("early_000.mp4", "2024-03-01_001.mp4"),
                pair("early_001.mp4", "2024-03-01_002.mp4"),
                pair("late.mp4", "2024-03-01_003.mp4"),
                pair("other.mp4", "2024-03-02.mp4"),
            ]
        );
    }

    #[test]
    fn test_same_day_vods_ordered_earlier_are_counted_not_moved() {
        let mut ledger = Ledger::new("unused.json");
        add(&mut ledger, "first", "2024-03-01", 10, VodStatus::Ordered, &[]);
        add(&mut ledger, "second", "2024-03-01", 20, VodStatus::Split, &[]);
        add(&mut ledger, "unrelated", "2024-02-01", 5, VodStatus::Ordered, &[]);

        let moves = plan_order(&ledger, Path::new("/rec"));
        assert_eq!(
            names(&moves),
            vec![pair("second.mp4", "2024-03-01_002.mp4")]
        );
    }

    #[test]
    fn test_date_held_until_every_vod_is_archived() {
        let mut ledger = Ledger::new("unused.json");
        add(&mut ledger, "a", "2024-03-01", 10, VodStatus::NotDownloaded, &[]);
        add(&mut ledger, "b", "2024-03-01", 20, VodStatus::Split, &[]);
        add(&mut ledger, "c", "2024-03-02", 30, VodStatus::Split, &[]);

        let moves = plan_order(&ledger, Path::new("/rec"));
        assert_eq!(names(&moves), vec![pair("c.mp4", "2024-03-02.mp4")]);

        // Once "a" is split the whole day is numbered together.
        ledger.set_status("a", VodStatus::Split).unwrap();
        ledger
            .set_parts("a", vec!["a_000".to_string(), "a_001".to_string()])
            .unwrap();
        let moves = plan_order(&ledger, Path::new("/rec"));
        assert_eq!(
            names(&moves),
            vec![
                pair("a_000.mp4", "2024-03-01_001.mp4"),
                pair("a_001.mp4", "2024-03-01_002.mp4"),
                pair("b.mp4", "2024-03-01_003.mp4"),
                pair("c.mp4", "2024-03-02.mp4"),
            ]
        );
    }

    #[test]
    fn test_nothing_to_order() {
        let mut ledger = Ledger::new("unused.json");
        add(&mut ledger, "a", "2024-03-01", 10, VodStatus::Fixed, &[]);
        assert!(plan_order(&ledger, Path::new("/rec")).is_empty());
    }

    #[tokio::test]
    async fn test_apply_order_moves_files_and_updates_ledger() {
        let dir = TempDir::new().unwrap();
        let mut ledger = Ledger::new(dir.path().join("chan.json"));
        add(&mut ledger, "a", "2024-03-01", 10, VodStatus::Split, &["a_000", "a_001"]);
        fs::write(dir.path().join("a_000.mp4"), b"0").unwrap();
        fs::write(dir.path().join("a_001.mp4"), b"1").unwrap();

        let moves = plan_order(&ledger, dir.path());
        apply_order(&moves, &mut ledger).await.unwrap();

        let upload = dir.path().join(UPLOAD_FOLDER_NAME);
        assert_eq!(fs::read(upload.join("2024-03-01_001.mp4")).unwrap(), b"0");
        assert_eq!(fs::read(upload.join("2024-03-01_002.mp4")).unwrap(), b"1");
        assert!(!dir.path().join("a_000.mp4").exists());
        assert_eq!(ledger.get("a").unwrap().status, VodStatus::Ordered);

        let reloaded = Ledger::load(dir.path().join("chan.json")).await.unwrap();
        assert_eq!(reloaded.get("a").unwrap().status, VodStatus::Ordered);
    }

    #[tokio::test]
    async fn test_apply_order_never_overwrites_an_ordered_file() {
        let dir = TempDir::new().unwrap();
        let mut ledger = Ledger::new(dir.path().join("chan.json"));
        add(&mut ledger, "a", "2024-03-01", 10, VodStatus::Split, &[]);
        fs::write(dir.path().join("a.mp4"), b"A").unwrap();
        let upload = dir.path().join(UPLOAD_FOLDER_NAME);
        fs::create_dir_all(&upload).unwrap();
        fs::write(upload.join("2024-03-01.mp4"), b"earlier").unwrap();

        let moves = plan_order(&ledger, dir.path());
        let err = apply_order(&moves, &mut ledger).await.unwrap_err();

        assert!(matches!(err, Error::Ledger(_)));
        assert_eq!(fs::read(upload.join("2024-03-01.mp4")).unwrap(), b"earlier");
        assert!(dir.path().join("a.mp4").exists());
        assert_eq!(ledger.get("a").unwrap().status, VodStatus::Split);
    }

    #[tokio::test]
    async fn test_apply_order_recovers_from_interrupted_run() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chan.json");
        let mut ledger = Ledger::new(&path);
        add(&mut ledger, "a", "2024-03-01", 10, VodStatus::Split, &[]);
        add(&mut ledger, "b", "2024-03-01", 20, VodStatus::Split, &[]);
        fs::write(dir.path().join("a.mp4"), b"A").unwrap();

        // b.mp4 is missing: a is moved, b fails.
        let moves = plan_order(&ledger, dir.path());
        assert!(apply_order(&moves, &mut ledger).await.is_err());

        let upload = dir.path().join(UPLOAD_FOLDER_NAME);
        assert_eq!(fs::read(upload.join("2024-03-01_001.mp4")).unwrap(), b"A");
        let reloaded = Ledger::load(&path).await.unwrap();
        assert_eq!(reloaded.get("a").unwrap().status, VodStatus::Ordered);
        assert_eq!(reloaded.get("b").unwrap().status, VodStatus::Split);

        // A fresh plan only moves what is left, keeping b's number.
        assert_eq!(
            names(&plan_order(&reloaded, dir.path())),
            vec![pair("b.mp4", "2024-03-01_002.mp4")]
        );

        // Replaying the original moves skips the part already in place.
        fs::write(dir.path().join("b.mp4"), b"B").unwrap();
        apply_order(&moves, &mut ledger).await.unwrap();

        assert_eq!(fs::read(upload.join("2024-03-01_001.mp4")).unwrap(), b"A");
        assert_eq!(fs::read(upload.join("2024-03-01_002.mp4")).unwrap(), b"B");
        assert_eq!(ledger.get("b").unwrap().status, VodStatus::Ordered);
    }
}
