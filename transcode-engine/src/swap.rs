//! Atomic replacement, crash recovery, and the deferred-delete sweep.
//!
//! On-disk protocol around a segment `P`:
//!   1. rename `P` -> `P.original`
//!   2. rename `P.transcoding` -> `P`
//!   3. write `P.transcoded` marker (tmp + fsync + rename)
//! Startup reconciliation repairs any state a crash can leave behind, and
//! the sweep deletes `P.original` once its marker's keep window expires.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TranscodeError;

/// Sidecar record written next to a replaced segment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscodeMarker {
    pub transcoded_at: DateTime<Utc>,
    pub original_size: u64,
    pub new_size: u64,
    pub savings_bytes: u64,
    /// Absolute path of the retained original
    pub original_file: PathBuf,
    /// Earliest time the original may be deleted
    pub delete_after: DateTime<Utc>,
}

/// delete_after must lie strictly after transcoded_at, even with a
/// zero-length keep window
fn effective_keep(keep: ChronoDuration) -> ChronoDuration {
    if keep > ChronoDuration::zero() {
        keep
    } else {
        ChronoDuration::seconds(1)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

pub fn transcoding_path(p: &Path) -> PathBuf {
    with_suffix(p, ".transcoding")
}

pub fn original_path(p: &Path) -> PathBuf {
    with_suffix(p, ".original")
}

pub fn marker_path(p: &Path) -> PathBuf {
    with_suffix(p, ".transcoded")
}

/// Strip a known auxiliary suffix, returning the segment path it belongs to
fn segment_for_auxiliary(path: &Path, suffix: &str) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(suffix)?;
    Some(path.with_file_name(stem))
}

/// Write the marker atomically: tmp file, fsync, rename into place
pub fn write_marker(path: &Path, marker: &TranscodeMarker) -> Result<(), TranscodeError> {
    let tmp = with_suffix(path, ".tmp");
    let payload = serde_json::to_vec_pretty(marker)
        .map_err(|e| TranscodeError::Marker(e.to_string()))?;
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&payload)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_marker(path: &Path) -> Result<TranscodeMarker, TranscodeError> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| TranscodeError::Marker(e.to_string()))
}

/// Swap a verified temp into place and persist the marker.
///
/// Returns the marker on success. The temp must already exist at
/// `P.transcoding`.
pub fn swap_in(
    p: &Path,
    keep_original: ChronoDuration,
    now: DateTime<Utc>,
) -> Result<TranscodeMarker, TranscodeError> {
    let temp = transcoding_path(p);
    let original = original_path(p);

    let original_size = std::fs::metadata(p)?.len();
    let new_size = std::fs::metadata(&temp)?.len();

    std::fs::rename(p, &original)?;
    std::fs::rename(&temp, p)?;

    let marker = TranscodeMarker {
        transcoded_at: now,
        original_size,
        new_size,
        savings_bytes: original_size.saturating_sub(new_size),
        original_file: original,
        delete_after: now + effective_keep(keep_original),
    };
    write_marker(&marker_path(p), &marker)?;
    Ok(marker)
}

#[derive(Debug, Default, PartialEq)]
pub struct ReconcileReport {
    pub temps_deleted: usize,
    pub swaps_rolled_back: usize,
    pub markers_synthesized: usize,
    pub orphan_markers_deleted: usize,
}

/// Repair partial swap states left by a crash.
///
/// Idempotent: running it on a consistent tree changes nothing.
pub fn reconcile(
    base: &Path,
    default_keep: ChronoDuration,
) -> Result<ReconcileReport, TranscodeError> {
    let mut report = ReconcileReport::default();

    for dir in source_dirs(base)? {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        paths.sort();

        for path in paths {
            // An earlier repair may have renamed this entry away
            if !path.exists() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if name.ends_with(".transcoding") {
                let Some(segment) = segment_for_auxiliary(&path, ".transcoding") else {
                    continue;
                };
                let original = original_path(&segment);
                if original.exists() && !segment.exists() {
                    // Crashed between the two renames: roll back
                    std::fs::rename(&original, &segment)?;
                    std::fs::remove_file(&path)?;
                    report.swaps_rolled_back += 1;
                    tracing::warn!(
                        "rolled back interrupted swap of {}",
                        segment.display()
                    );
                } else {
                    // Unfinished or stale temp output
                    std::fs::remove_file(&path)?;
                    report.temps_deleted += 1;
                    tracing::warn!("removed stale temp {}", path.display());
                }
            } else if name.ends_with(".original") {
                let Some(segment) = segment_for_auxiliary(&path, ".original") else {
                    continue;
                };
                let marker = marker_path(&segment);
                if segment.exists() && !marker.exists() {
                    // Swap completed but the marker write did not
                    let now = Utc::now();
                    let original_size = std::fs::metadata(&path)?.len();
                    let new_size = std::fs::metadata(&segment)?.len();
                    write_marker(
                        &marker,
                        &TranscodeMarker {
                            transcoded_at: now,
                            original_size,
                            new_size,
                            savings_bytes: original_size.saturating_sub(new_size),
                            original_file: path.clone(),
                            delete_after: now + effective_keep(default_keep),
                        },
                    )?;
                    report.markers_synthesized += 1;
                    tracing::warn!(
                        "synthesized missing marker for {}",
                        segment.display()
                    );
                } else if !segment.exists() && !transcoding_path(&segment).exists() {
                    // Nothing replaced it: restore the original
                    std::fs::rename(&path, &segment)?;
                    report.swaps_rolled_back += 1;
                    tracing::warn!("restored original {}", segment.display());
                }
            } else if name.ends_with(".transcoded") {
                let Some(segment) = segment_for_auxiliary(&path, ".transcoded") else {
                    continue;
                };
                if !original_path(&segment).exists() {
                    std::fs::remove_file(&path)?;
                    report.orphan_markers_deleted += 1;
                    tracing::info!("removed orphan marker {}", path.display());
                }
            }
        }
    }

    Ok(report)
}

#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub originals_deleted: usize,
    pub bytes_freed: u64,
}

/// Delete originals whose keep window has expired, markers included.
///
/// Bounded to `limit` deletions per sweep; idempotent between clock
/// advances.
pub fn deferred_delete_sweep(
    base: &Path,
    limit: usize,
    now: DateTime<Utc>,
) -> Result<SweepOutcome, TranscodeError> {
    let mut outcome = SweepOutcome::default();

    'outer: for dir in source_dirs(base)? {
        for entry in std::fs::read_dir(&dir)?.filter_map(|e| e.ok()) {
            if outcome.originals_deleted >= limit {
                break 'outer;
            }
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(".transcoded") {
                continue;
            }

            let marker = match read_marker(&path) {
                Ok(marker) => marker,
                Err(e) => {
                    tracing::error!("unreadable marker {}: {}", path.display(), e);
                    continue;
                }
            };
            if now <= marker.delete_after {
                continue;
            }

            if marker.original_file.exists() {
                let size = std::fs::metadata(&marker.original_file).map(|m| m.len()).unwrap_or(0);
                std::fs::remove_file(&marker.original_file)?;
                outcome.bytes_freed += size;
                tracing::info!(
                    "deleted retained original {} ({} bytes)",
                    marker.original_file.display(),
                    size
                );
            }
            std::fs::remove_file(&path)?;
            outcome.originals_deleted += 1;
        }
    }

    Ok(outcome)
}

fn source_dirs(base: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(base)?.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, PathBuf) {
        let base = tempfile::tempdir().unwrap();
        let cam = base.path().join("cam1");
        std::fs::create_dir(&cam).unwrap();
        (base, cam)
    }

    fn seg(cam: &Path) -> PathBuf {
        cam.join("cam1_20230101_000000.mp4")
    }

    #[test]
    fn test_marker_roundtrip() {
        let (_base, cam) = setup();
        let path = cam.join("cam1_20230101_000000.mp4.transcoded");
        let marker = TranscodeMarker {
            transcoded_at: Utc::now(),
            original_size: 1000,
            new_size: 400,
            savings_bytes: 600,
            original_file: cam.join("cam1_20230101_000000.mp4.original"),
            delete_after: Utc::now() + ChronoDuration::days(1),
        };

        write_marker(&path, &marker).unwrap();
        let read = read_marker(&path).unwrap();
        assert_eq!(read, marker);
        assert!(read.delete_after > read.transcoded_at);
    }

    #[test]
    fn test_swap_in() {
        let (base, cam) = setup();
        let p = seg(&cam);
        std::fs::write(&p, vec![0u8; 1000]).unwrap();
        std::fs::write(transcoding_path(&p), vec![0u8; 400]).unwrap();

        let marker = swap_in(&p, ChronoDuration::days(1), Utc::now()).unwrap();

        assert_eq!(std::fs::metadata(&p).unwrap().len(), 400);
        assert_eq!(
            std::fs::metadata(original_path(&p)).unwrap().len(),
            1000
        );
        assert!(marker_path(&p).exists());
        assert!(!transcoding_path(&p).exists());
        assert_eq!(marker.savings_bytes, 600);

        // Consistent state: reconcile is a no-op
        let report = reconcile(base.path(), ChronoDuration::days(1)).unwrap();
        assert_eq!(report, ReconcileReport::default());
    }

    #[test]
    fn test_swap_with_zero_keep_still_orders_timestamps() {
        let (_base, cam) = setup();
        let p = seg(&cam);
        std::fs::write(&p, vec![0u8; 1000]).unwrap();
        std::fs::write(transcoding_path(&p), vec![0u8; 400]).unwrap();

        let marker = swap_in(&p, ChronoDuration::zero(), Utc::now()).unwrap();
        assert!(marker.delete_after > marker.transcoded_at);
    }

    #[test]
    fn test_reconcile_deletes_stale_temp() {
        let (base, cam) = setup();
        let p = seg(&cam);
        std::fs::write(&p, vec![0u8; 1000]).unwrap();
        std::fs::write(transcoding_path(&p), vec![0u8; 100]).unwrap();

        let report = reconcile(base.path(), ChronoDuration::days(1)).unwrap();
        assert_eq!(report.temps_deleted, 1);
        assert!(p.exists());
        assert!(!transcoding_path(&p).exists());

        // Second run changes nothing
        let report = reconcile(base.path(), ChronoDuration::days(1)).unwrap();
        assert_eq!(report, ReconcileReport::default());
    }

    #[test]
    fn test_reconcile_rolls_back_interrupted_swap() {
        let (base, cam) = setup();
        let p = seg(&cam);
        // Crash between rename 1 and rename 2
        std::fs::write(original_path(&p), vec![0u8; 1000]).unwrap();
        std::fs::write(transcoding_path(&p), vec![0u8; 400]).unwrap();

        let report = reconcile(base.path(), ChronoDuration::days(1)).unwrap();
        assert_eq!(report.swaps_rolled_back, 1);
        assert_eq!(std::fs::metadata(&p).unwrap().len(), 1000);
        assert!(!original_path(&p).exists());
        assert!(!transcoding_path(&p).exists());
    }

    #[test]
    fn test_reconcile_synthesizes_missing_marker() {
        let (base, cam) = setup();
        let p = seg(&cam);
        // Crash between rename 2 and the marker write
        std::fs::write(&p, vec![0u8; 400]).unwrap();
        std::fs::write(original_path(&p), vec![0u8; 1000]).unwrap();

        let report = reconcile(base.path(), ChronoDuration::days(2)).unwrap();
        assert_eq!(report.markers_synthesized, 1);

        let marker = read_marker(&marker_path(&p)).unwrap();
        assert_eq!(marker.original_size, 1000);
        assert_eq!(marker.new_size, 400);
        assert!(marker.delete_after > marker.transcoded_at);
    }

    #[test]
    fn test_reconcile_removes_orphan_marker() {
        let (base, cam) = setup();
        let p = seg(&cam);
        std::fs::write(&p, vec![0u8; 400]).unwrap();
        write_marker(
            &marker_path(&p),
            &TranscodeMarker {
                transcoded_at: Utc::now(),
                original_size: 1000,
                new_size: 400,
                savings_bytes: 600,
                original_file: original_path(&p),
                delete_after: Utc::now(),
            },
        )
        .unwrap();

        let report = reconcile(base.path(), ChronoDuration::days(1)).unwrap();
        assert_eq!(report.orphan_markers_deleted, 1);
        assert!(!marker_path(&p).exists());
        assert!(p.exists());
    }

    #[test]
    fn test_sweep_deletes_expired_originals() {
        let (base, cam) = setup();
        let p = seg(&cam);
        std::fs::write(&p, vec![0u8; 400]).unwrap();
        std::fs::write(original_path(&p), vec![0u8; 1000]).unwrap();
        write_marker(
            &marker_path(&p),
            &TranscodeMarker {
                transcoded_at: Utc::now() - ChronoDuration::hours(2),
                original_size: 1000,
                new_size: 400,
                savings_bytes: 600,
                original_file: original_path(&p),
                delete_after: Utc::now() - ChronoDuration::hours(1),
            },
        )
        .unwrap();

        let outcome = deferred_delete_sweep(base.path(), 100, Utc::now()).unwrap();
        assert_eq!(outcome.originals_deleted, 1);
        assert_eq!(outcome.bytes_freed, 1000);
        assert!(!original_path(&p).exists());
        assert!(!marker_path(&p).exists());
        assert!(p.exists());

        // Idempotent with no clock advance
        let outcome = deferred_delete_sweep(base.path(), 100, Utc::now()).unwrap();
        assert_eq!(outcome.originals_deleted, 0);
    }

    #[test]
    fn test_sweep_respects_keep_window() {
        let (base, cam) = setup();
        let p = seg(&cam);
        std::fs::write(&p, vec![0u8; 400]).unwrap();
        std::fs::write(original_path(&p), vec![0u8; 1000]).unwrap();
        write_marker(
            &marker_path(&p),
            &TranscodeMarker {
                transcoded_at: Utc::now(),
                original_size: 1000,
                new_size: 400,
                savings_bytes: 600,
                original_file: original_path(&p),
                delete_after: Utc::now() + ChronoDuration::days(1),
            },
        )
        .unwrap();

        let outcome = deferred_delete_sweep(base.path(), 100, Utc::now()).unwrap();
        assert_eq!(outcome.originals_deleted, 0);
        assert!(original_path(&p).exists());
    }
}
