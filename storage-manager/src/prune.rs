//! Space reclamation: age-based pruning and emergency oldest-first deletion.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::disk::{self, format_bytes, DiskUsage};
use crate::error::StorageError;
use crate::segment::{self, newest_per_source, transcoding_companion};

/// Hard cap on deletions per emergency run
pub const EMERGENCY_MAX_FILES: usize = 1000;

#[derive(Debug, Clone, Copy, Default)]
pub struct PruneOutcome {
    pub removed_count: usize,
    pub freed_bytes: u64,
}

/// Remove segments whose mtime is older than `now - max_age`.
///
/// The newest segment of each source and anything with a `.transcoding`
/// companion are never touched. With `dry_run` set, reports what would have
/// been removed without deleting.
pub fn prune_by_age(
    base: &Path,
    max_age: Duration,
    dry_run: bool,
) -> Result<PruneOutcome, StorageError> {
    let segments = segment::scan(base, None)?;
    let protected: HashSet<PathBuf> = newest_per_source(&segments)
        .into_iter()
        .map(Path::to_path_buf)
        .collect();
    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut outcome = PruneOutcome::default();
    for seg in &segments {
        if seg.modified >= cutoff {
            continue;
        }
        if protected.contains(&seg.path) {
            continue;
        }
        if transcoding_companion(&seg.path).exists() {
            continue;
        }

        if dry_run {
            tracing::info!("would remove {} ({})", seg.path.display(), format_bytes(seg.size));
            outcome.removed_count += 1;
            outcome.freed_bytes += seg.size;
            continue;
        }

        match std::fs::remove_file(&seg.path) {
            Ok(()) => {
                tracing::info!("removed {} ({})", seg.path.display(), format_bytes(seg.size));
                outcome.removed_count += 1;
                outcome.freed_bytes += seg.size;
            }
            Err(e) => {
                tracing::error!("failed to remove {}: {}", seg.path.display(), e);
            }
        }
    }

    Ok(outcome)
}

/// Delete oldest segments across all sources until the volume's used
/// fraction drops to `target_fraction`.
///
/// Strictly oldest mtime first, ties broken by lexical path order. Bounded
/// to [`EMERGENCY_MAX_FILES`] deletions per invocation.
pub fn emergency_prune(base: &Path, target_fraction: f64) -> Result<PruneOutcome, StorageError> {
    emergency_prune_with(base, target_fraction, || disk::usage(base))
}

/// Emergency prune with an injectable usage probe (re-queried per deletion)
pub fn emergency_prune_with(
    base: &Path,
    target_fraction: f64,
    usage: impl Fn() -> Result<DiskUsage, StorageError>,
) -> Result<PruneOutcome, StorageError> {
    let mut segments = segment::scan(base, None)?;
    segments.sort_by(|a, b| a.modified.cmp(&b.modified).then(a.path.cmp(&b.path)));
    let protected: HashSet<PathBuf> = newest_per_source(&segments)
        .into_iter()
        .map(Path::to_path_buf)
        .collect();

    let mut outcome = PruneOutcome::default();
    for seg in &segments {
        let current = usage()?;
        if current.used_fraction <= target_fraction {
            break;
        }
        if outcome.removed_count >= EMERGENCY_MAX_FILES {
            tracing::error!(
                "emergency prune limit reached ({} files), still at {:.1}% used",
                EMERGENCY_MAX_FILES,
                current.used_fraction * 100.0
            );
            break;
        }
        if protected.contains(&seg.path) || transcoding_companion(&seg.path).exists() {
            continue;
        }

        match std::fs::remove_file(&seg.path) {
            Ok(()) => {
                tracing::warn!(
                    "emergency removed {} ({})",
                    seg.path.display(),
                    format_bytes(seg.size)
                );
                outcome.removed_count += 1;
                outcome.freed_bytes += seg.size;
            }
            Err(e) => {
                tracing::error!("failed to remove {}: {}", seg.path.display(), e);
            }
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Create a segment file and force its mtime to `age` seconds ago
    fn make_segment(dir: &Path, name: &str, size: usize, age_secs: i64) {
        let path = dir.join(name);
        std::fs::write(&path, vec![0u8; size]).unwrap();
        set_mtime_ago(&path, age_secs);
    }

    fn set_mtime_ago(path: &Path, age_secs: i64) {
        use nix::sys::stat::utimes;
        use nix::sys::time::TimeVal;

        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let ts = TimeVal::new(now - age_secs, 0);
        utimes(path, &ts, &ts).unwrap();
    }

    fn setup_tree() -> tempfile::TempDir {
        let base = tempfile::tempdir().unwrap();
        for id in ["cam1", "cam2"] {
            std::fs::create_dir(base.path().join(id)).unwrap();
        }
        base
    }

    #[test]
    fn test_prune_by_age_removes_only_old() {
        let base = setup_tree();
        let cam1 = base.path().join("cam1");
        make_segment(&cam1, "cam1_20230101_000000.mp4", 10, 10 * 86400);
        make_segment(&cam1, "cam1_20230105_000000.mp4", 10, 5 * 86400);
        make_segment(&cam1, "cam1_20230109_000000.mp4", 10, 60);

        let outcome =
            prune_by_age(base.path(), Duration::from_secs(7 * 86400), false).unwrap();
        assert_eq!(outcome.removed_count, 1);
        assert!(!cam1.join("cam1_20230101_000000.mp4").exists());
        assert!(cam1.join("cam1_20230105_000000.mp4").exists());
    }

    #[test]
    fn test_prune_by_age_dry_run() {
        let base = setup_tree();
        let cam1 = base.path().join("cam1");
        make_segment(&cam1, "cam1_20230101_000000.mp4", 100, 10 * 86400);
        make_segment(&cam1, "cam1_20230109_000000.mp4", 10, 60);

        let outcome =
            prune_by_age(base.path(), Duration::from_secs(86400), true).unwrap();
        assert_eq!(outcome.removed_count, 1);
        assert_eq!(outcome.freed_bytes, 100);
        assert!(cam1.join("cam1_20230101_000000.mp4").exists());
    }

    #[test]
    fn test_prune_never_deletes_newest_per_source() {
        let base = setup_tree();
        let cam1 = base.path().join("cam1");
        // Only one file, and it is ancient: still protected
        make_segment(&cam1, "cam1_20200101_000000.mp4", 10, 1000 * 86400);

        let outcome = prune_by_age(base.path(), Duration::from_secs(86400), false).unwrap();
        assert_eq!(outcome.removed_count, 0);
        assert!(cam1.join("cam1_20200101_000000.mp4").exists());
    }

    #[test]
    fn test_prune_skips_transcoding_companions() {
        let base = setup_tree();
        let cam1 = base.path().join("cam1");
        make_segment(&cam1, "cam1_20230101_000000.mp4", 10, 10 * 86400);
        make_segment(&cam1, "cam1_20230102_000000.mp4", 10, 60);
        std::fs::write(cam1.join("cam1_20230101_000000.mp4.transcoding"), b"t").unwrap();

        let outcome = prune_by_age(base.path(), Duration::from_secs(86400), false).unwrap();
        assert_eq!(outcome.removed_count, 0);
        assert!(cam1.join("cam1_20230101_000000.mp4").exists());
    }

    #[test]
    fn test_emergency_prune_oldest_first() {
        let base = setup_tree();
        let cam1 = base.path().join("cam1");
        let cam2 = base.path().join("cam2");
        make_segment(&cam1, "cam1_20230101_000000.mp4", 10, 4000);
        make_segment(&cam1, "cam1_20230101_001000.mp4", 10, 3000);
        make_segment(&cam1, "cam1_20230101_002000.mp4", 10, 100);
        make_segment(&cam2, "cam2_20230101_000000.mp4", 10, 3500);
        make_segment(&cam2, "cam2_20230101_001000.mp4", 10, 100);

        // Fake volume: starts at 97% used, each deletion frees 5 points
        let deleted = AtomicU64::new(0);
        let outcome = emergency_prune_with(base.path(), 0.85, || {
            let n = deleted.fetch_add(1, Ordering::SeqCst);
            Ok(DiskUsage {
                total_bytes: 100,
                free_bytes: 3 + n * 5,
                used_fraction: (97 - n as i64 * 5) as f64 / 100.0,
            })
        })
        .unwrap();

        // 97 -> 92 -> 87 -> 82: three deletions, strictly oldest first
        assert_eq!(outcome.removed_count, 3);
        assert!(!cam1.join("cam1_20230101_000000.mp4").exists());
        assert!(!cam2.join("cam2_20230101_000000.mp4").exists());
        assert!(!cam1.join("cam1_20230101_001000.mp4").exists());
        // Newest per source survive
        assert!(cam1.join("cam1_20230101_002000.mp4").exists());
        assert!(cam2.join("cam2_20230101_001000.mp4").exists());
    }

    #[test]
    fn test_emergency_prune_nothing_deletable() {
        let base = setup_tree();
        let cam1 = base.path().join("cam1");
        make_segment(&cam1, "cam1_20230101_000000.mp4", 10, 4000);

        // Always over target, but the only file is the newest of its source
        let outcome = emergency_prune_with(base.path(), 0.85, || {
            Ok(DiskUsage {
                total_bytes: 100,
                free_bytes: 3,
                used_fraction: 0.97,
            })
        })
        .unwrap();

        assert_eq!(outcome.removed_count, 0);
        assert!(cam1.join("cam1_20230101_000000.mp4").exists());
    }

    #[test]
    fn test_emergency_prune_stops_at_target() {
        let base = setup_tree();
        let cam1 = base.path().join("cam1");
        make_segment(&cam1, "cam1_20230101_000000.mp4", 10, 4000);
        make_segment(&cam1, "cam1_20230101_001000.mp4", 10, 3000);
        make_segment(&cam1, "cam1_20230101_002000.mp4", 10, 100);

        // Already below target: nothing removed
        let outcome = emergency_prune_with(base.path(), 0.85, || {
            Ok(DiskUsage {
                total_bytes: 100,
                free_bytes: 50,
                used_fraction: 0.5,
            })
        })
        .unwrap();

        assert_eq!(outcome.removed_count, 0);
    }
}
