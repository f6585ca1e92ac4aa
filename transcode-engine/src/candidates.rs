//! Candidate selection for re-encoding.
//!
//! A segment is eligible when it is old enough, not already replaced or in
//! progress, still in the capture codec, and not the newest file of its
//! source directory (the one a live child may be writing).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use storage_manager::segment::{newest_per_source, scan};

use crate::error::TranscodeError;
use crate::probe;
use crate::swap::{marker_path, transcoding_path};

/// Aggregate counters from one scan, logged for visibility
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanCounters {
    pub scanned: usize,
    pub too_new: usize,
    pub already_transcoded: usize,
    pub in_progress: usize,
    pub wrong_codec: usize,
    pub eligible: usize,
}

/// Codecs the probe may report for capture output we want to shrink
const INPUT_CODECS: [&str; 2] = ["h264", "avc"];

/// Scan for eligible segments, oldest first.
pub fn find_candidates(
    base: &Path,
    min_age: Duration,
) -> Result<(Vec<PathBuf>, ScanCounters), TranscodeError> {
    find_candidates_with(base, min_age, |path| probe::probe_codec(path))
}

/// Scan with an injectable codec probe
pub fn find_candidates_with(
    base: &Path,
    min_age: Duration,
    probe_codec: impl Fn(&Path) -> Option<String>,
) -> Result<(Vec<PathBuf>, ScanCounters), TranscodeError> {
    let segments = scan(base, None).map_err(|e| TranscodeError::Probe(e.to_string()))?;
    let protected: HashSet<PathBuf> = newest_per_source(&segments)
        .into_iter()
        .map(Path::to_path_buf)
        .collect();
    let cutoff = SystemTime::now()
        .checked_sub(min_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut counters = ScanCounters::default();
    let mut candidates: Vec<(SystemTime, PathBuf)> = Vec::new();

    for seg in &segments {
        counters.scanned += 1;

        if seg.modified > cutoff || protected.contains(&seg.path) {
            counters.too_new += 1;
            continue;
        }
        if marker_path(&seg.path).exists() {
            counters.already_transcoded += 1;
            continue;
        }
        if transcoding_path(&seg.path).exists() {
            counters.in_progress += 1;
            continue;
        }
        match probe_codec(&seg.path) {
            Some(codec) if INPUT_CODECS.contains(&codec.as_str()) => {}
            _ => {
                counters.wrong_codec += 1;
                continue;
            }
        }

        counters.eligible += 1;
        candidates.push((seg.modified, seg.path.clone()));
    }

    candidates.sort();
    tracing::info!(
        "scanned {} segments: {} eligible, {} too new, {} already transcoded, {} in progress, {} wrong codec",
        counters.scanned,
        counters.eligible,
        counters.too_new,
        counters.already_transcoded,
        counters.in_progress,
        counters.wrong_codec
    );

    Ok((candidates.into_iter().map(|(_, p)| p).collect(), counters))
}
