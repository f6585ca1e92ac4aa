use std::collections::BTreeMap;
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::error::StorageError;
use crate::segment;

/// Per-source recording totals
#[derive(Debug, Clone, Serialize, Default)]
pub struct SourceStats {
    pub file_count: usize,
    pub total_bytes: u64,
    pub newest_file: Option<String>,
    pub newest_time: Option<String>,
    pub oldest_file: Option<String>,
    pub oldest_time: Option<String>,
}

/// Totals for the whole recordings tree
#[derive(Debug, Clone, Serialize, Default)]
pub struct RecordingStats {
    pub total_files: usize,
    pub total_bytes: u64,
    pub sources: BTreeMap<String, SourceStats>,
}

fn iso(t: SystemTime) -> String {
    DateTime::<Local>::from(t).to_rfc3339()
}

/// Walk the tree once and aggregate per-source file counts and sizes
pub fn recording_stats(base: &Path) -> Result<RecordingStats, StorageError> {
    let segments = segment::scan(base, None)?;
    let mut stats = RecordingStats::default();
    let mut extremes: BTreeMap<String, (SystemTime, SystemTime)> = BTreeMap::new();

    for seg in &segments {
        let name = seg
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let entry = stats.sources.entry(seg.source_id.clone()).or_default();
        entry.file_count += 1;
        entry.total_bytes += seg.size;
        stats.total_files += 1;
        stats.total_bytes += seg.size;

        let (newest, oldest) = extremes
            .entry(seg.source_id.clone())
            .or_insert((seg.modified, seg.modified));
        if seg.modified >= *newest {
            *newest = seg.modified;
            entry.newest_file = Some(name.clone());
            entry.newest_time = Some(iso(seg.modified));
        }
        if seg.modified <= *oldest {
            *oldest = seg.modified;
            entry.oldest_file = Some(name);
            entry.oldest_time = Some(iso(seg.modified));
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_stats() {
        let base = tempfile::tempdir().unwrap();
        let cam1 = base.path().join("cam1");
        let cam2 = base.path().join("cam2");
        std::fs::create_dir(&cam1).unwrap();
        std::fs::create_dir(&cam2).unwrap();
        std::fs::write(cam1.join("cam1_20230101_000000.mp4"), vec![0u8; 100]).unwrap();
        std::fs::write(cam1.join("cam1_20230101_001000.mp4"), vec![0u8; 50]).unwrap();
        std::fs::write(cam2.join("cam2_20230101_000000.mp4"), vec![0u8; 25]).unwrap();

        let stats = recording_stats(base.path()).unwrap();
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.total_bytes, 175);
        assert_eq!(stats.sources["cam1"].file_count, 2);
        assert_eq!(stats.sources["cam1"].total_bytes, 150);
        assert_eq!(stats.sources["cam2"].file_count, 1);
    }
}
