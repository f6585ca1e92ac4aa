//! Segment discovery and filename parsing.
//!
//! Capture children name their output `<id>_YYYYMMDD_HHMMSS.<ext>`; the
//! timestamp in the name is the only synchronization key between this
//! process and the external encoder.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::NaiveDateTime;

use crate::error::StorageError;

/// Container extensions we treat as segments
const SEGMENT_EXTENSIONS: [&str; 2] = ["mp4", "mkv"];

/// A finished (or in-progress) container file in a source directory
#[derive(Debug, Clone)]
pub struct Segment {
    pub source_id: String,
    pub path: PathBuf,
    /// Recording start time parsed from the filename
    pub started_at: NaiveDateTime,
    pub modified: SystemTime,
    pub size: u64,
}

/// Parse `<id>_YYYYMMDD_HHMMSS.<ext>` into (source id, start time).
///
/// Auxiliary files (`.original`, `.transcoded`, `.transcoding`) fail the
/// extension check and are rejected.
pub fn parse_segment_name(name: &str) -> Option<(String, NaiveDateTime)> {
    let (stem, ext) = name.rsplit_once('.')?;
    if !SEGMENT_EXTENSIONS.contains(&ext) {
        return None;
    }

    // Timestamp is the last two underscore-separated fields
    let (rest, time_part) = stem.rsplit_once('_')?;
    let (id, date_part) = rest.rsplit_once('_')?;
    if id.is_empty() || date_part.len() != 8 || time_part.len() != 6 {
        return None;
    }

    let started_at =
        NaiveDateTime::parse_from_str(&format!("{}_{}", date_part, time_part), "%Y%m%d_%H%M%S")
            .ok()?;
    Some((id.to_string(), started_at))
}

/// The `.transcoding` temp path a re-encode would stage next to `path`
pub fn transcoding_companion(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".transcoding");
    PathBuf::from(name)
}

/// List segments under the recordings base, optionally for one source.
///
/// Looks exactly one directory level deep (the per-source directories) and
/// ignores anything that does not match the segment filename grammar.
pub fn scan(base: &Path, source_id: Option<&str>) -> Result<Vec<Segment>, StorageError> {
    if !base.is_dir() {
        return Err(StorageError::NotFound(base.display().to_string()));
    }

    let mut segments = Vec::new();
    for entry in std::fs::read_dir(base)?.filter_map(|e| e.ok()) {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let dir_name = match dir.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        if let Some(wanted) = source_id {
            if dir_name != wanted {
                continue;
            }
        }
        segments.extend(scan_dir(&dir)?);
    }

    Ok(segments)
}

/// Segments directly inside one source directory
pub fn scan_dir(dir: &Path) -> Result<Vec<Segment>, StorageError> {
    let mut segments = Vec::new();
    for entry in std::fs::read_dir(dir)?.filter_map(|e| e.ok()) {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some((source_id, started_at)) = parse_segment_name(name) else {
            continue;
        };
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        segments.push(Segment {
            source_id,
            path,
            started_at,
            modified,
            size: metadata.len(),
        });
    }
    Ok(segments)
}

/// Paths of the newest segment per source, by modification time.
///
/// These are the files a live capture child may still be writing; pruning
/// must leave them alone.
pub fn newest_per_source(segments: &[Segment]) -> Vec<&Path> {
    use std::collections::HashMap;

    let mut newest: HashMap<&str, &Segment> = HashMap::new();
    for seg in segments {
        match newest.get(seg.source_id.as_str()) {
            Some(current) if current.modified >= seg.modified => {}
            _ => {
                newest.insert(&seg.source_id, seg);
            }
        }
    }
    newest.values().map(|s| s.path.as_path()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_segment_name() {
        let (id, ts) = parse_segment_name("cam1_20230101_153000.mp4").unwrap();
        assert_eq!(id, "cam1");
        assert_eq!(ts.year(), 2023);
        assert_eq!(ts.hour(), 15);
        assert_eq!(ts.minute(), 30);
    }

    #[test]
    fn test_parse_id_with_underscores() {
        let (id, _) = parse_segment_name("front_door_20230101_000000.mp4").unwrap();
        assert_eq!(id, "front_door");
    }

    #[test]
    fn test_rejects_auxiliaries() {
        assert!(parse_segment_name("cam1_20230101_000000.mp4.transcoding").is_none());
        assert!(parse_segment_name("cam1_20230101_000000.mp4.transcoded").is_none());
        assert!(parse_segment_name("cam1_20230101_000000.mp4.original").is_none());
    }

    #[test]
    fn test_rejects_wrong_shape() {
        assert!(parse_segment_name("cam1.mp4").is_none());
        assert!(parse_segment_name("cam1_2023_153000.mp4").is_none());
        assert!(parse_segment_name("cam1_20230101_153000.txt").is_none());
        assert!(parse_segment_name("_20230101_153000.mp4").is_none());
        assert!(parse_segment_name("cam1_20231399_999999.mp4").is_none());
    }

    #[test]
    fn test_scan_skips_nonmatching_files() {
        let base = tempfile::tempdir().unwrap();
        let cam = base.path().join("cam1");
        std::fs::create_dir(&cam).unwrap();
        std::fs::write(cam.join("cam1_20230101_000000.mp4"), b"x").unwrap();
        std::fs::write(cam.join("cam1_20230101_001000.mp4"), b"xy").unwrap();
        std::fs::write(cam.join("cam1_20230101_000000.mp4.transcoding"), b"t").unwrap();
        std::fs::write(cam.join("notes.txt"), b"n").unwrap();

        let segments = scan(base.path(), None).unwrap();
        assert_eq!(segments.len(), 2);
        assert!(segments.iter().all(|s| s.source_id == "cam1"));
    }

    #[test]
    fn test_scan_filters_by_source() {
        let base = tempfile::tempdir().unwrap();
        for id in ["cam1", "cam2"] {
            let dir = base.path().join(id);
            std::fs::create_dir(&dir).unwrap();
            std::fs::write(dir.join(format!("{}_20230101_000000.mp4", id)), b"x").unwrap();
        }

        let segments = scan(base.path(), Some("cam2")).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].source_id, "cam2");
    }

    #[test]
    fn test_transcoding_companion() {
        let p = Path::new("/r/cam1/cam1_20230101_000000.mp4");
        assert_eq!(
            transcoding_companion(p),
            PathBuf::from("/r/cam1/cam1_20230101_000000.mp4.transcoding")
        );
    }
}
