//! Persisted transcoder statistics.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::TranscodeError;

/// Statistics file at the root of the recordings tree
pub const STATS_FILE: &str = ".transcoding_stats";

/// Cumulative counters, updated after every attempt
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TranscodingStats {
    pub files_transcoded: u64,
    pub files_failed: u64,
    pub space_saved_bytes: u64,
    pub total_original_bytes: u64,
    pub total_transcoded_bytes: u64,
    pub last_transcoded: Option<String>,
    pub last_error: Option<String>,
}

impl TranscodingStats {
    pub fn record_success(&mut self, original_size: u64, new_size: u64, at: chrono::DateTime<chrono::Utc>) {
        self.files_transcoded += 1;
        self.total_original_bytes += original_size;
        self.total_transcoded_bytes += new_size;
        self.space_saved_bytes += original_size.saturating_sub(new_size);
        self.last_transcoded = Some(at.to_rfc3339());
    }

    pub fn record_failure(&mut self, error: impl std::fmt::Display) {
        self.files_failed += 1;
        self.last_error = Some(error.to_string());
    }

    pub fn savings_percent(&self) -> f64 {
        if self.total_original_bytes == 0 {
            return 0.0;
        }
        self.space_saved_bytes as f64 / self.total_original_bytes as f64 * 100.0
    }

    fn path(base: &Path) -> PathBuf {
        base.join(STATS_FILE)
    }

    /// Load persisted stats, or start fresh when none exist
    pub fn load(base: &Path) -> Self {
        let path = Self::path(base);
        match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::error!("unreadable stats file {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Persist atomically: tmp file, fsync, rename
    pub fn save(&self, base: &Path) -> Result<(), TranscodeError> {
        let path = Self::path(base);
        let tmp = base.join(".transcoding_stats.tmp");
        let payload = serde_json::to_vec_pretty(self)
            .map_err(|e| TranscodeError::Marker(e.to_string()))?;
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&payload)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_roundtrip() {
        let base = tempfile::tempdir().unwrap();
        let mut stats = TranscodingStats::default();
        stats.record_success(1000, 400, Utc::now());
        stats.record_failure("duration mismatch");

        stats.save(base.path()).unwrap();
        let loaded = TranscodingStats::load(base.path());
        assert_eq!(loaded, stats);
        assert_eq!(loaded.files_transcoded, 1);
        assert_eq!(loaded.files_failed, 1);
        assert_eq!(loaded.space_saved_bytes, 600);
        assert!(loaded.last_transcoded.is_some());
        assert_eq!(loaded.last_error.as_deref(), Some("duration mismatch"));
    }

    #[test]
    fn test_load_missing_is_default() {
        let base = tempfile::tempdir().unwrap();
        assert_eq!(TranscodingStats::load(base.path()), TranscodingStats::default());
    }

    #[test]
    fn test_savings_percent() {
        let mut stats = TranscodingStats::default();
        assert_eq!(stats.savings_percent(), 0.0);
        stats.record_success(1000, 600, Utc::now());
        assert!((stats.savings_percent() - 40.0).abs() < 0.01);
    }
}
