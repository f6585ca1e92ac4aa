use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Background transcoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Only segments at least this old are candidates
    #[serde(default = "default_min_age_days")]
    pub min_age_days: u32,
    #[serde(default = "default_schedule_start")]
    pub schedule_start: String,
    #[serde(default = "default_schedule_end")]
    pub schedule_end: String,
    #[serde(default = "default_max_cpu_percent")]
    pub max_cpu_percent: f64,
    #[serde(default = "default_max_io_wait")]
    pub max_io_wait: f64,
    /// Encoder tag for `-c:v` on the re-encode child
    #[serde(default = "default_output_codec")]
    pub output_codec: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    /// Quality, 0..=51
    #[serde(default = "default_quality")]
    pub quality: u32,
    /// Safety window before a replaced original is deleted
    #[serde(default = "default_keep_original_days")]
    pub keep_original_days: u32,
    #[serde(default = "default_min_free_gb")]
    pub min_free_gb: u64,
    /// Reject re-encodes that shrink the file by less than this
    #[serde(default = "default_min_savings_percent")]
    pub min_savings_percent: f64,
}

fn default_min_age_days() -> u32 {
    7
}

fn default_schedule_start() -> String {
    "02:00".to_string()
}

fn default_schedule_end() -> String {
    "06:00".to_string()
}

fn default_max_cpu_percent() -> f64 {
    15.0
}

fn default_max_io_wait() -> f64 {
    5.0
}

fn default_output_codec() -> String {
    "libx265".to_string()
}

fn default_preset() -> String {
    "medium".to_string()
}

fn default_quality() -> u32 {
    23
}

fn default_keep_original_days() -> u32 {
    1
}

fn default_min_free_gb() -> u64 {
    100
}

fn default_min_savings_percent() -> f64 {
    10.0
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_age_days: default_min_age_days(),
            schedule_start: default_schedule_start(),
            schedule_end: default_schedule_end(),
            max_cpu_percent: default_max_cpu_percent(),
            max_io_wait: default_max_io_wait(),
            output_codec: default_output_codec(),
            preset: default_preset(),
            quality: default_quality(),
            keep_original_days: default_keep_original_days(),
            min_free_gb: default_min_free_gb(),
            min_savings_percent: default_min_savings_percent(),
        }
    }
}

impl TranscoderConfig {
    /// Parse the configured schedule into a window
    pub fn schedule_window(&self) -> Result<ScheduleWindow, ConfigError> {
        ScheduleWindow::parse(&self.schedule_start, &self.schedule_end)
    }
}

/// Daily time window in which the transcoder is allowed to run.
///
/// Half-open: the start minute is in the window, the end minute is not.
/// Wrap-around windows (e.g. 22:00-06:00) are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl ScheduleWindow {
    pub fn parse(start: &str, end: &str) -> Result<Self, ConfigError> {
        let start = NaiveTime::parse_from_str(start, "%H:%M").map_err(|_| {
            ConfigError::invalid("transcoder.schedule_start", format!("expected HH:MM, got {:?}", start))
        })?;
        let end = NaiveTime::parse_from_str(end, "%H:%M").map_err(|_| {
            ConfigError::invalid("transcoder.schedule_end", format!("expected HH:MM, got {:?}", end))
        })?;
        if start == end {
            return Err(ConfigError::invalid(
                "transcoder.schedule_end",
                "schedule start and end must differ",
            ));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start < self.end {
            self.start <= t && t < self.end
        } else {
            // Overnight window
            t >= self.start || t < self.end
        }
    }
}
