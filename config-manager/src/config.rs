use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::encoding::{EncodingConfig, OutputCodec};
use crate::error::ConfigError;
use crate::http::HttpConfig;
use crate::source::{is_valid_source_id, SourceConfig};
use crate::storage::StorageConfig;
use crate::transcoding::TranscoderConfig;

/// Minimum segment length the container muxer handles sanely
pub const MIN_SEGMENT_SECONDS: u64 = 10;

/// Complete station configuration, immutable after load
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Absolute base directory for all recordings
    pub recordings_base_directory: PathBuf,
    #[serde(default = "default_segment_duration")]
    pub segment_duration_seconds: u64,
    /// What the capture children write: stream copy or a capture-time
    /// re-encode
    #[serde(default)]
    pub output_codec: OutputCodec,
    /// Explicit encoder binary; when unset, a candidate list is probed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoder_binary: Option<String>,
    #[serde(default)]
    pub encoding: EncodingConfig,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

fn default_segment_duration() -> u64 {
    1800
}

impl Config {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a TOML file
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Per-source segment directory
    pub fn source_dir(&self, id: &str) -> PathBuf {
        self.recordings_base_directory.join(id)
    }

    /// Sources with `enabled = true`, in stable id order
    pub fn enabled_sources(&self) -> impl Iterator<Item = (&String, &SourceConfig)> {
        self.sources.iter().filter(|(_, s)| s.enabled)
    }

    /// Check every startup invariant; the first violation wins
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::invalid("sources", "no sources configured"));
        }
        if self.enabled_sources().next().is_none() {
            return Err(ConfigError::invalid(
                "sources",
                "at least one source must be enabled",
            ));
        }

        for (id, source) in &self.sources {
            let field = format!("sources.{}", id);
            if !is_valid_source_id(id) {
                return Err(ConfigError::invalid(
                    field,
                    "id must be 1-32 filename-safe characters (alphanumeric, dash, underscore)",
                ));
            }
            if source.device.is_empty() {
                return Err(ConfigError::invalid(format!("{}.device", field), "device path is empty"));
            }
            if source.framerate < 1 {
                return Err(ConfigError::invalid(
                    format!("{}.framerate", field),
                    "framerate must be at least 1",
                ));
            }
        }

        if self.segment_duration_seconds < MIN_SEGMENT_SECONDS {
            return Err(ConfigError::invalid(
                "segment_duration_seconds",
                format!("must be at least {} seconds", MIN_SEGMENT_SECONDS),
            ));
        }

        if !self.recordings_base_directory.is_absolute() {
            return Err(ConfigError::invalid(
                "recordings_base_directory",
                "must be an absolute path",
            ));
        }

        if self.encoding.quality > 51 {
            return Err(ConfigError::invalid(
                "encoding.quality",
                "quality must be in 0..=51",
            ));
        }

        self.validate_storage()?;
        self.validate_transcoder()?;
        Ok(())
    }

    fn validate_storage(&self) -> Result<(), ConfigError> {
        let s = &self.storage;
        if s.max_age_days < 1 {
            return Err(ConfigError::invalid(
                "storage.max_age_days",
                "must be at least 1",
            ));
        }
        for (field, value) in [
            ("storage.emergency_used_fraction", s.emergency_used_fraction),
            ("storage.emergency_target_fraction", s.emergency_target_fraction),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::invalid(field, "must be within 0..1"));
            }
        }
        if s.emergency_target_fraction >= s.emergency_used_fraction {
            return Err(ConfigError::invalid(
                "storage.emergency_target_fraction",
                "must be below emergency_used_fraction",
            ));
        }
        Ok(())
    }

    fn validate_transcoder(&self) -> Result<(), ConfigError> {
        let t = &self.transcoder;
        t.schedule_window()?;
        if t.quality > 51 {
            return Err(ConfigError::invalid(
                "transcoder.quality",
                "quality must be in 0..=51",
            ));
        }
        for (field, value) in [
            ("transcoder.max_cpu_percent", t.max_cpu_percent),
            ("transcoder.max_io_wait", t.max_io_wait),
            ("transcoder.min_savings_percent", t.min_savings_percent),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::invalid(field, "must be within 0..100"));
            }
        }
        Ok(())
    }

    /// Verify the recordings base exists and is writable.
    ///
    /// Creates the top-level directory if missing, never deeper.
    pub fn check_recordings_dir(&self) -> Result<(), ConfigError> {
        let base = &self.recordings_base_directory;
        if !base.exists() {
            std::fs::create_dir(base).map_err(|e| {
                ConfigError::invalid(
                    "recordings_base_directory",
                    format!("cannot create {}: {}", base.display(), e),
                )
            })?;
        }
        let probe = base.join(".write_test");
        std::fs::write(&probe, b"")
            .and_then(|_| std::fs::remove_file(&probe))
            .map_err(|e| {
                ConfigError::invalid(
                    "recordings_base_directory",
                    format!("{} is not writable: {}", base.display(), e),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::OutputCodec;
    use crate::source::InputCodec;

    const SAMPLE: &str = r#"
recordings_base_directory = "/storage/recordings"
segment_duration_seconds = 30
output_codec = "copy"

[encoding]
preset = "fast"

[sources.cam1]
device = "/dev/video0"
name = "Front door"
resolution = "2560x1440"
framerate = 60
input_codec = "h264"
enabled = true

[sources.cam2]
device = "/dev/video2"
name = "Garage"
enabled = false

[storage]
cleanup_enabled = true
max_age_days = 30

[transcoder]
enabled = false
min_age_days = 7
schedule_start = "22:00"
schedule_end = "06:00"

[http]
port = 8080
"#;

    fn sample() -> Config {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();
        config
    }

    #[test]
    fn test_parse_sample() {
        let config = sample();
        assert_eq!(config.sources.len(), 2);
        let cam1 = &config.sources["cam1"];
        assert_eq!(cam1.resolution.width, 2560);
        assert_eq!(cam1.framerate, 60);
        assert_eq!(cam1.input_codec, InputCodec::H264);
        assert_eq!(config.output_codec, OutputCodec::Copy);
        assert_eq!(config.enabled_sources().count(), 1);
        assert_eq!(
            config.source_dir("cam1"),
            PathBuf::from("/storage/recordings/cam1")
        );
    }

    #[test]
    fn test_roundtrip_preserves_snapshot() {
        let config = sample();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let reloaded: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(
            format!("{:?}", config),
            format!("{:?}", reloaded)
        );
    }

    #[test]
    fn test_rejects_no_enabled_sources() {
        let mut config = sample();
        for source in config.sources.values_mut() {
            source.enabled = false;
        }
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_rejects_short_segments() {
        let mut config = sample();
        config.segment_duration_seconds = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_relative_base() {
        let mut config = sample();
        config.recordings_base_directory = PathBuf::from("recordings");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_quality() {
        let mut config = sample();
        config.transcoder.quality = 52;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_emergency_fractions() {
        let mut config = sample();
        config.storage.emergency_target_fraction = 0.96;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_framerate() {
        let mut config = sample();
        config.sources.get_mut("cam1").unwrap().framerate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_error_names_field() {
        let mut config = sample();
        config.segment_duration_seconds = 1;
        match config.validate().unwrap_err() {
            ConfigError::Invalid { field, .. } => {
                assert_eq!(field, "segment_duration_seconds")
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_writable_check() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sample();
        config.recordings_base_directory = dir.path().join("recordings");
        config.check_recordings_dir().unwrap();
        assert!(config.recordings_base_directory.exists());
    }
}
