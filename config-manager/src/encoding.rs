use serde::{Deserialize, Serialize};

/// What the capture children write to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OutputCodec {
    /// Pass the device stream through untouched
    #[default]
    Copy,
    /// Re-encode to H.264 at capture time
    H264Target,
    /// Re-encode to H.265 at capture time
    H265Target,
}

impl OutputCodec {
    /// Encoder name for `-c:v`, or None for stream copy
    pub fn encoder_name(&self) -> Option<&'static str> {
        match self {
            OutputCodec::Copy => None,
            OutputCodec::H264Target => Some("h264_qsv"),
            OutputCodec::H265Target => Some("hevc_qsv"),
        }
    }
}

/// Capture-side encoding parameters, used by the transcode templates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodingConfig {
    #[serde(default = "default_preset")]
    pub preset: String,
    /// Codec quality, 0..=51
    #[serde(default = "default_quality")]
    pub quality: u32,
    /// Target bitrate in kbps
    #[serde(default = "default_target_bitrate")]
    pub target_bitrate: u32,
    /// Bitrate ceiling in kbps
    #[serde(default = "default_max_bitrate")]
    pub max_bitrate: u32,
    #[serde(default = "default_gop_size")]
    pub gop_size: u32,
    #[serde(default = "default_ref_frames")]
    pub ref_frames: u32,
}

fn default_preset() -> String {
    "fast".to_string()
}

fn default_quality() -> u32 {
    23
}

fn default_target_bitrate() -> u32 {
    8000
}

fn default_max_bitrate() -> u32 {
    12000
}

fn default_gop_size() -> u32 {
    60
}

fn default_ref_frames() -> u32 {
    3
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            preset: default_preset(),
            quality: default_quality(),
            target_bitrate: default_target_bitrate(),
            max_bitrate: default_max_bitrate(),
            gop_size: default_gop_size(),
            ref_frames: default_ref_frames(),
        }
    }
}
