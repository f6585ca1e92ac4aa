use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Pixel format delivered by the capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputCodec {
    H264,
    Mjpeg,
    Raw,
}

impl InputCodec {
    /// Tag passed to the encoder's `-input_format` flag
    pub fn as_str(&self) -> &'static str {
        match self {
            InputCodec::H264 => "h264",
            InputCodec::Mjpeg => "mjpeg",
            InputCodec::Raw => "raw",
        }
    }
}

/// Capture resolution, configured as `"WxH"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once('x')
            .ok_or_else(|| format!("expected WxH, got {:?}", s))?;
        let width: u32 = w.parse().map_err(|_| format!("invalid width {:?}", w))?;
        let height: u32 = h.parse().map_err(|_| format!("invalid height {:?}", h))?;
        if width == 0 || height == 0 {
            return Err(format!("resolution must be positive, got {:?}", s));
        }
        Ok(Resolution { width, height })
    }
}

impl TryFrom<String> for Resolution {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Resolution> for String {
    fn from(r: Resolution) -> String {
        r.to_string()
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Configuration for a single capture source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Device node, e.g. /dev/video0
    pub device: String,
    /// Human-readable name
    pub name: String,
    #[serde(default = "default_resolution")]
    pub resolution: Resolution,
    #[serde(default = "default_framerate")]
    pub framerate: u32,
    #[serde(default = "default_input_codec")]
    pub input_codec: InputCodec,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_resolution() -> Resolution {
    Resolution {
        width: 1920,
        height: 1080,
    }
}

fn default_framerate() -> u32 {
    30
}

fn default_input_codec() -> InputCodec {
    InputCodec::H264
}

fn default_enabled() -> bool {
    true
}

impl SourceConfig {
    /// Per-source segment directory under the recordings base
    pub fn segment_dir(&self, base: &Path, id: &str) -> PathBuf {
        base.join(id)
    }
}

/// Source identifiers become directory names and filename stems
pub fn is_valid_source_id(id: &str) -> bool {
    if id.is_empty() || id.len() > 32 {
        return false;
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return false;
    }
    id.chars()
        .next()
        .map(|c| c.is_ascii_alphanumeric())
        .unwrap_or(false)
}
