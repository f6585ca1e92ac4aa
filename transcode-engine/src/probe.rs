//! Probe utility wrapper.
//!
//! Shells out to ffprobe for stream metadata and to ffmpeg's null muxer for
//! an integrity pass. Both are short-lived synchronous invocations.

use std::path::Path;
use std::process::Command;

use serde::Deserialize;

use crate::error::TranscodeError;

const PROBE_BIN: &str = "ffprobe";
const DECODER_BIN: &str = "ffmpeg";

/// Video track metadata as reported by the probe
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
    pub fps: f64,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    r_frame_rate: Option<String>,
}

/// Parse a frame rate fraction like "30000/1001" or "25/1"
pub fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse().ok()
}

/// Probe the first video stream of a file
pub fn probe(path: &Path) -> Result<VideoInfo, TranscodeError> {
    let output = Command::new(PROBE_BIN)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=codec_name,width,height,duration,r_frame_rate",
            "-of",
            "json",
        ])
        .arg(path)
        .output()
        .map_err(|e| TranscodeError::Probe(format!("{}: {}", PROBE_BIN, e)))?;

    if !output.status.success() {
        return Err(TranscodeError::Probe(format!(
            "{}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let parsed: ProbeOutput = serde_json::from_slice(&output.stdout)
        .map_err(|e| TranscodeError::Probe(format!("bad probe output: {}", e)))?;
    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| TranscodeError::Probe(format!("{}: no video stream", path.display())))?;

    Ok(VideoInfo {
        codec: stream.codec_name.unwrap_or_default().to_lowercase(),
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
        duration_secs: stream
            .duration
            .as_deref()
            .and_then(|d| d.parse().ok())
            .unwrap_or(0.0),
        fps: stream
            .r_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .unwrap_or(0.0),
    })
}

/// Codec of the first video stream, None when the probe fails
pub fn probe_codec(path: &Path) -> Option<String> {
    probe(path).ok().map(|info| info.codec)
}

/// Decode the whole file discarding output; any stream error fails
pub fn verify_integrity(path: &Path) -> Result<(), TranscodeError> {
    let output = Command::new(DECODER_BIN)
        .args(["-v", "error", "-i"])
        .arg(path)
        .args(["-f", "null", "-"])
        .output()
        .map_err(|e| TranscodeError::Probe(format!("{}: {}", DECODER_BIN, e)))?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() || !stderr.trim().is_empty() {
        return Err(TranscodeError::Verification(
            crate::verify::VerificationFailure::IntegrityFailed {
                detail: stderr.trim().lines().next().unwrap_or("decode error").to_string(),
            },
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("25/1"), Some(25.0));
        assert_eq!(parse_frame_rate("30"), Some(30.0));
        let ntsc = parse_frame_rate("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("25/0"), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }

    #[test]
    fn test_probe_output_parsing() {
        let raw = r#"{
            "streams": [{
                "codec_name": "H264",
                "width": 1920,
                "height": 1080,
                "duration": "30.033000",
                "r_frame_rate": "30/1"
            }]
        }"#;
        let parsed: ProbeOutput = serde_json::from_str(raw).unwrap();
        let stream = &parsed.streams[0];
        assert_eq!(stream.codec_name.as_deref(), Some("H264"));
        assert_eq!(stream.width, Some(1920));
        assert_eq!(stream.duration.as_deref(), Some("30.033000"));
    }

    #[test]
    fn test_probe_missing_file_errors() {
        // Errors regardless of whether ffprobe is installed
        let result = probe(Path::new("/nonexistent/clip.mp4"));
        assert!(result.is_err());
    }
}
