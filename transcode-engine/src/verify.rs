//! Replacement verification.
//!
//! A re-encoded temp only replaces the original when every check passes;
//! any failure deletes the temp and leaves the original untouched.

use thiserror::Error;

use crate::probe::VideoInfo;

/// Temps below this size are garbage regardless of metadata
pub const MIN_TEMP_BYTES: u64 = 1024;
/// Allowed absolute duration drift between original and replacement
pub const MAX_DURATION_DRIFT_SECS: f64 = 1.0;
/// Allowed frame rate drift
pub const MAX_FPS_DRIFT: f64 = 1.0;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum VerificationFailure {
    #[error("output missing or smaller than {MIN_TEMP_BYTES} bytes")]
    TooSmall,

    #[error("duration mismatch: {original:.2}s vs {transcoded:.2}s")]
    DurationMismatch { original: f64, transcoded: f64 },

    #[error("resolution mismatch: {original} vs {transcoded}")]
    ResolutionMismatch {
        original: String,
        transcoded: String,
    },

    #[error("frame rate mismatch: {original:.2} vs {transcoded:.2}")]
    FrameRateMismatch { original: f64, transcoded: f64 },

    #[error("integrity check failed: {detail}")]
    IntegrityFailed { detail: String },

    #[error("insufficient savings: {actual:.1}% < {required:.1}%")]
    InsufficientSavings { actual: f64, required: f64 },
}

/// Size floor check
pub fn check_size_floor(temp_size: u64) -> Result<(), VerificationFailure> {
    if temp_size < MIN_TEMP_BYTES {
        return Err(VerificationFailure::TooSmall);
    }
    Ok(())
}

/// Compare probe metadata of the original against the re-encoded temp
pub fn check_metadata(
    original: &VideoInfo,
    transcoded: &VideoInfo,
) -> Result<(), VerificationFailure> {
    let drift = (original.duration_secs - transcoded.duration_secs).abs();
    if drift > MAX_DURATION_DRIFT_SECS {
        return Err(VerificationFailure::DurationMismatch {
            original: original.duration_secs,
            transcoded: transcoded.duration_secs,
        });
    }

    if original.width != transcoded.width || original.height != transcoded.height {
        return Err(VerificationFailure::ResolutionMismatch {
            original: format!("{}x{}", original.width, original.height),
            transcoded: format!("{}x{}", transcoded.width, transcoded.height),
        });
    }

    if (original.fps - transcoded.fps).abs() > MAX_FPS_DRIFT {
        return Err(VerificationFailure::FrameRateMismatch {
            original: original.fps,
            transcoded: transcoded.fps,
        });
    }

    Ok(())
}

/// Require the replacement to shrink the file by at least `min_savings_percent`
pub fn check_savings(
    original_size: u64,
    transcoded_size: u64,
    min_savings_percent: f64,
) -> Result<(), VerificationFailure> {
    if original_size == 0 {
        return Err(VerificationFailure::TooSmall);
    }
    let actual =
        (original_size.saturating_sub(transcoded_size)) as f64 / original_size as f64 * 100.0;
    if transcoded_size >= original_size || actual < min_savings_percent {
        return Err(VerificationFailure::InsufficientSavings {
            actual,
            required: min_savings_percent,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(duration: f64, width: u32, height: u32, fps: f64) -> VideoInfo {
        VideoInfo {
            codec: "h264".to_string(),
            width,
            height,
            duration_secs: duration,
            fps,
        }
    }

    #[test]
    fn test_metadata_accepts_close_match() {
        let original = info(30.0, 1920, 1080, 30.0);
        let transcoded = info(30.5, 1920, 1080, 29.97);
        assert!(check_metadata(&original, &transcoded).is_ok());
    }

    #[test]
    fn test_metadata_rejects_duration_drift() {
        let original = info(30.0, 1920, 1080, 30.0);
        let transcoded = info(25.0, 1920, 1080, 30.0);
        assert!(matches!(
            check_metadata(&original, &transcoded),
            Err(VerificationFailure::DurationMismatch { .. })
        ));
    }

    #[test]
    fn test_metadata_rejects_resolution_change() {
        let original = info(30.0, 1920, 1080, 30.0);
        let transcoded = info(30.0, 1280, 720, 30.0);
        assert!(matches!(
            check_metadata(&original, &transcoded),
            Err(VerificationFailure::ResolutionMismatch { .. })
        ));
    }

    #[test]
    fn test_metadata_rejects_fps_drift() {
        let original = info(30.0, 1920, 1080, 30.0);
        let transcoded = info(30.0, 1920, 1080, 24.0);
        assert!(matches!(
            check_metadata(&original, &transcoded),
            Err(VerificationFailure::FrameRateMismatch { .. })
        ));
    }

    #[test]
    fn test_savings_threshold() {
        // 40% smaller passes a 10% requirement
        assert!(check_savings(1000, 600, 10.0).is_ok());
        // 5% smaller fails it
        assert!(matches!(
            check_savings(1000, 950, 10.0),
            Err(VerificationFailure::InsufficientSavings { .. })
        ));
        // Growth always fails
        assert!(check_savings(1000, 1200, 0.0).is_err());
    }

    #[test]
    fn test_size_floor() {
        assert!(check_size_floor(MIN_TEMP_BYTES).is_ok());
        assert!(check_size_floor(100).is_err());
    }
}
