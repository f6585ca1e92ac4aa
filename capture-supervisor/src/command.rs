//! Encoder argument vector construction.
//!
//! Three argv shapes exist: stream copy, transcode from a compressed input
//! (h264/mjpeg), and transcode from a raw input (no `-input_format`). The
//! shape is picked from the source's input codec and the global output
//! codec selector; everything else is substitution.

use std::path::Path;
use std::process::Stdio;

use config_manager::{Config, InputCodec, SourceConfig};

use crate::error::ControlError;

/// Timestamp pattern the encoder expands per segment
pub const SEGMENT_STRFTIME: &str = "%Y%m%d_%H%M%S";

/// A fully-substituted child invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl EncoderCommand {
    /// Build the argv for one source
    pub fn build(program: &str, config: &Config, id: &str, source: &SourceConfig) -> Self {
        let mut args: Vec<String> = Vec::new();
        let push = |args: &mut Vec<String>, items: &[&str]| {
            args.extend(items.iter().map(|s| s.to_string()));
        };

        // Input
        push(&mut args, &["-f", "v4l2"]);
        if source.input_codec != InputCodec::Raw {
            push(&mut args, &["-input_format", source.input_codec.as_str()]);
        }
        push(
            &mut args,
            &[
                "-video_size",
                &source.resolution.to_string(),
                "-framerate",
                &source.framerate.to_string(),
                "-i",
                &source.device,
            ],
        );

        // Encoding
        match config.output_codec.encoder_name() {
            None => push(&mut args, &["-c:v", "copy"]),
            Some(target) => {
                let enc = &config.encoding;
                push(
                    &mut args,
                    &[
                        "-c:v",
                        target,
                        "-preset",
                        &enc.preset,
                        "-global_quality",
                        &enc.quality.to_string(),
                        "-b:v",
                        &format!("{}k", enc.target_bitrate),
                        "-maxrate",
                        &format!("{}k", enc.max_bitrate),
                        "-g",
                        &enc.gop_size.to_string(),
                        "-refs",
                        &enc.ref_frames.to_string(),
                        "-bf",
                        "3",
                    ],
                );
            }
        }

        // Segmented output
        push(
            &mut args,
            &[
                "-f",
                "segment",
                "-segment_time",
                &config.segment_duration_seconds.to_string(),
                "-segment_format",
                "mp4",
                "-reset_timestamps",
                "1",
                "-strftime",
                "1",
            ],
        );
        let pattern = config
            .source_dir(id)
            .join(format!("{}_{}.mp4", id, SEGMENT_STRFTIME));
        args.push(pattern.to_string_lossy().into_owned());

        Self {
            program: program.to_string(),
            args,
        }
    }

    /// One-line rendering for logs
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Candidate encoder binaries, probed in order
const ENCODER_CANDIDATES: [&str; 2] = ["/usr/lib/jellyfin-ffmpeg/ffmpeg", "ffmpeg"];

/// Locate a working encoder binary.
///
/// A config override wins; otherwise the candidate list is probed with
/// `-version`.
pub fn find_encoder_binary(config: &Config) -> Result<String, ControlError> {
    let candidates: Vec<&str> = match &config.encoder_binary {
        Some(explicit) => vec![explicit.as_str()],
        None => ENCODER_CANDIDATES.to_vec(),
    };

    for candidate in candidates {
        let works = std::process::Command::new(candidate)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        if works {
            tracing::info!("using encoder binary: {}", candidate);
            return Ok(candidate.to_string());
        }
    }

    Err(ControlError::LaunchFailed {
        reason: "no working encoder binary found".to_string(),
    })
}

/// Ensure the per-source output directory exists before launch
pub fn ensure_output_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_manager::OutputCodec;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn config_with(codec: OutputCodec, input: InputCodec) -> (Config, SourceConfig) {
        let source = SourceConfig {
            device: "/dev/video0".to_string(),
            name: "Front door".to_string(),
            resolution: "1920x1080".parse().unwrap(),
            framerate: 30,
            input_codec: input,
            enabled: true,
        };
        let mut sources = BTreeMap::new();
        sources.insert("cam1".to_string(), source.clone());
        let config = Config {
            recordings_base_directory: PathBuf::from("/storage/recordings"),
            segment_duration_seconds: 30,
            output_codec: codec,
            encoder_binary: None,
            encoding: Default::default(),
            sources,
            storage: Default::default(),
            transcoder: Default::default(),
            http: Default::default(),
        };
        (config, source)
    }

    fn args_string(cmd: &EncoderCommand) -> String {
        cmd.args.join(" ")
    }

    #[test]
    fn test_stream_copy_template() {
        let (config, source) = config_with(OutputCodec::Copy, InputCodec::H264);
        let cmd = EncoderCommand::build("ffmpeg", &config, "cam1", &source);
        let args = args_string(&cmd);

        assert!(args.starts_with(
            "-f v4l2 -input_format h264 -video_size 1920x1080 -framerate 30 -i /dev/video0 -c:v copy"
        ));
        assert!(args.contains("-f segment -segment_time 30 -segment_format mp4"));
        assert!(args.contains("-reset_timestamps 1 -strftime 1"));
        assert!(args.ends_with("/storage/recordings/cam1/cam1_%Y%m%d_%H%M%S.mp4"));
    }

    #[test]
    fn test_transcode_template() {
        let (config, source) = config_with(OutputCodec::H265Target, InputCodec::Mjpeg);
        let cmd = EncoderCommand::build("ffmpeg", &config, "cam1", &source);
        let args = args_string(&cmd);

        assert!(args.contains("-input_format mjpeg"));
        assert!(args.contains("-c:v hevc_qsv -preset fast -global_quality 23"));
        assert!(args.contains("-b:v 8000k -maxrate 12000k -g 60 -refs 3 -bf 3"));
        assert!(!args.contains("-c:v copy"));
    }

    #[test]
    fn test_raw_input_drops_input_format() {
        let (config, source) = config_with(OutputCodec::H264Target, InputCodec::Raw);
        let cmd = EncoderCommand::build("ffmpeg", &config, "cam1", &source);
        let args = args_string(&cmd);

        assert!(!args.contains("-input_format"));
        assert!(args.contains("-c:v h264_qsv"));
    }
}
