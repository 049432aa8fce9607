//! FFmpeg command builder.

use std::path::{Path, PathBuf};

use vodclip_models::{ClipPlan, CodecProfile, SnappedWindow};

use crate::error::{MediaError, MediaResult};

/// Fragmented MP4 flags so a consumer can play bytes as they arrive.
pub const FRAGMENTED_MOVFLAGS: &str = "frag_keyframe+empty_moov+default_base_moof";
/// Index-up-front MP4 flags for complete files.
pub const FASTSTART_MOVFLAGS: &str = "+faststart";

// Errors only; warnings would crowd the diagnostic tail.
const LOG_LEVEL: &str = "error";

/// Where the tool writes its output.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputTarget {
    /// stdout (`pipe:1`)
    Pipe,
    /// A file on local disk
    File(PathBuf),
}

impl OutputTarget {
    fn as_arg(&self) -> String {
        match self {
            OutputTarget::Pipe => "pipe:1".to_string(),
            OutputTarget::File(path) => path.to_string_lossy().to_string(),
        }
    }
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input URL or path
    input: String,
    /// Output target
    output: OutputTarget,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl Into<String>, output: OutputTarget) -> Self {
        Self {
            input: input.into(),
            output,
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
        }
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add multiple input arguments.
    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set seek position (before input, keyframe-aligned).
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    /// Set seek position (after input, frame-accurate).
    pub fn accurate_seek(self, seconds: f64) -> Self {
        self.output_arg("-ss").output_arg(format!("{:.3}", seconds))
    }

    /// Set output duration.
    pub fn duration(self, seconds: f64) -> Self {
        self.output_arg("-t").output_arg(format!("{:.3}", seconds))
    }

    /// Copy all streams without re-encoding.
    pub fn codec_copy(self) -> Self {
        self.output_arg("-c").output_arg("copy")
    }

    /// Set audio bitstream filter.
    pub fn audio_bitstream_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-bsf:a").output_arg(filter)
    }

    /// Set output container format.
    pub fn format(self, format: impl Into<String>) -> Self {
        self.output_arg("-f").output_arg(format)
    }

    /// Set MP4 mux flags.
    pub fn movflags(self, flags: impl Into<String>) -> Self {
        self.output_arg("-movflags").output_arg(flags)
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn output(&self) -> &OutputTarget {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        // Overwrite flag
        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-hide_banner".to_string());
        args.push("-nostdin".to_string());

        args.push("-v".to_string());
        args.push(LOG_LEVEL.to_string());

        // Machine-readable progress on stderr, no interactive stats line
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());
        args.push("-nostats".to_string());

        // Input args
        args.extend(self.input_args.clone());

        // Input
        args.push("-i".to_string());
        args.push(self.input.clone());

        // Output args
        args.extend(self.output_args.clone());

        // Output
        args.push(self.output.as_arg());

        args
    }
}

/// Build the extraction command for one clip.
///
/// Remux seeks before the input and copies streams. Transcode seeks after
/// the input for frame accuracy and re-encodes to the plan's settings.
pub fn build_clip_command(
    source_url: &str,
    window: &SnappedWindow,
    plan: &ClipPlan,
    output: OutputTarget,
) -> FfmpegCommand {
    let mut cmd = FfmpegCommand::new(source_url, output.clone())
        .input_args(plan.network.to_ffmpeg_args());

    cmd = match plan.codec_profile {
        CodecProfile::Remux => cmd
            .seek(window.start)
            .duration(window.duration)
            .codec_copy()
            .audio_bitstream_filter("aac_adtstoasc"),
        CodecProfile::Transcode => cmd
            .accurate_seek(window.start)
            .duration(window.duration)
            .output_args(plan.transcode.to_ffmpeg_args()),
    };

    match output {
        OutputTarget::Pipe => cmd.movflags(FRAGMENTED_MOVFLAGS).format("mp4"),
        OutputTarget::File(_) => cmd.movflags(FASTSTART_MOVFLAGS).format("mp4"),
    }
}

/// Resolve the FFmpeg binary: an explicit path wins, otherwise search PATH.
pub fn resolve_ffmpeg(configured: Option<&Path>) -> MediaResult<PathBuf> {
    match configured {
        Some(path) if path.components().count() > 1 => Ok(path.to_path_buf()),
        Some(name) => which::which(name).map_err(|_| MediaError::FfmpegNotFound),
        None => which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound),
    }
}
