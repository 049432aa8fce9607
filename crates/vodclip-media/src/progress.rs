//! FFmpeg progress parsing.
//!
//! stderr arrives in arbitrary chunks. [`LineBuffer`] reassembles lines
//! split across reads and [`ProgressParser`] sorts each line into either a
//! `-progress` key/value update or a diagnostic.

use serde::{Deserialize, Serialize};

/// Keys FFmpeg emits in `-progress` blocks.
const PROGRESS_KEYS: &[&str] = &[
    "frame",
    "fps",
    "bitrate",
    "total_size",
    "out_time_us",
    "out_time_ms",
    "out_time",
    "dup_frames",
    "drop_frames",
    "speed",
    "progress",
];

/// Progress information from FFmpeg.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Processed media time, never negative.
    pub fn processed_ms(&self) -> u64 {
        self.out_time_ms.max(0) as u64
    }
}

/// Reassembles newline-terminated lines from raw chunks.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed.
    ///
    /// Both `\n` and `\r` terminate a line; empty lines are dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                self.flush_into(&mut lines);
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Return the unterminated tail, if any.
    pub fn finish(&mut self) -> Option<String> {
        let mut lines = Vec::new();
        self.flush_into(&mut lines);
        lines.pop()
    }

    fn flush_into(&mut self, lines: &mut Vec<String>) {
        if self.pending.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        lines.push(line);
    }
}

/// One classified stderr line.
#[derive(Debug, Clone, PartialEq)]
pub enum StderrLine {
    /// A `progress=` line closed a block
    Progress(FfmpegProgress),
    /// A key/value update inside a block
    ProgressField,
    /// Anything else FFmpeg printed
    Diagnostic(String),
}

/// Stateful stderr classifier.
#[derive(Debug, Default)]
pub struct ProgressParser {
    lines: LineBuffer,
    current: FfmpegProgress,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw stderr chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StderrLine> {
        self.lines
            .push(chunk)
            .into_iter()
            .map(|line| classify_line(&line, &mut self.current))
            .collect()
    }

    /// Flush whatever is left once stderr closes.
    pub fn finish(&mut self) -> Option<StderrLine> {
        self.lines
            .finish()
            .map(|line| classify_line(&line, &mut self.current))
    }
}

/// Parse a progress line from FFmpeg's `-progress` output.
///
/// Returns the accumulated progress when a block completes.
pub fn parse_progress_line(line: &str, current: &mut FfmpegProgress) -> Option<FfmpegProgress> {
    let line = line.trim();

    if let Some((key, value)) = line.split_once('=') {
        match key {
            // Both keys carry microseconds despite the name.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<i64>() {
                    current.out_time_ms = us / 1000;
                }
            }
            "speed" => {
                // Format: "1.5x" or "N/A"
                if let Some(speed) = value
                    .trim()
                    .strip_suffix('x')
                    .and_then(|s| s.trim().parse().ok())
                {
                    current.speed = speed;
                }
            }
            "progress" => {
                if value == "end" {
                    current.is_complete = true;
                }
                return Some(current.clone());
            }
            _ => {}
        }
    }

    None
}

/// Whether a line belongs to a `-progress` block.
pub fn is_progress_line(line: &str) -> bool {
    match line.trim().split_once('=') {
        Some((key, _)) => PROGRESS_KEYS.contains(&key) || key.starts_with("stream_"),
        None => false,
    }
}

fn classify_line(line: &str, current: &mut FfmpegProgress) -> StderrLine {
    if !is_progress_line(line) {
        return StderrLine::Diagnostic(line.to_string());
    }
    match parse_progress_line(line, current) {
        Some(progress) => StderrLine::Progress(progress),
        None => StderrLine::ProgressField,
    }
}
