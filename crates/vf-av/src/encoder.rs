//! HLS segment encoder.
//!
//! Encodes one source file into `output.m3u8` plus `segment_NNN.ts` files
//! using a single fixed quality profile, streaming ffmpeg's `-progress`
//! output into percentage updates.

use std::path::{Path, PathBuf};
use std::time::Duration;

use vf_core::config::EncoderConfig;
use vf_core::{Error, Result};
use vf_media::hls::{MANIFEST_NAME, SEGMENT_PATTERN};

use crate::command::ToolCommand;
use crate::tools::ToolRegistry;

/// Highest percentage reported while the encoder is still running.
const RUNNING_CAP: u8 = 99;

/// Turns ffmpeg `-progress` key/value lines into throttled percentages.
///
/// A value is emitted at the end of a progress block (`progress=...`) only
/// when it is at least `step` points above the last one emitted.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    duration_secs: Option<f64>,
    step: u8,
    last_reported: u8,
    out_time_us: Option<i64>,
}

impl ProgressTracker {
    pub fn new(duration_secs: Option<f64>, step: u8) -> Self {
        Self {
            duration_secs,
            step: step.max(1),
            last_reported: 0,
            out_time_us: None,
        }
    }

    /// Last percentage emitted by [`feed`](Self::feed).
    pub fn last_reported(&self) -> u8 {
        self.last_reported
    }

    /// Feed one stderr line; returns a new percentage when one is due.
    pub fn feed(&mut self, line: &str) -> Option<u8> {
        if let Some(val) = line.strip_prefix("out_time_us=") {
            self.out_time_us = val.trim().parse::<i64>().ok().or(self.out_time_us);
            return None;
        }
        // Older ffmpeg builds report microseconds under the `_ms` key too.
        if let Some(val) = line.strip_prefix("out_time_ms=") {
            if self.out_time_us.is_none() {
                self.out_time_us = val.trim().parse::<i64>().ok();
            }
            return None;
        }
        if !line.starts_with("progress=") {
            return None;
        }

        let (out_us, dur) = (self.out_time_us?, self.duration_secs?);
        if dur <= 0.0 || out_us < 0 {
            return None;
        }

        let elapsed = out_us as f64 / 1_000_000.0;
        let pct = ((elapsed / dur) * 100.0).floor().clamp(0.0, RUNNING_CAP as f64) as u8;
        if pct >= self.last_reported.saturating_add(self.step) {
            self.last_reported = pct;
            Some(pct)
        } else {
            None
        }
    }
}

/// Fixed-profile HLS encoder backed by ffmpeg/ffprobe.
#[derive(Debug, Clone)]
pub struct HlsEncoder {
    tools: ToolRegistry,
    config: EncoderConfig,
}

impl HlsEncoder {
    pub fn new(tools: ToolRegistry, config: EncoderConfig) -> Self {
        Self { tools, config }
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Container duration in seconds as reported by ffprobe.
    ///
    /// Returns `None` when ffprobe is missing or reports nothing usable;
    /// the encode still runs, just without percentage updates.
    pub async fn probe_duration(&self, input: &Path) -> Option<f64> {
        let ffprobe = match self.tools.require("ffprobe") {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("Cannot probe duration: {e}");
                return None;
            }
        };

        let output = ToolCommand::new(ffprobe.path.clone())
            .args(["-v", "error", "-show_entries", "format=duration"])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(input.to_string_lossy())
            .timeout(Duration::from_secs(60))
            .execute()
            .await;

        match output {
            Ok(out) => out
                .stdout
                .lines()
                .find_map(|l| l.trim().parse::<f64>().ok())
                .filter(|d| d.is_finite() && *d > 0.0),
            Err(e) => {
                tracing::warn!(input = %input.display(), "ffprobe failed: {e}");
                None
            }
        }
    }

    /// ffmpeg arguments for encoding `input` into `output_dir`.
    pub fn build_args(&self, input: &Path, output_dir: &Path) -> Vec<String> {
        let c = &self.config;
        let seg = c.segment_seconds.max(1);
        let mut args: Vec<String> = Vec::new();
        let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

        push(&["-hide_banner", "-y", "-loglevel", "error"]);
        push(&["-progress", "pipe:2", "-nostats"]);
        push(&["-i", &input.to_string_lossy()]);
        push(&["-map", "0:v:0", "-map", "0:a:0?"]);
        push(&["-vf", &format!("scale=-2:'min({},ih)'", c.max_height)]);
        push(&["-c:v", "libx264"]);
        push(&["-profile:v", &c.h264_profile, "-level", &c.h264_level]);
        push(&["-preset", &c.preset]);
        push(&["-b:v", &c.video_bitrate]);
        push(&["-maxrate", &c.video_maxrate, "-bufsize", &c.video_bufsize]);
        push(&["-force_key_frames", &format!("expr:gte(t,n_forced*{seg})")]);
        push(&["-c:a", "aac", "-b:a", &c.audio_bitrate, "-ac", "2"]);
        push(&["-f", "hls", "-hls_time", &seg.to_string(), "-hls_list_size", "0"]);
        push(&[
            "-hls_segment_filename",
            &output_dir.join(SEGMENT_PATTERN).to_string_lossy(),
        ]);
        push(&[&output_dir.join(MANIFEST_NAME).to_string_lossy()]);
        args
    }

    /// Encode `input` into `output_dir`, returning the manifest path.
    ///
    /// `on_progress` receives percentages (0..=99) as they advance by at
    /// least the configured step. Every failure, including timeouts and a
    /// missing manifest after a clean exit, is an [`Error::Transcode`].
    pub async fn encode(
        &self,
        input: &Path,
        output_dir: &Path,
        mut on_progress: impl FnMut(u8),
    ) -> Result<PathBuf> {
        let ffmpeg = self
            .tools
            .require("ffmpeg")
            .map_err(|e| Error::Transcode(e.to_string()))?;

        if !input.is_file() {
            return Err(Error::Transcode(format!(
                "source file not found: {}",
                input.display()
            )));
        }
        tokio::fs::create_dir_all(output_dir).await?;

        let duration = self.probe_duration(input).await;
        tracing::info!(
            input = %input.display(),
            output = %output_dir.display(),
            duration_secs = ?duration,
            "Starting HLS encode"
        );

        let mut tracker = ProgressTracker::new(duration, self.config.progress_step);
        let mut cmd = ToolCommand::new(ffmpeg.path.clone());
        cmd.args(self.build_args(input, output_dir))
            .soft_timeout(Duration::from_secs(self.config.soft_timeout_secs))
            .timeout(Duration::from_secs(self.config.hard_timeout_secs));

        cmd.execute_streaming(|line| {
            if let Some(pct) = tracker.feed(line) {
                on_progress(pct);
            }
        })
        .await
        .map_err(|e| match e {
            Error::Tool { message, .. } => Error::Transcode(format!("ffmpeg {message}")),
            other => Error::Transcode(other.to_string()),
        })?;

        let manifest = output_dir.join(MANIFEST_NAME);
        if !manifest.is_file() {
            return Err(Error::Transcode(format!(
                "ffmpeg exited cleanly but {} is missing",
                manifest.display()
            )));
        }

        tracing::info!(manifest = %manifest.display(), "HLS encode finished");
        Ok(manifest)
    }
}
