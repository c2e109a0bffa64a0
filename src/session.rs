//! Headless playback: pulls frames and audio through an [`Input`] the way a
//! player would, and reports what came out.

use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::MediaResult;
use crate::input::Input;
use crate::media_object::MediaObject;
use crate::observability::{MetricsCollector, MetricsSnapshot};
use crate::video::{StereoLayout, UNSET_TIME, VideoFrame, stereo_layout_to_string};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Stop after this many video frames (audio blobs for audio-only input).
    pub max_units: Option<usize>,
    /// Requested audio blob size in bytes.
    pub audio_blob_size: usize,
    /// Seek here, in microseconds, before the first read.
    pub start_at: Option<i64>,
    /// Hash every view of every frame.
    pub frame_digests: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_units: None,
            audio_blob_size: 16 * 1024,
            start_at: None,
            frame_digests: false,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionReport {
    pub generated_at: DateTime<Utc>,
    pub input: InputSummary,
    pub video: VideoSummary,
    pub audio: AudioSummary,
    pub subtitles: SubtitleSummary,
    pub wall_time_ms: f64,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct InputSummary {
    pub mode: String,
    pub stereo_layout: String,
    pub width: i32,
    pub height: i32,
    pub aspect_ratio: f32,
    pub frame_rate: (i32, i32),
    pub audio: Option<String>,
    pub duration_us: i64,
}

#[derive(Debug, Default, Serialize)]
pub struct VideoSummary {
    pub frames: usize,
    pub first_pts: Option<i64>,
    pub last_pts: Option<i64>,
    /// Frames whose timestamp did not increase.
    pub non_monotonic: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub digests: Vec<FrameDigest>,
}

#[derive(Debug, Serialize)]
pub struct FrameDigest {
    pub pts: i64,
    /// SHA-256 of each view's planes, left view first.
    pub views: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct AudioSummary {
    pub blobs: usize,
    pub bytes: usize,
    pub first_pts: Option<i64>,
    /// End of the last blob.
    pub end_pts: Option<i64>,
}

#[derive(Debug, Default, Serialize)]
pub struct SubtitleSummary {
    pub lists: usize,
    pub languages: Vec<String>,
}

/// Hashes every plane of one view as the sink would receive it.
pub fn view_digest(frame: &VideoFrame, view: usize) -> MediaResult<String> {
    let mut hasher = Sha256::new();
    let mut buffer = Vec::new();
    for plane in 0..frame.layout.plane_count() {
        buffer.resize(frame.plane_size(plane)?, 0);
        frame.copy_plane(view, plane, &mut buffer)?;
        hasher.update(&buffer);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn view_count(frame: &VideoFrame) -> usize {
    if frame.stereo_layout == StereoLayout::Mono {
        1
    } else {
        2
    }
}

pub struct Session {
    input: Input,
    subtitles: Option<MediaObject>,
    metrics: MetricsCollector,
    options: SessionOptions,
}

impl Session {
    /// `metrics` should be the collector the input's media objects record
    /// into.
    pub fn new(input: Input, metrics: MetricsCollector, options: SessionOptions) -> Self {
        Self {
            input,
            subtitles: None,
            metrics,
            options,
        }
    }

    /// Also reads subtitle stream 0 of `source` up to the end of playback.
    pub fn with_subtitles(mut self, source: MediaObject) -> Self {
        self.subtitles = Some(source);
        self
    }

    pub fn run(mut self) -> Result<SessionReport> {
        let started = Instant::now();
        let limit = self.options.max_units.unwrap_or(usize::MAX);
        let has_video = self.input.has_video();
        let has_audio = self.input.has_audio();

        if let Some(pos) = self.options.start_at {
            self.input.seek(pos).context("Failed to seek input")?;
        }

        let mut video = VideoSummary::default();
        let mut audio = AudioSummary::default();
        let mut video_active = has_video && limit > 0;
        let mut audio_active = has_audio && limit > 0;
        if video_active {
            self.input.start_video_frame_read()?;
        }
        if audio_active {
            self.input.start_audio_blob_read(self.options.audio_blob_size)?;
        }

        // Presentation clock: end of the last video frame delivered.
        let mut video_clock = UNSET_TIME;
        let frame_duration = self.input.video_frame_duration();
        while video_active || audio_active {
            if video_active {
                match self
                    .input
                    .finish_video_frame_read()
                    .context("Video decoding failed")?
                {
                    None => video_active = false,
                    Some(frame) => {
                        self.record_frame(&mut video, &frame)?;
                        video_clock = frame.presentation_time.saturating_add(frame_duration);
                        if video.frames >= limit {
                            video_active = false;
                        } else {
                            self.input.start_video_frame_read()?;
                        }
                    }
                }
            }

            while audio_active {
                let audio_clock = audio.end_pts.unwrap_or(UNSET_TIME);
                let wanted = if has_video {
                    audio_clock < video_clock
                } else {
                    audio.blobs < limit
                };
                if !wanted {
                    audio_active = video_active;
                    break;
                }
                match self
                    .input
                    .finish_audio_blob_read()
                    .context("Audio decoding failed")?
                {
                    None => audio_active = false,
                    Some(blob) => {
                        audio.blobs += 1;
                        audio.bytes += blob.data.len();
                        audio.first_pts.get_or_insert(blob.presentation_time);
                        audio.end_pts = Some(blob.presentation_time + blob.duration_us());
                        self.input.start_audio_blob_read(self.options.audio_blob_size)?;
                    }
                }
            }
        }

        let playback_end = video
            .last_pts
            .map(|pts| pts.saturating_add(frame_duration))
            .or(audio.end_pts)
            .unwrap_or(i64::MAX);
        let subtitles = match self.subtitles.as_mut() {
            Some(source) => read_subtitles(source, self.options.start_at, playback_end)?,
            None => SubtitleSummary::default(),
        };

        let elapsed = started.elapsed();
        self.metrics.record_total_duration(elapsed);
        let report = SessionReport {
            generated_at: Utc::now(),
            input: self.summary(),
            video,
            audio,
            subtitles,
            wall_time_ms: elapsed.as_secs_f64() * 1_000.0,
            metrics: self.metrics.snapshot(),
        };
        info!(
            frames = report.video.frames,
            audio_blobs = report.audio.blobs,
            subtitle_lists = report.subtitles.lists,
            wall_time_ms = report.wall_time_ms,
            "Playback finished"
        );
        self.input.close();
        Ok(report)
    }

    fn record_frame(&self, summary: &mut VideoSummary, frame: &VideoFrame) -> Result<()> {
        let pts = frame.presentation_time;
        if summary.last_pts.is_some_and(|last| pts <= last) {
            summary.non_monotonic += 1;
        }
        summary.frames += 1;
        summary.first_pts.get_or_insert(pts);
        summary.last_pts = Some(pts);
        if self.options.frame_digests {
            let views = (0..view_count(frame))
                .map(|view| view_digest(frame, view))
                .collect::<MediaResult<Vec<_>>>()
                .with_context(|| format!("Failed to extract views of frame at {pts}"))?;
            summary.digests.push(FrameDigest { pts, views });
        }
        debug!(pts, "Frame presented");
        Ok(())
    }

    fn summary(&self) -> InputSummary {
        let input = &self.input;
        InputSummary {
            mode: input.mode().name().to_string(),
            stereo_layout: stereo_layout_to_string(
                input.stereo_layout(),
                input.stereo_layout_swap(),
            )
            .to_string(),
            width: input.video_width(),
            height: input.video_height(),
            aspect_ratio: input.video_aspect_ratio(),
            frame_rate: (
                input.video_frame_rate_numerator(),
                input.video_frame_rate_denominator(),
            ),
            audio: input.has_audio().then(|| {
                format!(
                    "{} channels, {} Hz, {}",
                    input.audio_channels(),
                    input.audio_rate(),
                    input.audio_sample_format().map_or("?", |f| f.name())
                )
            }),
            duration_us: input.duration(),
        }
    }
}

fn read_subtitles(
    source: &mut MediaObject,
    start_at: Option<i64>,
    end: i64,
) -> Result<SubtitleSummary> {
    let mut summary = SubtitleSummary::default();
    if source.subtitle_streams() == 0 {
        return Ok(summary);
    }
    source.subtitles_stream_set_active(0, true)?;
    if let Some(pos) = start_at {
        source.seek(pos)?;
    }
    loop {
        source.start_subtitle_list_read(0)?;
        let Some(list) = source
            .finish_subtitle_list_read(0)
            .context("Subtitle decoding failed")?
        else {
            break;
        };
        if list.presentation_start_time() >= end {
            break;
        }
        summary.lists += 1;
        for entry in &list.boxes {
            if !entry.language.is_empty() && !summary.languages.contains(&entry.language) {
                summary.languages.push(entry.language.clone());
            }
        }
    }
    source.close();
    Ok(summary)
}
