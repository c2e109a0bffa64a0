//! Combines up to two video streams and one audio stream into one logical
//! stereoscopic source.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::blob::{AudioBlob, SampleFormat};
use crate::error::{MediaError, MediaResult};
use crate::media_object::MediaObject;
use crate::video::{StereoLayout, UNSET_TIME, VideoFrame, parse_stereo_layout};

/// How the selected video streams map onto the left and right views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum InputMode {
    Mono,
    Separate,
    TopBottom,
    TopBottomHalf,
    LeftRight,
    LeftRightHalf,
    EvenOddRows,
    #[default]
    Automatic,
}

impl InputMode {
    pub const ALL: [InputMode; 8] = [
        InputMode::Mono,
        InputMode::Separate,
        InputMode::TopBottom,
        InputMode::TopBottomHalf,
        InputMode::LeftRight,
        InputMode::LeftRightHalf,
        InputMode::EvenOddRows,
        InputMode::Automatic,
    ];

    pub fn name(self) -> &'static str {
        match self {
            InputMode::Mono => "mono",
            InputMode::Separate => "separate",
            InputMode::TopBottom => "top-bottom",
            InputMode::TopBottomHalf => "top-bottom-half",
            InputMode::LeftRight => "left-right",
            InputMode::LeftRightHalf => "left-right-half",
            InputMode::EvenOddRows => "even-odd-rows",
            InputMode::Automatic => "automatic",
        }
    }

    /// Unknown names select [`InputMode::Automatic`].
    pub fn from_name(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|mode| mode.name() == name)
            .unwrap_or(InputMode::Automatic)
    }

    /// The frame packing this mode reads, or `None` for automatic.
    pub fn stereo_layout(self) -> Option<StereoLayout> {
        match self {
            InputMode::Mono => Some(StereoLayout::Mono),
            InputMode::Separate => Some(StereoLayout::Separate),
            InputMode::TopBottom => Some(StereoLayout::TopBottom),
            InputMode::TopBottomHalf => Some(StereoLayout::TopBottomHalf),
            InputMode::LeftRight => Some(StereoLayout::LeftRight),
            InputMode::LeftRightHalf => Some(StereoLayout::LeftRightHalf),
            InputMode::EvenOddRows => Some(StereoLayout::EvenOddRows),
            InputMode::Automatic => None,
        }
    }

    fn from_stereo_layout(layout: StereoLayout) -> Self {
        match layout {
            StereoLayout::Mono => InputMode::Mono,
            StereoLayout::Separate => InputMode::Separate,
            StereoLayout::TopBottom => InputMode::TopBottom,
            StereoLayout::TopBottomHalf => InputMode::TopBottomHalf,
            StereoLayout::LeftRight => InputMode::LeftRight,
            StereoLayout::LeftRightHalf => InputMode::LeftRightHalf,
            StereoLayout::EvenOddRows => InputMode::EvenOddRows,
        }
    }
}

/// A stream inside one of the media objects handed to [`Input::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSelector {
    pub media: usize,
    pub stream: usize,
}

impl StreamSelector {
    pub fn new(media: usize, stream: usize) -> Self {
        Self { media, stream }
    }
}

/// Stereo metadata tags, as written by muxers that know the packing.
const STEREO_TAGS: [&str; 2] = ["StereoMode", "stereo_mode"];

/// Matroska `StereoMode` codes that map onto a frame packing.
fn matroska_stereo_mode(code: &str) -> Option<(StereoLayout, bool)> {
    match code.trim() {
        "0" => Some((StereoLayout::Mono, false)),
        "1" => Some((StereoLayout::LeftRight, false)),
        "2" => Some((StereoLayout::TopBottom, true)),
        "3" => Some((StereoLayout::TopBottom, false)),
        "6" => Some((StereoLayout::EvenOddRows, true)),
        "7" => Some((StereoLayout::EvenOddRows, false)),
        "11" => Some((StereoLayout::LeftRight, true)),
        _ => None,
    }
}

/// Layout of a single video stream. A stream can never hold both views of
/// a separate pair on its own, so metadata claiming that is ignored.
fn detect_layout(media: &MediaObject, template: &VideoFrame) -> (StereoLayout, bool) {
    match template.stereo_layout {
        StereoLayout::Mono => {}
        StereoLayout::Separate => {
            warn!(url = media.url(), "Ignoring separate layout on a single video stream");
        }
        layout => return (layout, template.stereo_layout_swap),
    }
    for name in STEREO_TAGS {
        let Some(value) = media.tag(name) else {
            continue;
        };
        match parse_stereo_layout(value).or_else(|| matroska_stereo_mode(value)) {
            Some((StereoLayout::Separate, _)) => {
                warn!(
                    url = media.url(),
                    tag = name,
                    value,
                    "Ignoring separate layout on a single video stream"
                );
            }
            Some(detected) => return detected,
            None => {
                warn!(url = media.url(), tag = name, value, "Ignoring unknown stereo metadata");
            }
        }
    }
    (StereoLayout::Mono, false)
}

pub struct Input {
    media: Vec<MediaObject>,
    video: [Option<StreamSelector>; 2],
    audio: Option<StreamSelector>,
    mode: InputMode,
    video_template: Option<VideoFrame>,
    frame_rate: (i32, i32),
    audio_template: Option<AudioBlob>,
    duration: i64,
    closed: bool,
}

impl Input {
    /// Selects the streams to play and activates them.
    ///
    /// `video1` is only allowed in [`InputMode::Separate`] (or automatic
    /// mode, which then resolves to separate). The resolved swap flag is the
    /// detected one toggled by `swap_eyes`.
    #[instrument(skip(media), fields(sources = media.len()))]
    pub fn open(
        mut media: Vec<MediaObject>,
        video0: Option<StreamSelector>,
        video1: Option<StreamSelector>,
        audio: Option<StreamSelector>,
        mode: InputMode,
        swap_eyes: bool,
    ) -> MediaResult<Self> {
        if video0.is_none() && video1.is_some() {
            return Err(MediaError::usage("second video stream given without a first"));
        }
        if video0.is_some() && video0 == video1 {
            return Err(MediaError::usage("left and right views select the same stream"));
        }
        if video0.is_none() && audio.is_none() {
            return Err(MediaError::usage("input needs a video or audio stream"));
        }
        let resolved = match (mode, video1.is_some()) {
            (InputMode::Automatic, true) => InputMode::Separate,
            (InputMode::Separate, false) => {
                return Err(MediaError::usage("separate mode needs two video streams"));
            }
            (InputMode::Separate, true) | (_, false) => mode,
            (other, true) => {
                return Err(MediaError::usage(format!(
                    "{} mode reads one video stream, two were given",
                    other.name()
                )));
            }
        };

        let mut video_template = None;
        let mut frame_rate = (0, 1);
        let mut durations = Vec::new();
        let mode;
        if let Some(selector) = video0 {
            let source = media_at(&media, selector)?;
            let mut template = source.video_frame_template(selector.stream)?.clone();
            frame_rate = (
                source.video_frame_rate_numerator(selector.stream)?,
                source.video_frame_rate_denominator(selector.stream)?,
            );
            durations.push(source.video_duration(selector.stream)?);
            let (layout, swap) = match resolved.stereo_layout() {
                Some(layout) => (layout, false),
                None => detect_layout(source, &template),
            };
            mode = InputMode::from_stereo_layout(layout);
            template.stereo_layout = layout;
            template.stereo_layout_swap = swap != swap_eyes;
            template.set_view_dimensions();
            video_template = Some(template);
        } else {
            mode = InputMode::Mono;
        }
        if let (Some(selector), Some(left)) = (video1, video_template.as_ref()) {
            let source = media_at(&media, selector)?;
            let right = source.video_frame_template(selector.stream)?;
            if right.raw_width != left.raw_width
                || right.raw_height != left.raw_height
                || right.layout != left.layout
            {
                return Err(MediaError::format(
                    source.url(),
                    format!(
                        "right view {} does not match left view {}",
                        right.format_name(),
                        left.format_name()
                    ),
                ));
            }
            durations.push(source.video_duration(selector.stream)?);
        }
        let audio_template = match audio {
            Some(selector) => {
                let source = media_at(&media, selector)?;
                durations.push(source.audio_duration(selector.stream)?);
                Some(source.audio_blob_template(selector.stream)?.clone())
            }
            None => None,
        };
        let duration = durations.into_iter().min().unwrap_or(0);

        for selector in [video0, video1].into_iter().flatten() {
            media[selector.media].video_stream_set_active(selector.stream, true)?;
        }
        if let Some(selector) = audio {
            media[selector.media].audio_stream_set_active(selector.stream, true)?;
        }

        let input = Self {
            media,
            video: [video0, video1],
            audio,
            mode,
            video_template,
            frame_rate,
            audio_template,
            duration,
            closed: false,
        };
        info!(
            mode = input.mode.name(),
            width = input.video_width(),
            height = input.video_height(),
            audio = input.has_audio(),
            duration = input.duration,
            "Opened input"
        );
        Ok(input)
    }

    /// The resolved mode; never [`InputMode::Automatic`].
    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn stereo_layout(&self) -> StereoLayout {
        self.video_template
            .as_ref()
            .map(|t| t.stereo_layout)
            .unwrap_or_default()
    }

    pub fn stereo_layout_swap(&self) -> bool {
        self.video_template
            .as_ref()
            .is_some_and(|t| t.stereo_layout_swap)
    }

    pub fn has_video(&self) -> bool {
        self.video_template.is_some()
    }

    /// Metadata of the frames [`finish_video_frame_read`](Self::finish_video_frame_read)
    /// returns.
    pub fn video_template(&self) -> Option<&VideoFrame> {
        self.video_template.as_ref()
    }

    pub fn video_width(&self) -> i32 {
        self.video_template.as_ref().map_or(0, |t| t.width)
    }

    pub fn video_height(&self) -> i32 {
        self.video_template.as_ref().map_or(0, |t| t.height)
    }

    pub fn video_aspect_ratio(&self) -> f32 {
        self.video_template.as_ref().map_or(0.0, |t| t.aspect_ratio)
    }

    pub fn video_frame_rate_numerator(&self) -> i32 {
        self.frame_rate.0
    }

    pub fn video_frame_rate_denominator(&self) -> i32 {
        self.frame_rate.1
    }

    /// Microseconds per frame, or 0 without video.
    pub fn video_frame_duration(&self) -> i64 {
        let (num, den) = self.frame_rate;
        if num <= 0 {
            return 0;
        }
        den as i64 * 1_000_000 / num as i64
    }

    pub fn has_audio(&self) -> bool {
        self.audio_rate() > 0
    }

    pub fn audio_rate(&self) -> i32 {
        self.audio_template.as_ref().map_or(0, |t| t.rate)
    }

    pub fn audio_channels(&self) -> i32 {
        self.audio_template.as_ref().map_or(0, |t| t.channels)
    }

    pub fn audio_sample_format(&self) -> Option<SampleFormat> {
        self.audio_template.as_ref().map(|t| t.sample_format)
    }

    /// Shortest duration among the selected streams, in microseconds.
    pub fn duration(&self) -> i64 {
        self.duration
    }

    /// Latest presentation time any selected source has delivered.
    pub fn tell(&self) -> i64 {
        self.media
            .iter()
            .map(MediaObject::tell)
            .filter(|&t| t != UNSET_TIME)
            .max()
            .unwrap_or(UNSET_TIME)
    }

    pub fn start_video_frame_read(&mut self) -> MediaResult<()> {
        let [first, second] = self.video;
        let first = first.ok_or_else(|| MediaError::usage("input has no video stream"))?;
        self.media[first.media].start_video_frame_read(first.stream)?;
        if let Some(second) = second {
            self.media[second.media].start_video_frame_read(second.stream)?;
        }
        Ok(())
    }

    /// The next frame with its views resolved. In separate mode the right
    /// view's picture is in buffer index 1.
    pub fn finish_video_frame_read(&mut self) -> MediaResult<Option<VideoFrame>> {
        let [first, second] = self.video;
        let first = first.ok_or_else(|| MediaError::usage("input has no video stream"))?;
        let left = self.media[first.media].finish_video_frame_read(first.stream);
        // The right stream is always collected so both stay in step.
        let right = match second {
            Some(second) => Some(self.media[second.media].finish_video_frame_read(second.stream)),
            None => None,
        };
        let Some(mut frame) = left? else {
            return Ok(None);
        };
        if let Some(right) = right {
            let Some(right) = right? else {
                return Ok(None);
            };
            let [buffers, _] = right.data;
            frame.data[1] = buffers;
            frame.line_size[1] = right.line_size[0];
        }
        if let Some(template) = &self.video_template {
            frame.stereo_layout = template.stereo_layout;
            frame.stereo_layout_swap = template.stereo_layout_swap;
        }
        frame.set_view_dimensions();
        Ok(Some(frame))
    }

    pub fn start_audio_blob_read(&mut self, size: usize) -> MediaResult<()> {
        let selector = self
            .audio
            .ok_or_else(|| MediaError::usage("input has no audio stream"))?;
        self.media[selector.media].start_audio_blob_read(selector.stream, size)
    }

    pub fn finish_audio_blob_read(&mut self) -> MediaResult<Option<AudioBlob>> {
        let selector = self
            .audio
            .ok_or_else(|| MediaError::usage("input has no audio stream"))?;
        self.media[selector.media].finish_audio_blob_read(selector.stream)
    }

    /// Seeks every source; reports the first failure after trying all.
    pub fn seek(&mut self, pos: i64) -> MediaResult<()> {
        let mut first_error = None;
        for media in &mut self.media {
            if let Err(err) = media.seek(pos) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        for media in &mut self.media {
            media.close();
        }
        self.closed = true;
    }
}

impl Drop for Input {
    fn drop(&mut self) {
        self.close();
    }
}

fn media_at(media: &[MediaObject], selector: StreamSelector) -> MediaResult<&MediaObject> {
    media.get(selector.media).ok_or_else(|| {
        MediaError::usage(format!("no media object with index {}", selector.media))
    })
}
