//! One opened source and the decode workers of its active streams.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::blob::{AudioBlob, SubtitleBox, SubtitleList};
use crate::decoder::{Backend, BackendRegistry, StreamInfo, StreamKind};
use crate::error::{MediaError, MediaResult};
use crate::observability::MetricsCollector;
use crate::video::{UNSET_TIME, VideoFrame};
use crate::worker::{StreamWorker, Unit};

/// Streams of one kind: their decoder indices and, when active, workers.
#[derive(Default)]
struct StreamSet {
    decoder_index: Vec<usize>,
    workers: Vec<Option<StreamWorker>>,
}

impl StreamSet {
    fn push(&mut self, decoder_index: usize) {
        self.decoder_index.push(decoder_index);
        self.workers.push(None);
    }

    fn len(&self) -> usize {
        self.decoder_index.len()
    }
}

pub struct MediaObject {
    url: String,
    backend: Arc<dyn Backend>,
    tags: Vec<(String, String)>,
    streams: Vec<StreamInfo>,
    video: StreamSet,
    audio: StreamSet,
    subtitles: StreamSet,
    metrics: MetricsCollector,
    /// Target of the most recent seek; new workers start there.
    seek_target: Option<i64>,
    position: i64,
    closed: bool,
}

impl MediaObject {
    /// Opens `url` with the default file backends.
    pub fn open(url: &str) -> MediaResult<Self> {
        Self::open_with(&BackendRegistry::with_defaults(), url)
    }

    #[instrument(skip(registry))]
    pub fn open_with(registry: &BackendRegistry, url: &str) -> MediaResult<Self> {
        let backend = registry.select(url)?;
        let mut probe = backend.open(url)?;
        let tags = probe.tags().to_vec();
        let streams = probe.streams().to_vec();
        probe.close();
        drop(probe);

        let mut object = Self {
            url: url.to_string(),
            backend,
            tags,
            streams: Vec::new(),
            video: StreamSet::default(),
            audio: StreamSet::default(),
            subtitles: StreamSet::default(),
            metrics: MetricsCollector::global().clone(),
            seek_target: None,
            position: UNSET_TIME,
            closed: false,
        };
        for (index, info) in streams.iter().enumerate() {
            let usable = match info {
                StreamInfo::Video { template, .. } => template.is_valid(),
                StreamInfo::Audio { template, .. } => template.is_valid(),
                StreamInfo::Subtitles { .. } => true,
            };
            if !usable {
                debug!(url, index, "Skipping stream without a usable format");
                continue;
            }
            object.set_mut(info.kind()).push(index);
        }
        object.streams = streams;
        if object.video.len() + object.audio.len() + object.subtitles.len() == 0 {
            return Err(MediaError::format(url, "no usable video, audio or subtitle streams"));
        }
        info!(
            url,
            backend = object.backend.name(),
            video = object.video.len(),
            audio = object.audio.len(),
            subtitles = object.subtitles.len(),
            "Opened media object"
        );
        Ok(object)
    }

    /// Records decode statistics into `metrics` instead of the global
    /// collector. Applies to workers activated afterwards.
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn tags(&self) -> &[(String, String)] {
        &self.tags
    }

    /// Looks a tag up by case-insensitive name.
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn video_streams(&self) -> usize {
        self.video.len()
    }

    pub fn audio_streams(&self) -> usize {
        self.audio.len()
    }

    pub fn subtitle_streams(&self) -> usize {
        self.subtitles.len()
    }

    /// Every stream the decoder reported, including unusable ones.
    pub fn stream_info(&self) -> &[StreamInfo] {
        &self.streams
    }

    pub fn video_frame_template(&self, video_stream: usize) -> MediaResult<&VideoFrame> {
        match self.info(StreamKind::Video, video_stream)? {
            StreamInfo::Video { template, .. } => Ok(template),
            _ => Err(self.missing(StreamKind::Video, video_stream)),
        }
    }

    pub fn video_frame_rate_numerator(&self, video_stream: usize) -> MediaResult<i32> {
        self.video_frame_rate(video_stream).map(|(num, _)| num)
    }

    pub fn video_frame_rate_denominator(&self, video_stream: usize) -> MediaResult<i32> {
        self.video_frame_rate(video_stream).map(|(_, den)| den)
    }

    fn video_frame_rate(&self, video_stream: usize) -> MediaResult<(i32, i32)> {
        match self.info(StreamKind::Video, video_stream)? {
            StreamInfo::Video { frame_rate, .. } => Ok(*frame_rate),
            _ => Err(self.missing(StreamKind::Video, video_stream)),
        }
    }

    /// Microseconds.
    pub fn video_duration(&self, video_stream: usize) -> MediaResult<i64> {
        match self.info(StreamKind::Video, video_stream)? {
            StreamInfo::Video { duration, .. } => Ok(*duration),
            _ => Err(self.missing(StreamKind::Video, video_stream)),
        }
    }

    pub fn audio_blob_template(&self, audio_stream: usize) -> MediaResult<&AudioBlob> {
        match self.info(StreamKind::Audio, audio_stream)? {
            StreamInfo::Audio { template, .. } => Ok(template),
            _ => Err(self.missing(StreamKind::Audio, audio_stream)),
        }
    }

    /// Microseconds.
    pub fn audio_duration(&self, audio_stream: usize) -> MediaResult<i64> {
        match self.info(StreamKind::Audio, audio_stream)? {
            StreamInfo::Audio { duration, .. } => Ok(*duration),
            _ => Err(self.missing(StreamKind::Audio, audio_stream)),
        }
    }

    pub fn subtitle_box_template(&self, subtitle_stream: usize) -> MediaResult<&SubtitleBox> {
        match self.info(StreamKind::Subtitles, subtitle_stream)? {
            StreamInfo::Subtitles { template } => Ok(template),
            _ => Err(self.missing(StreamKind::Subtitles, subtitle_stream)),
        }
    }

    pub fn video_stream_set_active(&mut self, video_stream: usize, active: bool) -> MediaResult<()> {
        self.set_active(StreamKind::Video, video_stream, active)
    }

    pub fn audio_stream_set_active(&mut self, audio_stream: usize, active: bool) -> MediaResult<()> {
        self.set_active(StreamKind::Audio, audio_stream, active)
    }

    pub fn subtitles_stream_set_active(
        &mut self,
        subtitle_stream: usize,
        active: bool,
    ) -> MediaResult<()> {
        self.set_active(StreamKind::Subtitles, subtitle_stream, active)
    }

    pub fn is_active(&self, kind: StreamKind, index: usize) -> bool {
        self.set(kind)
            .workers
            .get(index)
            .is_some_and(|worker| worker.is_some())
    }

    pub fn start_video_frame_read(&mut self, video_stream: usize) -> MediaResult<()> {
        self.worker(StreamKind::Video, video_stream)?.dispatch(0)
    }

    /// Blocks until the frame is decoded. `Ok(None)` marks end of stream.
    pub fn finish_video_frame_read(&mut self, video_stream: usize) -> MediaResult<Option<VideoFrame>> {
        match self.finish(StreamKind::Video, video_stream)? {
            Some(Unit::Video(frame)) => Ok(Some(frame)),
            Some(_) => Err(self.missing(StreamKind::Video, video_stream)),
            None => Ok(None),
        }
    }

    /// `size` is the wanted blob size in bytes.
    pub fn start_audio_blob_read(&mut self, audio_stream: usize, size: usize) -> MediaResult<()> {
        self.worker(StreamKind::Audio, audio_stream)?.dispatch(size)
    }

    pub fn finish_audio_blob_read(&mut self, audio_stream: usize) -> MediaResult<Option<AudioBlob>> {
        match self.finish(StreamKind::Audio, audio_stream)? {
            Some(Unit::Audio(blob)) => Ok(Some(blob)),
            Some(_) => Err(self.missing(StreamKind::Audio, audio_stream)),
            None => Ok(None),
        }
    }

    pub fn start_subtitle_list_read(&mut self, subtitle_stream: usize) -> MediaResult<()> {
        self.worker(StreamKind::Subtitles, subtitle_stream)?
            .dispatch(0)
    }

    pub fn finish_subtitle_list_read(
        &mut self,
        subtitle_stream: usize,
    ) -> MediaResult<Option<SubtitleList>> {
        match self.finish(StreamKind::Subtitles, subtitle_stream)? {
            Some(Unit::Subtitles(list)) => Ok(Some(list)),
            Some(_) => Err(self.missing(StreamKind::Subtitles, subtitle_stream)),
            None => Ok(None),
        }
    }

    /// Latest presentation time delivered since opening or the last seek,
    /// or [`UNSET_TIME`] if nothing was read yet.
    pub fn tell(&self) -> i64 {
        self.position
    }

    /// Repositions every active stream to the closest random access point
    /// at or before `pos` microseconds. Outstanding reads are reissued at
    /// the new position.
    #[instrument(skip(self), fields(url = self.url.as_str()))]
    pub fn seek(&mut self, pos: i64) -> MediaResult<()> {
        if self.closed {
            return Err(self.closed_error());
        }
        self.seek_target = Some(pos);
        self.position = UNSET_TIME;
        let mut first_error = None;
        for set in [&mut self.video, &mut self.audio, &mut self.subtitles] {
            for worker in set.workers.iter_mut().flatten() {
                if let Err(err) = worker.seek(pos) {
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Stops all workers. Later calls do nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        for set in [&mut self.video, &mut self.audio, &mut self.subtitles] {
            for worker in set.workers.iter_mut() {
                if let Some(mut worker) = worker.take() {
                    worker.shutdown();
                }
            }
        }
        self.closed = true;
        debug!(url = self.url.as_str(), "Closed media object");
    }

    fn set(&self, kind: StreamKind) -> &StreamSet {
        match kind {
            StreamKind::Video => &self.video,
            StreamKind::Audio => &self.audio,
            StreamKind::Subtitles => &self.subtitles,
        }
    }

    fn set_mut(&mut self, kind: StreamKind) -> &mut StreamSet {
        match kind {
            StreamKind::Video => &mut self.video,
            StreamKind::Audio => &mut self.audio,
            StreamKind::Subtitles => &mut self.subtitles,
        }
    }

    fn info(&self, kind: StreamKind, index: usize) -> MediaResult<&StreamInfo> {
        self.set(kind)
            .decoder_index
            .get(index)
            .and_then(|&decoder_index| self.streams.get(decoder_index))
            .ok_or_else(|| self.missing(kind, index))
    }

    fn set_active(&mut self, kind: StreamKind, index: usize, active: bool) -> MediaResult<()> {
        if self.closed {
            return Err(self.closed_error());
        }
        let decoder_index = *self
            .set(kind)
            .decoder_index
            .get(index)
            .ok_or_else(|| self.missing(kind, index))?;
        let currently_active = self.is_active(kind, index);
        if active == currently_active {
            return Ok(());
        }
        if !active {
            if let Some(mut worker) = self.set_mut(kind).workers[index].take() {
                worker.shutdown();
            }
            return Ok(());
        }

        let decoder = self.backend.open(&self.url)?;
        let label = format!("{}#{}{}", self.url, kind.name(), index);
        let mut worker = StreamWorker::spawn(
            label,
            decoder,
            kind,
            decoder_index,
            self.metrics.clone(),
        )?;
        if let Some(pos) = self.seek_target {
            worker.seek(pos)?;
        }
        self.set_mut(kind).workers[index] = Some(worker);
        Ok(())
    }

    fn worker(&mut self, kind: StreamKind, index: usize) -> MediaResult<&mut StreamWorker> {
        if self.closed {
            return Err(self.closed_error());
        }
        if index >= self.set(kind).len() {
            return Err(self.missing(kind, index));
        }
        let url = self.url.clone();
        self.set_mut(kind).workers[index].as_mut().ok_or_else(|| {
            MediaError::usage(format!("{url}: {} stream {index} is not active", kind.name()))
        })
    }

    fn finish(&mut self, kind: StreamKind, index: usize) -> MediaResult<Option<Unit>> {
        let unit = self.worker(kind, index)?.collect()?;
        if let Some(unit) = &unit {
            let pts = unit.presentation_time();
            if pts != UNSET_TIME && (self.position == UNSET_TIME || pts > self.position) {
                self.position = pts;
            }
        }
        Ok(unit)
    }

    fn missing(&self, kind: StreamKind, index: usize) -> MediaError {
        MediaError::usage(format!(
            "{}: no {} stream with index {index}",
            self.url,
            kind.name()
        ))
    }

    fn closed_error(&self) -> MediaError {
        MediaError::usage(format!("{}: media object is closed", self.url))
    }
}

impl Drop for MediaObject {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::memory::{MemoryBackend, MemoryFrame, MemorySource, MemoryStream};
    use crate::video::PixelLayout;

    fn frame(pts: i64) -> MemoryFrame {
        MemoryFrame {
            frame: VideoFrame {
                raw_width: 4,
                raw_height: 2,
                raw_aspect_ratio: 2.0,
                layout: PixelLayout::Bgra32,
                presentation_time: pts,
                data: [
                    [vec![0; 32], Vec::new(), Vec::new()],
                    Default::default(),
                ],
                line_size: [[16, 0, 0], [0; 3]],
                ..VideoFrame::default()
            },
            keyframe: pts % 3 == 0,
        }
    }

    fn open(frames: usize) -> MediaObject {
        let backend = MemoryBackend::new();
        let url = backend.insert(
            "clip",
            MemorySource {
                tags: vec![("Title".into(), "clip".into())],
                streams: vec![MemoryStream::Video {
                    template: frame(0).frame,
                    frame_rate: (1_000_000, 1),
                    frames: (0..frames as i64).map(frame).collect(),
                    fail_at: None,
                }],
                decode_delay: None,
            },
        );
        let mut registry = BackendRegistry::new();
        registry.register(backend);
        MediaObject::open_with(&registry, &url)
            .unwrap()
            .with_metrics(MetricsCollector::new())
    }

    #[test]
    fn exposes_templates_and_tags() {
        let object = open(5);
        assert_eq!(object.video_streams(), 1);
        assert_eq!(object.audio_streams(), 0);
        assert_eq!(object.tag("title"), Some("clip"));
        let template = object.video_frame_template(0).unwrap();
        assert_eq!(template.width, 4);
        assert!(template.data[0][0].is_empty());
        assert_eq!(object.video_duration(0).unwrap(), 5);
        assert!(object.audio_blob_template(0).unwrap_err().is_usage());
    }

    #[test]
    fn inactive_streams_cannot_be_read() {
        let mut object = open(5);
        assert!(object.start_video_frame_read(0).unwrap_err().is_usage());
        assert!(object.start_audio_blob_read(0, 64).unwrap_err().is_usage());
        object.video_stream_set_active(0, true).unwrap();
        object.start_video_frame_read(0).unwrap();
        let frame = object.finish_video_frame_read(0).unwrap().unwrap();
        assert_eq!(frame.presentation_time, 0);
        assert_eq!(object.tell(), 0);
    }

    #[test]
    fn seek_lands_on_preceding_keyframe_and_resets_tell() {
        let mut object = open(10);
        object.video_stream_set_active(0, true).unwrap();
        object.start_video_frame_read(0).unwrap();
        object.finish_video_frame_read(0).unwrap();
        object.start_video_frame_read(0).unwrap();
        object.seek(5).unwrap();
        assert_eq!(object.tell(), UNSET_TIME);
        let frame = object.finish_video_frame_read(0).unwrap().unwrap();
        assert_eq!(frame.presentation_time, 3);
        assert_eq!(object.tell(), 3);
    }

    #[test]
    fn close_is_idempotent_and_rejects_further_use() {
        let mut object = open(3);
        object.video_stream_set_active(0, true).unwrap();
        object.start_video_frame_read(0).unwrap();
        object.close();
        object.close();
        assert!(object.start_video_frame_read(0).unwrap_err().is_usage());
    }
}
